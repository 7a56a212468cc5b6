use roadagent::notifier::{Level, WebhookNotifier};
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn delivers_the_message_as_json() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/hook"))
        .and(body_string_contains("sync done"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let notifier = WebhookNotifier::new(Some(format!("{}/hook", server.uri())));
    notifier.notify(Level::Success, "sync done").await;
}

#[tokio::test]
async fn delivery_failure_is_swallowed() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&server)
        .await;

    let notifier = WebhookNotifier::new(Some(server.uri()));
    // Must return normally; a webhook outage can never fail a cycle.
    notifier.notify(Level::Error, "sync failed").await;
}

#[tokio::test]
async fn missing_url_sends_nothing() {
    let notifier = WebhookNotifier::new(None);
    notifier.notify(Level::Info, "sync started").await;
}
