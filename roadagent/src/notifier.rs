use serde_json::json;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Info,
    Success,
    Warning,
    Error,
}

impl Level {
    fn prefix(self) -> &'static str {
        match self {
            Level::Info => "ℹ️",
            Level::Success => "✅",
            Level::Warning => "⚠️",
            Level::Error => "🚨",
        }
    }
}

/// Posts run notifications to an optional webhook.
///
/// Delivery is best effort: a missing URL, a non-2xx answer or a network
/// error is logged and swallowed, so notification can never fail a cycle.
pub struct WebhookNotifier {
    url: Option<String>,
    http: reqwest::Client,
}

impl WebhookNotifier {
    pub fn new(url: Option<String>) -> Self {
        Self {
            url,
            http: reqwest::Client::new(),
        }
    }

    pub async fn notify(&self, level: Level, text: &str) {
        let Some(url) = &self.url else {
            tracing::debug!("no webhook configured, skipping notification");
            return;
        };
        let payload = json!({ "text": format!("{} {}", level.prefix(), text) });
        let sent = self
            .http
            .post(url)
            .json(&payload)
            .timeout(Duration::from_secs(10))
            .send()
            .await;
        match sent {
            Ok(response) if !response.status().is_success() => {
                tracing::warn!(status = %response.status(), "webhook rejected notification");
            }
            Ok(_) => {}
            Err(err) => {
                tracing::warn!(error = %err, "webhook delivery failed");
            }
        }
    }
}
