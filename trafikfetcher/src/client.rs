use crate::error::{FetcherError, Result};
use crate::params::IncidentQuery;
use crate::query;
use crate::raw::{self, RawSituation};
use async_trait::async_trait;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::StatusCode;
use std::time::Duration;

/// Immutable client configuration; constructed once by the caller and
/// passed in, never read from the environment here.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub api_key: String,
    pub base_url: String,
    pub timeout: Duration,
    /// Attempts per page, including the first one.
    pub max_attempts: u32,
    /// Situations requested per page.
    pub page_size: u32,
    /// Hard cap on sequential pages, so a misbehaving provider cannot keep
    /// the fetch alive forever.
    pub max_pages: u32,
    /// First retry delay; doubled per attempt, capped at 10 s.
    pub retry_base_delay: Duration,
}

impl ClientConfig {
    pub fn new(api_key: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: base_url.into(),
            timeout: Duration::from_secs(30),
            max_attempts: 3,
            page_size: 250,
            max_pages: 40,
            retry_base_delay: Duration::from_secs(1),
        }
    }
}

/// The seam between the orchestrator and the provider. Implemented by
/// [`TrafikverketClient`] for the real API and by mocks in tests.
#[async_trait]
pub trait IncidentSource: Send + Sync {
    /// Fetches every situation matching `query`, merging all pages.
    ///
    /// A failed page aborts the whole fetch; there is no mid-fetch resume.
    async fn fetch(&self, query: &IncidentQuery) -> Result<Vec<RawSituation>>;
}

enum PageError {
    Retryable(String),
    Fatal(FetcherError),
}

#[derive(Debug)]
pub struct TrafikverketClient {
    http: reqwest::Client,
    config: ClientConfig,
}

impl TrafikverketClient {
    pub fn new(config: ClientConfig) -> Result<Self> {
        if config.api_key.trim().is_empty() {
            return Err(FetcherError::InvalidParam(
                "api_key must not be empty".to_string(),
            ));
        }
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|err| {
                FetcherError::InvalidParam(format!("failed to build HTTP client: {err}"))
            })?;
        Ok(Self { http, config })
    }

    async fn fetch_page(&self, query: &IncidentQuery, skip: u32) -> Result<Vec<RawSituation>> {
        let body = query::build_request(&self.config.api_key, query, self.config.page_size, skip);
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.post_once(&body).await {
                Ok(text) => return raw::parse_response(&text),
                Err(PageError::Fatal(err)) => return Err(err),
                Err(PageError::Retryable(message)) => {
                    if attempt >= self.config.max_attempts {
                        return Err(FetcherError::Transient {
                            attempts: attempt,
                            message,
                        });
                    }
                    let delay = backoff_delay(self.config.retry_base_delay, attempt);
                    log::warn!(
                        "provider request failed (attempt {attempt}/{}): {message}; retrying in {delay:?}",
                        self.config.max_attempts
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    async fn post_once(&self, body: &str) -> std::result::Result<String, PageError> {
        let response = self
            .http
            .post(&self.config.base_url)
            .header(CONTENT_TYPE, "application/xml")
            .header(ACCEPT, "application/xml")
            .body(body.to_string())
            .send()
            .await
            .map_err(|err| PageError::Retryable(err.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return response
                .text()
                .await
                .map_err(|err| PageError::Retryable(err.to_string()));
        }

        let detail = snippet(&response.text().await.unwrap_or_default());
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(PageError::Fatal(
                FetcherError::Auth(format!("HTTP {status}: {detail}")),
            )),
            StatusCode::TOO_MANY_REQUESTS => {
                Err(PageError::Retryable(format!("HTTP {status}: {detail}")))
            }
            s if s.is_server_error() => {
                Err(PageError::Retryable(format!("HTTP {status}: {detail}")))
            }
            _ => Err(PageError::Fatal(FetcherError::InvalidRequest(format!(
                "HTTP {status}: {detail}"
            )))),
        }
    }
}

#[async_trait]
impl IncidentSource for TrafikverketClient {
    async fn fetch(&self, query: &IncidentQuery) -> Result<Vec<RawSituation>> {
        let mut situations = Vec::new();
        let mut skip = 0u32;
        for page in 0..self.config.max_pages {
            let batch = self.fetch_page(query, skip).await?;
            let got = batch.len() as u32;
            situations.extend(batch);
            log::debug!("page {page}: {got} situations (total {})", situations.len());
            if got < self.config.page_size {
                return Ok(situations);
            }
            skip += self.config.page_size;
        }
        log::warn!(
            "stopping after {} pages with full pages still coming; result may be truncated",
            self.config.max_pages
        );
        Ok(situations)
    }
}

fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let exp = base.saturating_mul(1 << (attempt - 1).min(16));
    exp.min(Duration::from_secs(10))
}

fn snippet(text: &str) -> String {
    const MAX: usize = 500;
    if text.len() <= MAX {
        text.to_string()
    } else {
        let cut = text
            .char_indices()
            .take_while(|(i, _)| *i < MAX)
            .last()
            .map(|(i, c)| i + c.len_utf8())
            .unwrap_or(0);
        format!("{}…", &text[..cut])
    }
}
