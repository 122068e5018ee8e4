//! HTTP client with retry logic, timeouts, and cookie support

use crate::config::HttpConfig;
use anyhow::Result;
use async_trait::async_trait;
use reqwest::header::HeaderMap;
use reqwest::Client;
use std::time::Duration;

/// Status and raw text of a response, before any decoding
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: u16,
    pub body: String,
}

/// What the cloud login client needs from an HTTP provider
#[async_trait]
pub trait LoginTransport: Send + Sync {
    /// POST a JSON body with extra headers and return the raw response.
    ///
    /// Any status code is returned as-is; only transport failures are errors.
    async fn post_json(
        &self,
        url: &str,
        body: &serde_json::Value,
        headers: HeaderMap,
    ) -> Result<RawResponse>;
}

pub struct HttpClient {
    inner: Client,
    max_retries: u32,
}

impl HttpClient {
    pub fn new(config: &HttpConfig) -> Result<Self> {
        let client = Client::builder()
            .cookie_store(true)
            .timeout(Duration::from_secs(config.timeout))
            .connect_timeout(Duration::from_secs(config.connect_timeout))
            .build()?;

        Ok(Self {
            inner: client,
            max_retries: config.max_retries.max(1),
        })
    }

    pub async fn post_json_with_headers<T: serde::Serialize + ?Sized>(
        &self,
        url: &str,
        body: &T,
        headers: HeaderMap,
    ) -> Result<RawResponse> {
        self.with_retry(|| {
            self.inner
                .post(url)
                .headers(headers.clone())
                .json(body)
                .send()
        })
        .await
    }

    /// Retry transport errors and server errors with exponential backoff.
    ///
    /// The last response is returned raw whatever its status.
    async fn with_retry<F, Fut>(&self, request_fn: F) -> Result<RawResponse>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = reqwest::Result<reqwest::Response>>,
    {
        let mut attempt = 0;

        loop {
            let last_attempt = attempt + 1 >= self.max_retries;
            let delay = Duration::from_secs(1 << attempt.min(4));

            match request_fn().await {
                Ok(resp) if resp.status().is_server_error() && !last_attempt => {
                    let status = resp.status();
                    let body = resp.text().await.unwrap_or_default();
                    tracing::warn!(
                        "Server error {}, body: '{}', retrying in {:?}... (attempt {}/{})",
                        status,
                        truncate(&body, 200),
                        delay,
                        attempt + 1,
                        self.max_retries
                    );
                }
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    let body = resp.text().await?;
                    return Ok(RawResponse { status, body });
                }
                Err(e) if !last_attempt => {
                    tracing::warn!(
                        "Request error: {}, retrying in {:?}... (attempt {}/{})",
                        e,
                        delay,
                        attempt + 1,
                        self.max_retries
                    );
                }
                Err(e) => return Err(e.into()),
            }

            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

#[async_trait]
impl LoginTransport for HttpClient {
    async fn post_json(
        &self,
        url: &str,
        body: &serde_json::Value,
        headers: HeaderMap,
    ) -> Result<RawResponse> {
        self.post_json_with_headers(url, body, headers).await
    }
}

/// Cut a string to at most `max` bytes on a char boundary
pub fn truncate(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}
