//! Async HTTP client with retries for transient failures and a small TTL response cache.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use super::ApiError;

const DEFAULT_USER_AGENT: &str = "wsexport/0.1 (https://wikisource.org/wiki/Wikisource:WsExport)";
const DEFAULT_TIMEOUT_SECS: u64 = 60;
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;
const DEFAULT_CACHE_TTL_SECS: u64 = 300;
const MAX_REDIRECTS: usize = 10;

/// Default number of attempts for get_with_retry (initial plus retries).
const DEFAULT_RETRY_COUNT: u32 = 3;
/// Default backoff delays in seconds after each failed attempt.
const DEFAULT_BACKOFF_SECS: [u64; 2] = [1, 2];
/// Backoff for HTTP 429 (rate limit): wait longer so the server can recover.
const BACKOFF_429_SECS: [u64; 3] = [10, 30, 60];

#[derive(Debug)]
struct CachedBody {
    stored: Instant,
    body: String,
}

/// HTTP client shared by every request of an export.
///
/// Text responses (API JSON, page HTML) are cached in memory for `cache_ttl`;
/// binary downloads are not.
#[derive(Debug)]
pub struct PoliteClient {
    inner: reqwest::Client,
    retry_count: u32,
    backoff_secs: Vec<u64>,
    cache_ttl: Duration,
    cache: Mutex<HashMap<String, CachedBody>>,
}

impl PoliteClient {
    /// Client with default User-Agent, timeouts and retry policy.
    pub fn new() -> Result<Self, reqwest::Error> {
        Self::builder().build()
    }

    pub fn builder() -> PoliteClientBuilder {
        PoliteClientBuilder::default()
    }

    /// Perform a GET request with retries for transient failures.
    ///
    /// Retries on: timeout, connection errors, HTTP 5xx, and HTTP 429. Non-retryable
    /// errors (e.g. 4xx except 429) are returned immediately. After the last attempt
    /// the response is returned whatever its status.
    pub async fn get_with_retry(&self, url: &str) -> Result<reqwest::Response, reqwest::Error> {
        let mut attempt: u32 = 0;
        loop {
            let last_attempt = attempt + 1 >= self.retry_count;
            match self.inner.get(url).send().await {
                Ok(response) => {
                    let status = response.status();
                    let retryable = status.is_server_error() || status.as_u16() == 429;
                    if !retryable || last_attempt {
                        return Ok(response);
                    }
                    let backoff = if status.as_u16() == 429 {
                        pick_backoff(&BACKOFF_429_SECS, attempt)
                    } else {
                        pick_backoff(&self.backoff_secs, attempt)
                    };
                    warn!(url, status = status.as_u16(), backoff, "retrying request");
                    tokio::time::sleep(Duration::from_secs(backoff)).await;
                }
                Err(e) => {
                    let retryable = e.is_timeout() || e.is_connect();
                    if !retryable || last_attempt {
                        return Err(e);
                    }
                    let backoff = pick_backoff(&self.backoff_secs, attempt);
                    warn!(url, error = %e, backoff, "retrying request");
                    tokio::time::sleep(Duration::from_secs(backoff)).await;
                }
            }
            attempt += 1;
        }
    }

    /// GET a text body. Non-success statuses become [`ApiError::HttpStatus`].
    pub async fn get_text(&self, url: &str, context: &str) -> Result<String, ApiError> {
        if let Some(body) = self.cached(url) {
            debug!(url, "cache hit");
            return Ok(body);
        }
        let response = self.send(url, context).await?;
        let body = response.text().await.map_err(|source| ApiError::BodyRead {
            url: url.to_string(),
            source,
        })?;
        self.store(url, &body);
        Ok(body)
    }

    /// GET and decode a JSON body.
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        context: &str,
    ) -> Result<T, ApiError> {
        let body = self.get_text(url, context).await?;
        serde_json::from_str(&body).map_err(|e| ApiError::Malformed {
            url: url.to_string(),
            reason: e.to_string(),
        })
    }

    /// GET a binary body together with its `Content-Type`, bypassing the cache.
    pub async fn get_bytes(&self, url: &str) -> Result<(Vec<u8>, Option<String>), ApiError> {
        let response = self.send(url, "download").await?;
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let bytes = response.bytes().await.map_err(|source| ApiError::BodyRead {
            url: url.to_string(),
            source,
        })?;
        Ok((bytes.to_vec(), content_type))
    }

    async fn send(&self, url: &str, context: &str) -> Result<reqwest::Response, ApiError> {
        debug!(url, context, "GET");
        let response = self
            .get_with_retry(url)
            .await
            .map_err(|source| ApiError::Network {
                url: url.to_string(),
                source,
            })?;
        let status = response.status();
        if !status.is_success() {
            return Err(ApiError::HttpStatus {
                status: status.as_u16(),
                url: url.to_string(),
                context: Some(context.to_string()),
            });
        }
        Ok(response)
    }

    fn cached(&self, url: &str) -> Option<String> {
        if self.cache_ttl.is_zero() {
            return None;
        }
        let mut cache = self.cache.lock();
        match cache.get(url) {
            Some(entry) if entry.stored.elapsed() < self.cache_ttl => Some(entry.body.clone()),
            Some(_) => {
                cache.remove(url);
                None
            }
            None => None,
        }
    }

    fn store(&self, url: &str, body: &str) {
        if self.cache_ttl.is_zero() {
            return;
        }
        self.cache.lock().insert(
            url.to_string(),
            CachedBody {
                stored: Instant::now(),
                body: body.to_string(),
            },
        );
    }
}

fn pick_backoff(table: &[u64], attempt: u32) -> u64 {
    table
        .get(attempt as usize)
        .or_else(|| table.last())
        .copied()
        .unwrap_or(1)
}

/// Builder for PoliteClient with optional User-Agent, timeouts, retry and cache settings.
#[derive(Debug)]
pub struct PoliteClientBuilder {
    user_agent: Option<String>,
    timeout_secs: u64,
    connect_timeout_secs: u64,
    retry_count: u32,
    retry_backoff_secs: Vec<u64>,
    cache_ttl_secs: u64,
}

impl Default for PoliteClientBuilder {
    fn default() -> Self {
        Self {
            user_agent: None,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
            retry_count: DEFAULT_RETRY_COUNT,
            retry_backoff_secs: DEFAULT_BACKOFF_SECS.to_vec(),
            cache_ttl_secs: DEFAULT_CACHE_TTL_SECS,
        }
    }
}

impl PoliteClientBuilder {
    /// Set a custom User-Agent. Wikimedia asks for one that identifies the tool.
    pub fn user_agent(mut self, ua: impl Into<String>) -> Self {
        self.user_agent = Some(ua.into());
        self
    }

    /// Total request timeout in seconds. Default 60.
    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    /// Connect timeout in seconds. Default 10.
    pub fn connect_timeout_secs(mut self, secs: u64) -> Self {
        self.connect_timeout_secs = secs;
        self
    }

    /// Number of HTTP attempts for transient failures (default 3).
    pub fn retry_count(mut self, n: u32) -> Self {
        self.retry_count = n.max(1);
        self
    }

    /// Backoff delays in seconds before each retry. If shorter than needed, the last value is reused.
    pub fn retry_backoff_secs(mut self, secs: Vec<u64>) -> Self {
        self.retry_backoff_secs = secs;
        self
    }

    /// How long text responses stay cached. 0 disables the cache.
    pub fn cache_ttl_secs(mut self, secs: u64) -> Self {
        self.cache_ttl_secs = secs;
        self
    }

    pub fn build(self) -> Result<PoliteClient, reqwest::Error> {
        let user_agent = self
            .user_agent
            .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string());
        let inner = reqwest::Client::builder()
            .user_agent(user_agent)
            .timeout(Duration::from_secs(self.timeout_secs))
            .connect_timeout(Duration::from_secs(self.connect_timeout_secs))
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .build()?;
        let backoff_secs = if self.retry_backoff_secs.is_empty() {
            let n = self.retry_count.saturating_sub(1) as usize;
            (0..n).map(|i| 1u64 << i.min(4)).collect::<Vec<_>>()
        } else {
            self.retry_backoff_secs
        };
        Ok(PoliteClient {
            inner,
            retry_count: self.retry_count,
            backoff_secs,
            cache_ttl: Duration::from_secs(self.cache_ttl_secs),
            cache: Mutex::new(HashMap::new()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_reuses_last_value() {
        assert_eq!(pick_backoff(&[1, 2], 0), 1);
        assert_eq!(pick_backoff(&[1, 2], 5), 2);
        assert_eq!(pick_backoff(&[], 3), 1);
    }

    #[test]
    fn cache_returns_fresh_entries_only() {
        let client = PoliteClient::builder().cache_ttl_secs(60).build().unwrap();
        assert!(client.cached("https://example.org/a").is_none());
        client.store("https://example.org/a", "body");
        assert_eq!(client.cached("https://example.org/a").as_deref(), Some("body"));

        let uncached = PoliteClient::builder().cache_ttl_secs(0).build().unwrap();
        uncached.store("https://example.org/a", "body");
        assert!(uncached.cached("https://example.org/a").is_none());
    }

    #[test]
    fn builder_clamps_retry_count() {
        let client = PoliteClient::builder().retry_count(0).build().unwrap();
        assert_eq!(client.retry_count, 1);
    }
}
