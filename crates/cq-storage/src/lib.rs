//! Upstream HTTP fetching + persistent record storage.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

mod store;

#[cfg(any(test, feature = "test-utils"))]
pub mod memory;
#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use store::{PgRecordStore, RecordStore, StoreConfig, StoreError};

pub const CRATE_NAME: &str = "cq-storage";

/// Status the upstream uses to signal temporary overload.
pub const TRANSIENT_OVERLOAD_STATUS: u16 = 520;

#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: StatusCode,
    pub body: Vec<u8>,
}

/// A single GET round-trip. No retries happen at this level.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn get(&self, url: &Url) -> Result<RawResponse, FetchError>;
}

#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration, user_agent: Option<&str>) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(timeout);

        if let Some(user_agent) = user_agent {
            builder = builder.user_agent(user_agent.to_string());
        }

        let client = builder.build().context("building reqwest client")?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn get(&self, url: &Url) -> Result<RawResponse, FetchError> {
        // reqwest errors echo the request URL, which carries the credential.
        let resp = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(reqwest::Error::without_url)?;
        let status = resp.status();
        let body = resp
            .bytes()
            .await
            .map_err(reqwest::Error::without_url)?
            .to_vec();
        Ok(RawResponse { status, body })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    Retryable,
    NonRetryable,
}

/// Linear backoff on an explicit set of transient statuses.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub retry_statuses: Vec<u16>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
            retry_statuses: vec![TRANSIENT_OVERLOAD_STATUS],
        }
    }
}

impl RetryPolicy {
    pub fn classify(&self, status: StatusCode) -> RetryDisposition {
        if self.retry_statuses.contains(&status.as_u16()) {
            RetryDisposition::Retryable
        } else {
            RetryDisposition::NonRetryable
        }
    }

    /// Delay before retry number `attempt + 1`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(attempt.saturating_add(1))
    }
}

#[derive(Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
    pub concurrency: usize,
    pub retry: RetryPolicy,
    pub api_key: String,
}

impl fmt::Debug for HttpClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpClientConfig")
            .field("timeout", &self.timeout)
            .field("user_agent", &self.user_agent)
            .field("concurrency", &self.concurrency)
            .field("retry", &self.retry)
            .field("api_key", &"<redacted>")
            .finish()
    }
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            user_agent: None,
            concurrency: 5,
            retry: RetryPolicy::default(),
            api_key: String::new(),
        }
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("transport failure for {url}: {reason}")]
    Transport { url: String, reason: String },
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
    #[error("invalid json from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid url {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("fetcher has been shut down")]
    Closed,
}

/// Keyed JSON fetcher shared by every job in a run.
///
/// The in-flight bound applies across all callers, so nested worker pools
/// still respect the upstream's concurrency limit.
pub struct HttpFetcher {
    transport: Arc<dyn HttpTransport>,
    global_limit: Arc<Semaphore>,
    retry: RetryPolicy,
    api_key: String,
}

impl fmt::Debug for HttpFetcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpFetcher")
            .field("available_permits", &self.global_limit.available_permits())
            .field("retry", &self.retry)
            .field("api_key", &"<redacted>")
            .finish()
    }
}

impl HttpFetcher {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let transport = ReqwestTransport::new(config.timeout, config.user_agent.as_deref())?;
        Ok(Self::with_transport(Arc::new(transport), config))
    }

    pub fn with_transport(transport: Arc<dyn HttpTransport>, config: HttpClientConfig) -> Self {
        Self {
            transport,
            global_limit: Arc::new(Semaphore::new(config.concurrency.max(1))),
            retry: config.retry,
            api_key: config.api_key,
        }
    }

    /// Add the API credential (and `format=json` when absent) to `raw`.
    pub fn authorize(&self, raw: &str) -> Result<Url, FetchError> {
        let mut url = Url::parse(raw).map_err(|e| FetchError::InvalidUrl {
            url: raw.to_string(),
            reason: e.to_string(),
        })?;
        let (has_key, has_format) = url.query_pairs().fold((false, false), |(k, f), (name, _)| {
            (k || name == "api_key", f || name == "format")
        });
        {
            let mut pairs = url.query_pairs_mut();
            if !has_format {
                pairs.append_pair("format", "json");
            }
            if !has_key {
                pairs.append_pair("api_key", &self.api_key);
            }
        }
        Ok(url)
    }

    /// Fetch and decode `url`, retrying transient statuses with linear backoff.
    pub async fn try_fetch_json(&self, url: &str) -> Result<Value, FetchError> {
        let target = self.authorize(url)?;
        let mut attempt: u32 = 0;

        loop {
            debug!(url, attempt, "GET");
            let response = {
                let _permit = self
                    .global_limit
                    .acquire()
                    .await
                    .map_err(|_| FetchError::Closed)?;
                self.transport.get(&target).await?
            };

            if response.status.is_success() {
                return serde_json::from_slice(&response.body).map_err(|source| FetchError::Decode {
                    url: url.to_string(),
                    source,
                });
            }

            let status = response.status.as_u16();
            if self.retry.classify(response.status) == RetryDisposition::Retryable
                && attempt < self.retry.max_retries
            {
                let delay = self.retry.delay_for_attempt(attempt);
                warn!(
                    url,
                    status,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "transient upstream failure; retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
                continue;
            }

            return Err(FetchError::HttpStatus {
                status,
                url: url.to_string(),
            });
        }
    }

    /// Like [`HttpFetcher::try_fetch_json`], but failures are logged and
    /// reported as a missing payload.
    pub async fn fetch_json(&self, url: &str) -> Option<Value> {
        match self.try_fetch_json(url).await {
            Ok(value) => Some(value),
            Err(err) => {
                warn!(url, error = %err, "upstream fetch failed; treating payload as missing");
                None
            }
        }
    }
}
