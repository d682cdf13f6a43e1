use crate::config::MarketConfig;
use anyhow::{Context, Result};
use rand::Rng;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use std::time::Duration;
use thiserror::Error;
use tokio::time::sleep;
use tokio_retry::RetryIf;
use tokio_retry::strategy::{ExponentialBackoff, jitter};
use tracing::{debug, warn};
use url::Url;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request to {url} failed: {source}")]
    Request { url: String, source: reqwest::Error },

    #[error("HTTP {status} from {url}")]
    Status { url: String, status: StatusCode },

    #[error("unexpected payload from {url}: {source}")]
    Decode { url: String, source: serde_json::Error },
}

impl FetchError {
    /// Network failures, 429 and 5xx are worth another attempt; other 4xx are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::Request { .. } => true,
            FetchError::Status { status, .. } => {
                *status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
            }
            FetchError::Decode { .. } => false,
        }
    }
}

pub struct HttpClient {
    inner: reqwest::Client,
    config: MarketConfig,
}

impl HttpClient {
    pub fn new(config: &MarketConfig) -> Result<Self> {
        let inner = reqwest::Client::builder()
            .user_agent(&config.user_agent)
            .timeout(Duration::from_secs(config.timeout_secs))
            .gzip(true)
            // Accept cookies so session-based pages work
            .cookie_store(true)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            inner,
            config: config.clone(),
        })
    }

    /// Fetch a URL as text with rate-limiting and retry.
    pub async fn get_text(&self, url: &Url) -> Result<String, FetchError> {
        self.polite_delay().await;

        let strategy = ExponentialBackoff::from_millis(2)
            .factor(self.config.request_delay_ms.max(1))
            .max_delay(Duration::from_secs(30))
            .map(jitter)
            .take(self.config.max_retries as usize);

        RetryIf::spawn(
            strategy,
            || self.try_get_text(url),
            |e: &FetchError| {
                let retry = e.is_retryable();
                if retry {
                    warn!("{}, retrying", e);
                }
                retry
            },
        )
        .await
    }

    pub async fn get_json<T: DeserializeOwned>(&self, url: &Url) -> Result<T, FetchError> {
        let body = self.get_text(url).await?;
        serde_json::from_str(&body).map_err(|source| FetchError::Decode {
            url: url.to_string(),
            source,
        })
    }

    async fn try_get_text(&self, url: &Url) -> Result<String, FetchError> {
        debug!("GET {}", url);

        let resp = self
            .inner
            .get(url.as_str())
            .send()
            .await
            .map_err(|source| FetchError::Request {
                url: url.to_string(),
                source,
            })?;

        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status,
            });
        }

        resp.text().await.map_err(|source| FetchError::Request {
            url: url.to_string(),
            source,
        })
    }

    /// Sleep for the configured delay + random jitter.
    async fn polite_delay(&self) {
        let extra = rand::rng().random_range(0..=self.config.jitter_ms);
        let total = Duration::from_millis(self.config.request_delay_ms + extra);
        sleep(total).await;
    }
}
