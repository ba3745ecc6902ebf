//! Client for the external payment processor.
//!
//! The processor is the single source of truth for whether an on-chain
//! payment went through. Transient failures (transport errors, 429, 5xx)
//! are retried a bounded number of times with equal-jitter backoff; a
//! timeout is never treated as success.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::warn;
use url::Url;

#[derive(Error, Debug)]
pub enum ProcessorError {
    #[error("processor request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("processor returned {status}: {body}")]
    Failed {
        status: reqwest::StatusCode,
        body: String,
    },
    #[error("invalid processor URL: {0}")]
    Url(#[from] url::ParseError),
}

#[derive(Clone, Debug)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(250),
            max_backoff: Duration::from_secs(2),
        }
    }
}

/// The processor's authoritative view of one transaction.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ProcessorTransaction {
    pub transaction_status: Option<String>,
    pub reference: Option<String>,
    pub token: Option<String>,
    pub amount: Option<String>,
    pub wallet_address: Option<String>,
    #[serde(default)]
    pub tournament_id: Option<String>,
    /// Unix milliseconds, unix seconds, or an RFC 3339 string.
    #[serde(default)]
    pub created_at: Option<serde_json::Value>,
}

impl ProcessorTransaction {
    pub fn is_failed(&self) -> bool {
        matches!(self.transaction_status.as_deref(), Some("failed"))
    }

    /// Transaction creation time in unix milliseconds, when the processor
    /// reported one in a recognizable form.
    pub fn created_at_ms(&self) -> Option<u64> {
        match self.created_at.as_ref()? {
            serde_json::Value::Number(n) => {
                let raw = n.as_u64()?;
                // Heuristic: values before ~2001 in ms are actually seconds.
                Some(if raw < 1_000_000_000_000 { raw * 1000 } else { raw })
            }
            serde_json::Value::String(s) => chrono::DateTime::parse_from_rfc3339(s)
                .ok()
                .map(|dt| dt.timestamp_millis().max(0) as u64),
            _ => None,
        }
    }
}

#[derive(Clone)]
pub struct ProcessorClient {
    http: reqwest::Client,
    base_url: Url,
    app_id: String,
    api_key: Option<String>,
    retry: RetryPolicy,
}

impl ProcessorClient {
    pub fn new(
        base_url: &str,
        app_id: String,
        api_key: Option<String>,
    ) -> Result<Self, ProcessorError> {
        Ok(Self {
            http: reqwest::Client::new(),
            base_url: Url::parse(base_url)?,
            app_id,
            api_key,
            retry: RetryPolicy::default(),
        })
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Fetches the authoritative status for `transaction_id`.
    pub async fn transaction_status(
        &self,
        transaction_id: &str,
    ) -> Result<ProcessorTransaction, ProcessorError> {
        let mut url = self.base_url.join(&format!("transaction/{transaction_id}"))?;
        url.query_pairs_mut().append_pair("app_id", &self.app_id);

        let mut backoff = self.retry.initial_backoff;
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let mut request = self.http.get(url.clone());
            if let Some(api_key) = self.api_key.as_deref() {
                request = request.bearer_auth(api_key);
            }

            match request.send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return Ok(response.json::<ProcessorTransaction>().await?);
                    }
                    let retryable = status.is_server_error()
                        || status == reqwest::StatusCode::TOO_MANY_REQUESTS;
                    if !retryable || attempt >= self.retry.max_attempts {
                        let body = response.text().await.unwrap_or_default();
                        return Err(ProcessorError::Failed { status, body });
                    }
                    warn!(
                        %status,
                        attempt,
                        transaction_id,
                        "processor returned retryable status"
                    );
                }
                Err(err) => {
                    if attempt >= self.retry.max_attempts {
                        return Err(err.into());
                    }
                    warn!(attempt, transaction_id, "processor request error: {err}");
                }
            }

            tokio::time::sleep(jittered(backoff)).await;
            backoff = (backoff * 2).min(self.retry.max_backoff);
        }
    }
}

/// "Equal jitter": delay is in [backoff/2, backoff].
fn jittered(backoff: Duration) -> Duration {
    let backoff_ms = backoff.as_millis() as u64;
    if backoff_ms <= 1 {
        return backoff;
    }
    let half_ms = backoff_ms / 2;
    let jitter_ms = rand::thread_rng().gen_range(0..=half_ms);
    Duration::from_millis(half_ms.saturating_add(jitter_ms))
}
