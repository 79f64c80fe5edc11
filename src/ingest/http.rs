// src/ingest/http.rs
use std::time::Duration;

use metrics::counter;
use reqwest::{Client, RequestBuilder, StatusCode};
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::ingest::types::FetchError;

/// Browser-like UA; Dacon serves an empty shell to unknown agents.
pub const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

#[derive(Debug, Clone)]
pub struct FetchPolicy {
    pub timeout: Duration,
    /// Total attempts per request (first try included).
    pub max_attempts: u8,
    pub base_backoff: Duration,
    /// Minimum gap between two outbound requests of one fetcher.
    pub min_spacing: Duration,
}

impl Default for FetchPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            max_attempts: 3,
            base_backoff: Duration::from_millis(500),
            min_spacing: Duration::from_millis(1000),
        }
    }
}

/// Basic-auth pair for sources that need it (Kaggle).
#[derive(Debug, Clone)]
pub struct BasicAuth {
    pub username: String,
    pub password: String,
}

/// Retrying, paced GET client shared by the adapters.
pub struct HttpFetcher {
    client: Client,
    policy: FetchPolicy,
    last_request: Mutex<Option<Instant>>,
}

impl HttpFetcher {
    pub fn new(policy: FetchPolicy) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(policy.timeout)
            .user_agent(BROWSER_USER_AGENT)
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()?;
        Ok(Self {
            client,
            policy,
            last_request: Mutex::new(None),
        })
    }

    pub fn policy(&self) -> &FetchPolicy {
        &self.policy
    }

    /// GET `url` and return the body. Transient failures (connect/timeout, 429, 5xx)
    /// are retried with exponential backoff; other statuses fail immediately.
    pub async fn get_text(
        &self,
        provider: &'static str,
        url: &str,
        auth: Option<&BasicAuth>,
    ) -> Result<String, FetchError> {
        let attempts = self.policy.max_attempts.max(1);
        let mut attempt: u8 = 0;
        loop {
            attempt += 1;
            self.pace().await;

            let mut req: RequestBuilder = self.client.get(url);
            if let Some(a) = auth {
                req = req.basic_auth(&a.username, Some(&a.password));
            }

            let last_error = match req.send().await {
                Ok(rsp) => {
                    let status = rsp.status();
                    if status.is_success() {
                        match rsp.text().await {
                            Ok(body) => return Ok(body),
                            Err(e) => format!("reading body: {e}"),
                        }
                    } else if is_transient_status(status) {
                        format!("HTTP {status}")
                    } else {
                        counter!("source_fetch_errors_total", "source" => provider).increment(1);
                        return Err(FetchError::Http {
                            provider,
                            status: status.as_u16(),
                            url: url.to_string(),
                        });
                    }
                }
                Err(e) => e.to_string(),
            };

            if attempt >= attempts {
                counter!("source_fetch_errors_total", "source" => provider).increment(1);
                return Err(FetchError::Exhausted {
                    provider,
                    url: url.to_string(),
                    attempts: attempt,
                    last_error,
                });
            }

            let wait = backoff(self.policy.base_backoff, attempt);
            tracing::debug!(
                provider,
                url,
                attempt,
                wait_ms = wait.as_millis() as u64,
                error = %last_error,
                "transient fetch failure, retrying"
            );
            counter!("source_fetch_retries_total", "source" => provider).increment(1);
            tokio::time::sleep(wait).await;
        }
    }

    async fn pace(&self) {
        let mut last = self.last_request.lock().await;
        if let Some(prev) = *last {
            let elapsed = prev.elapsed();
            if elapsed < self.policy.min_spacing {
                tokio::time::sleep(self.policy.min_spacing - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }
}

pub(crate) fn is_transient_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

/// `base << (attempt - 1)`, capped at 30s.
pub(crate) fn backoff(base: Duration, attempt: u8) -> Duration {
    let shift = u32::from(attempt.saturating_sub(1)).min(6);
    (base * (1u32 << shift)).min(Duration::from_secs(30))
}
