// src/notify/mod.rs
pub mod discord;
pub mod slack;

use std::time::Duration;

use chrono::{DateTime, Utc};
use metrics::counter;
use reqwest::Client;
use serde::Serialize;
use thiserror::Error;

use crate::ingest::http::{backoff, is_transient_status};
use crate::ingest::types::CompetitionRecord;

pub use discord::DiscordNotifier;
pub use slack::SlackNotifier;

/// One newly detected competition, consumed right away by the notifier.
#[derive(Debug, Clone)]
pub struct NotificationEvent {
    pub record: CompetitionRecord,
    pub detected_at: DateTime<Utc>,
}

impl NotificationEvent {
    pub fn new(record: CompetitionRecord, detected_at: DateTime<Utc>) -> Self {
        Self {
            record,
            detected_at,
        }
    }
}

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("{sink}: request failed after {attempts} attempts: {message}")]
    Transport {
        sink: &'static str,
        attempts: u8,
        message: String,
    },
    #[error("{sink}: HTTP {status}")]
    Http { sink: &'static str, status: u16 },
    #[error("{sink}: rejected: {reason}")]
    Rejected { sink: &'static str, reason: String },
    #[error("{failed} of {total} channels failed: {details}")]
    Partial {
        failed: usize,
        total: usize,
        details: String,
    },
    #[error("notifier client setup failed: {0}")]
    Client(#[from] reqwest::Error),
}

#[async_trait::async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, ev: &NotificationEvent) -> Result<(), NotifyError>;
    fn name(&self) -> &'static str;
}

/// Timeout/retry knobs shared by the HTTP notifiers.
#[derive(Debug, Clone)]
pub struct SendPolicy {
    pub timeout: Duration,
    pub max_attempts: u8,
    pub base_backoff: Duration,
}

impl Default for SendPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            max_attempts: 3,
            base_backoff: Duration::from_millis(500),
        }
    }
}

/// POST a JSON body, retrying transport errors, 429 and 5xx with backoff.
/// Returns the response body of the first 2xx answer.
pub(crate) async fn post_json_with_retry<B: Serialize + ?Sized>(
    sink: &'static str,
    client: &Client,
    url: &str,
    bearer: Option<&str>,
    body: &B,
    policy: &SendPolicy,
) -> Result<String, NotifyError> {
    let attempts = policy.max_attempts.max(1);
    let mut attempt: u8 = 0;
    loop {
        attempt += 1;
        let mut req = client.post(url).timeout(policy.timeout).json(body);
        if let Some(token) = bearer {
            req = req.bearer_auth(token);
        }

        let message = match req.send().await {
            Ok(rsp) => {
                let status = rsp.status();
                if status.is_success() {
                    return Ok(rsp.text().await.unwrap_or_default());
                }
                if !is_transient_status(status) {
                    return Err(NotifyError::Http {
                        sink,
                        status: status.as_u16(),
                    });
                }
                format!("HTTP {status}")
            }
            Err(e) => e.to_string(),
        };

        if attempt >= attempts {
            return Err(NotifyError::Transport {
                sink,
                attempts: attempt,
                message,
            });
        }
        tracing::debug!(sink, attempt, error = %message, "notification send failed, retrying");
        tokio::time::sleep(backoff(policy.base_backoff, attempt)).await;
    }
}

/// Fans one event out to every configured channel.
pub struct NotifierMux {
    sinks: Vec<Box<dyn Notifier>>,
}

impl NotifierMux {
    pub fn new(sinks: Vec<Box<dyn Notifier>>) -> Self {
        Self { sinks }
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }

    pub fn channel_names(&self) -> Vec<&'static str> {
        self.sinks.iter().map(|s| s.name()).collect()
    }
}

#[async_trait::async_trait]
impl Notifier for NotifierMux {
    async fn send(&self, ev: &NotificationEvent) -> Result<(), NotifyError> {
        if self.sinks.is_empty() {
            tracing::info!(
                id = %ev.record.id,
                title = %ev.record.title,
                source = %ev.record.source,
                url = %ev.record.url,
                "new competition (no notification channel configured)"
            );
            return Ok(());
        }

        let mut errors = Vec::new();
        for sink in &self.sinks {
            match sink.send(ev).await {
                Ok(()) => {
                    counter!("notifications_sent_total", "channel" => sink.name()).increment(1);
                }
                Err(e) => {
                    tracing::warn!(channel = sink.name(), id = %ev.record.id, error = %e, "channel send failed");
                    counter!("notifications_failed_total", "channel" => sink.name()).increment(1);
                    errors.push(e.to_string());
                }
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(NotifyError::Partial {
                failed: errors.len(),
                total: self.sinks.len(),
                details: errors.join("; "),
            })
        }
    }

    fn name(&self) -> &'static str {
        "mux"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::types::Source;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct Counting {
        fail: bool,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait::async_trait]
    impl Notifier for Counting {
        async fn send(&self, _ev: &NotificationEvent) -> Result<(), NotifyError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(NotifyError::Rejected {
                    sink: "counting",
                    reason: "nope".into(),
                })
            } else {
                Ok(())
            }
        }
        fn name(&self) -> &'static str {
            "counting"
        }
    }

    fn event() -> NotificationEvent {
        let rec = CompetitionRecord::new(Source::Kaggle, "1", "A".into(), "https://k/1".into());
        NotificationEvent::new(rec, Utc::now())
    }

    #[tokio::test]
    async fn one_failing_channel_does_not_skip_the_other() {
        let ok_calls = Arc::new(AtomicUsize::new(0));
        let bad_calls = Arc::new(AtomicUsize::new(0));
        let mux = NotifierMux::new(vec![
            Box::new(Counting {
                fail: true,
                calls: bad_calls.clone(),
            }),
            Box::new(Counting {
                fail: false,
                calls: ok_calls.clone(),
            }),
        ]);

        let err = mux.send(&event()).await.unwrap_err();
        assert!(matches!(err, NotifyError::Partial { failed: 1, total: 2, .. }));
        assert_eq!(bad_calls.load(Ordering::SeqCst), 1);
        assert_eq!(ok_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn empty_mux_only_logs() {
        let mux = NotifierMux::new(vec![]);
        assert!(mux.is_empty());
        mux.send(&event()).await.unwrap();
    }
}
