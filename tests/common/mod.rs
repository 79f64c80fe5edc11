// tests/common/mod.rs
#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use contest_notify_bot::ingest::types::{CompetitionRecord, FetchError, Source, SourceProvider};
use contest_notify_bot::notify::{NotificationEvent, Notifier, NotifyError};
use contest_notify_bot::scheduler::Clock;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

// ---------- canned HTTP server ----------

/// Serves `responses` in order (the last one repeats) and records request bodies.
pub struct CannedServer {
    pub base: String,
    pub hits: Arc<AtomicUsize>,
    pub requests: Arc<Mutex<Vec<String>>>,
}

impl CannedServer {
    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

pub async fn spawn_canned(responses: Vec<(u16, &'static str)>) -> CannedServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let hits = Arc::new(AtomicUsize::new(0));
    let requests = Arc::new(Mutex::new(Vec::new()));

    let (h, r) = (hits.clone(), requests.clone());
    tokio::spawn(async move {
        loop {
            let Ok((mut sock, _)) = listener.accept().await else {
                return;
            };
            let i = h.fetch_add(1, Ordering::SeqCst);
            let (status, body) = responses[i.min(responses.len() - 1)];
            let raw = read_request(&mut sock).await;
            r.lock().unwrap().push(raw);
            let rsp = format!(
                "HTTP/1.1 {status} Canned\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            let _ = sock.write_all(rsp.as_bytes()).await;
            let _ = sock.shutdown().await;
        }
    });

    CannedServer {
        base: format!("http://{addr}"),
        hits,
        requests,
    }
}

async fn read_request(sock: &mut tokio::net::TcpStream) -> String {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        let n = match sock.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => n,
        };
        buf.extend_from_slice(&chunk[..n]);
        let text = String::from_utf8_lossy(&buf).to_string();
        if let Some(end) = text.find("\r\n\r\n") {
            let content_length = text[..end]
                .lines()
                .find_map(|l| {
                    let (k, v) = l.split_once(':')?;
                    k.eq_ignore_ascii_case("content-length")
                        .then(|| v.trim().parse::<usize>().ok())
                        .flatten()
                })
                .unwrap_or(0);
            if buf.len() >= end + 4 + content_length {
                break;
            }
        }
    }
    String::from_utf8_lossy(&buf).to_string()
}

// ---------- fake clock ----------

pub struct ManualClock {
    now: DateTime<Utc>,
    pub sleeps: Mutex<Vec<Duration>>,
}

impl ManualClock {
    pub fn at(now: DateTime<Utc>) -> Self {
        Self {
            now,
            sleeps: Mutex::new(Vec::new()),
        }
    }

    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().unwrap().clone()
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        self.now
    }

    async fn sleep(&self, d: Duration) {
        self.sleeps.lock().unwrap().push(d);
        tokio::task::yield_now().await;
    }
}

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap()
}

// ---------- providers ----------

pub fn rec(source: Source, native_id: &str, title: &str) -> CompetitionRecord {
    CompetitionRecord::new(
        source,
        native_id,
        title.to_string(),
        format!("https://example.test/{}/{native_id}", source.id_prefix()),
    )
}

/// Returns a fixed list, or a fetch error when `records` is `None`.
pub struct StaticProvider {
    pub source: Source,
    pub records: Option<Vec<CompetitionRecord>>,
    pub calls: Arc<AtomicUsize>,
}

impl StaticProvider {
    pub fn ok(source: Source, records: Vec<CompetitionRecord>) -> Self {
        Self {
            source,
            records: Some(records),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn failing(source: Source) -> Self {
        Self {
            source,
            records: None,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }
}

#[async_trait]
impl SourceProvider for StaticProvider {
    async fn fetch_latest(&self) -> Result<Vec<CompetitionRecord>, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.records {
            Some(v) => Ok(v.clone()),
            None => Err(FetchError::Exhausted {
                provider: "static",
                url: "http://unreachable.test".into(),
                attempts: 3,
                last_error: "connection refused".into(),
            }),
        }
    }

    fn name(&self) -> &'static str {
        self.source.display_name()
    }

    fn source(&self) -> Source {
        self.source
    }
}

/// Panics on fetch; used to check the loop survives a crashing cycle.
pub struct PanickingProvider;

#[async_trait]
impl SourceProvider for PanickingProvider {
    async fn fetch_latest(&self) -> Result<Vec<CompetitionRecord>, FetchError> {
        panic!("provider blew up");
    }

    fn name(&self) -> &'static str {
        "panicking"
    }

    fn source(&self) -> Source {
        Source::Dacon
    }
}

// ---------- notifier ----------

/// Records every id it was asked to send; fails for ids in `fail_ids`.
#[derive(Default)]
pub struct RecordingNotifier {
    pub fail_ids: Vec<String>,
    pub attempted: Mutex<Vec<String>>,
    pub delivered: Mutex<Vec<String>>,
}

impl RecordingNotifier {
    pub fn failing_for(ids: &[&str]) -> Self {
        Self {
            fail_ids: ids.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    pub fn attempted(&self) -> Vec<String> {
        self.attempted.lock().unwrap().clone()
    }

    pub fn delivered(&self) -> Vec<String> {
        self.delivered.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, ev: &NotificationEvent) -> Result<(), NotifyError> {
        let id = ev.record.id.clone();
        self.attempted.lock().unwrap().push(id.clone());
        if self.fail_ids.contains(&id) {
            return Err(NotifyError::Rejected {
                sink: "recording",
                reason: "channel_not_found".into(),
            });
        }
        self.delivered.lock().unwrap().push(id);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "recording"
    }
}
