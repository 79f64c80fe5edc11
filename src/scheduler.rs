//! Poll loop: fetch → diff → notify → persist, once immediately and then on a
//! fixed interval. A failed cycle is logged and retried after `failure_wait`;
//! nothing inside a cycle can stop the loop.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use metrics::{counter, gauge};
use thiserror::Error;
use tracing::Instrument;

use crate::diff::diff;
use crate::ingest::fetch_all;
use crate::ingest::types::{Source, SourceProvider};
use crate::notify::{NotificationEvent, Notifier};
use crate::store::{Snapshot, SnapshotStore};

/// Time source for the loop; tests swap in a clock that does not really sleep.
#[async_trait::async_trait]
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
    async fn sleep(&self, d: Duration);
}

pub struct SystemClock;

#[async_trait::async_trait]
impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    async fn sleep(&self, d: Duration) {
        tokio::time::sleep(d).await;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CyclePhase {
    Idle,
    Fetching,
    Diffing,
    Notifying,
    Persisting,
    FailedCycle,
}

impl CyclePhase {
    pub fn as_str(self) -> &'static str {
        match self {
            CyclePhase::Idle => "idle",
            CyclePhase::Fetching => "fetching",
            CyclePhase::Diffing => "diffing",
            CyclePhase::Notifying => "notifying",
            CyclePhase::Persisting => "persisting",
            CyclePhase::FailedCycle => "failed_cycle",
        }
    }
}

impl fmt::Display for CyclePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub interval: Duration,
    pub failure_wait: Duration,
    /// How long past its deadline a record stays in the snapshot.
    pub retention: chrono::Duration,
    /// Seed the snapshot without notifying when no snapshot file exists yet.
    pub silent_first_run: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            failure_wait: Duration::from_secs(60),
            retention: chrono::Duration::days(7),
            silent_first_run: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub cycle: u64,
    pub fetched: usize,
    /// Ids of newly detected competitions, in fetch order.
    pub new_ids: Vec<String>,
    pub notified: usize,
    pub notify_failed: usize,
    pub failed_sources: Vec<Source>,
    /// New records were recorded without notifying (first run seeding).
    pub silent: bool,
    pub persisted: bool,
    pub snapshot_size: usize,
}

#[derive(Debug, Error)]
pub enum CycleError {
    #[error("every source failed: {0}")]
    AllSourcesFailed(String),
    #[error("cycle aborted during {phase}: {reason}")]
    Aborted { phase: CyclePhase, reason: String },
}

struct Inner {
    providers: Vec<Box<dyn SourceProvider>>,
    store: SnapshotStore,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    cfg: SchedulerConfig,
    cycles: AtomicU64,
    phase: Mutex<CyclePhase>,
}

/// Cheap to clone; clones share providers, store and counters.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

impl Scheduler {
    pub fn new(
        providers: Vec<Box<dyn SourceProvider>>,
        store: SnapshotStore,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
        cfg: SchedulerConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                providers,
                store,
                notifier,
                clock,
                cfg,
                cycles: AtomicU64::new(0),
                phase: Mutex::new(CyclePhase::Idle),
            }),
        }
    }

    pub fn phase(&self) -> CyclePhase {
        self.inner
            .phase
            .lock()
            .map(|p| *p)
            .unwrap_or(CyclePhase::FailedCycle)
    }

    fn set_phase(&self, phase: CyclePhase) {
        if let Ok(mut p) = self.inner.phase.lock() {
            *p = phase;
        }
        tracing::debug!(phase = %phase, "phase");
    }

    /// Run one full cycle. Source, notification and write failures are
    /// absorbed into the report; only "no source answered" fails the cycle.
    pub async fn run_cycle(&self) -> Result<CycleReport, CycleError> {
        let n = self.inner.cycles.fetch_add(1, Ordering::SeqCst) + 1;
        let span = tracing::info_span!("cycle", n);
        self.cycle(n).instrument(span).await
    }

    async fn cycle(&self, n: u64) -> Result<CycleReport, CycleError> {
        let inner = &self.inner;
        let mut report = CycleReport {
            cycle: n,
            ..Default::default()
        };

        self.set_phase(CyclePhase::Fetching);
        let outcome = fetch_all(&inner.providers).await;
        report.fetched = outcome.records.len();
        report.failed_sources = outcome.failed.iter().map(|(s, _)| *s).collect();
        if outcome.all_failed() {
            let why = outcome
                .failed
                .iter()
                .map(|(_, e)| e.to_string())
                .collect::<Vec<_>>()
                .join("; ");
            return Err(CycleError::AllSourcesFailed(why));
        }

        self.set_phase(CyclePhase::Diffing);
        let (previous, had_snapshot) = match inner.store.read().await {
            Ok(Some(s)) => (s, true),
            Ok(None) => (Snapshot::default(), false),
            Err(e) => {
                tracing::warn!(error = %e, "snapshot unreadable, diffing against empty");
                (Snapshot::default(), true)
            }
        };
        let fresh = diff(&previous, &outcome.records);
        report.new_ids = fresh.iter().map(|r| r.id.clone()).collect();

        self.set_phase(CyclePhase::Notifying);
        let now = inner.clock.now();
        report.silent = !had_snapshot && inner.cfg.silent_first_run;
        if report.silent {
            tracing::info!(count = fresh.len(), "first run: seeding snapshot without notifying");
        } else {
            for rec in fresh {
                let id = rec.id.clone();
                match inner.notifier.send(&NotificationEvent::new(rec, now)).await {
                    Ok(()) => report.notified += 1,
                    Err(e) => {
                        report.notify_failed += 1;
                        tracing::warn!(id = %id, error = %e, "notification failed, continuing");
                    }
                }
            }
        }

        self.set_phase(CyclePhase::Persisting);
        let next = previous
            .prune_expired(now, inner.cfg.retention)
            .merge(&outcome.records, now);
        report.snapshot_size = next.len();
        match inner.store.save(&next).await {
            Ok(()) => {
                report.persisted = true;
                gauge!("snapshot_records").set(next.len() as f64);
            }
            Err(e) => {
                tracing::error!(error = %e, "snapshot save failed; next cycle diffs against the old one");
            }
        }

        self.set_phase(CyclePhase::Idle);
        Ok(report)
    }

    /// Run cycles until `max_cycles` have completed (`None`: forever).
    /// Each cycle runs in its own task so a panic is contained like any
    /// other cycle failure. Returns the number of cycles run.
    pub async fn run_for(&self, max_cycles: Option<usize>) -> usize {
        let mut done = 0usize;
        loop {
            let this = self.clone();
            let result = match tokio::spawn(async move { this.run_cycle().await }).await {
                Ok(r) => r,
                Err(join) => Err(CycleError::Aborted {
                    phase: self.phase(),
                    reason: join.to_string(),
                }),
            };
            done += 1;

            let wait = match result {
                Ok(report) => {
                    counter!("cycles_total").increment(1);
                    gauge!("last_cycle_ts").set(self.inner.clock.now().timestamp() as f64);
                    tracing::info!(
                        cycle = report.cycle,
                        fetched = report.fetched,
                        new = report.new_ids.len(),
                        notified = report.notified,
                        notify_failed = report.notify_failed,
                        failed_sources = report.failed_sources.len(),
                        persisted = report.persisted,
                        snapshot = report.snapshot_size,
                        "cycle finished"
                    );
                    self.inner.cfg.interval
                }
                Err(e) => {
                    counter!("cycle_failures_total").increment(1);
                    self.set_phase(CyclePhase::FailedCycle);
                    tracing::error!(phase = %CyclePhase::FailedCycle, error = %e, "cycle failed");
                    self.set_phase(CyclePhase::Idle);
                    self.inner.cfg.failure_wait
                }
            };

            if max_cycles.is_some_and(|m| done >= m) {
                return done;
            }
            self.inner.clock.sleep(wait).await;
        }
    }

    /// Run until the process is stopped.
    pub async fn run(&self) {
        self.run_for(None).await;
    }
}
