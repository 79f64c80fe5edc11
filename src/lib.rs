// src/lib.rs
// Public library surface for the binaries and integration tests.

pub mod config;
pub mod diff;
pub mod ingest;
pub mod metrics;
pub mod notify;
pub mod scheduler;
pub mod store;
pub mod telemetry;

// ---- Re-exports for stable public API ----
pub use crate::config::BotConfig;
pub use crate::ingest::types::{CompetitionRecord, FetchError, Source, SourceProvider};
pub use crate::notify::{NotificationEvent, Notifier, NotifierMux};
pub use crate::scheduler::{Clock, CycleReport, Scheduler, SystemClock};
pub use crate::store::{Snapshot, SnapshotStore};

use std::sync::Arc;

use crate::ingest::http::HttpFetcher;
use crate::ingest::providers::{dacon::DaconProvider, kaggle::KaggleProvider};
use crate::notify::{DiscordNotifier, SlackNotifier};

/// Channels configured in `cfg`; an empty mux only logs new competitions.
pub fn build_notifier(cfg: &BotConfig) -> NotifierMux {
    let mut sinks: Vec<Box<dyn Notifier>> = Vec::new();
    if let Some(token) = &cfg.slack_token {
        let mut slack = SlackNotifier::new(token.clone(), cfg.slack_channel.clone())
            .with_team_form(cfg.team_form_url.clone())
            .with_policy(cfg.send_policy());
        if let Some(base) = &cfg.slack_api_base {
            slack = slack.with_api_base(base.clone());
        }
        sinks.push(Box::new(slack));
    }
    if let Some(hook) = &cfg.discord_webhook_url {
        sinks.push(Box::new(
            DiscordNotifier::new(hook.clone()).with_policy(cfg.send_policy()),
        ));
    }
    NotifierMux::new(sinks)
}

/// Kaggle then Dacon, sharing one paced HTTP client.
pub fn build_providers(cfg: &BotConfig) -> anyhow::Result<Vec<Box<dyn SourceProvider>>> {
    let fetcher = Arc::new(HttpFetcher::new(cfg.fetch_policy())?);
    let auth = cfg.kaggle_auth();
    if auth.is_none() {
        tracing::warn!("no Kaggle credentials; Kaggle fetches will fail until configured");
    }
    Ok(vec![
        Box::new(
            KaggleProvider::new(fetcher.clone(), auth).with_image_lookup(cfg.kaggle_fetch_images),
        ),
        Box::new(DaconProvider::new(fetcher).with_period_lookup(cfg.dacon_fetch_periods)),
    ])
}

/// Wire the production scheduler from configuration.
pub fn build_scheduler(cfg: &BotConfig) -> anyhow::Result<Scheduler> {
    let notifier = build_notifier(cfg);
    if notifier.is_empty() {
        tracing::warn!("no SLACK_TOKEN or DISCORD_WEBHOOK_URL; new competitions are only logged");
    } else {
        tracing::info!(channels = ?notifier.channel_names(), "notification channels ready");
    }
    Ok(Scheduler::new(
        build_providers(cfg)?,
        SnapshotStore::new(&cfg.snapshot_path),
        Arc::new(notifier),
        Arc::new(SystemClock),
        cfg.scheduler_config(),
    ))
}
