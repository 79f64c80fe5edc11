// src/ingest/mod.rs
pub mod http;
pub mod providers;
pub mod types;

use crate::ingest::types::{CompetitionRecord, FetchError, Source, SourceProvider};
use metrics::{counter, describe_counter, describe_gauge, describe_histogram};
use once_cell::sync::OnceCell;

/// One-time metrics registration (so series show up on /metrics).
pub(crate) fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!(
            "competitions_fetched_total",
            "Competition records parsed from sources."
        );
        describe_counter!(
            "competitions_skipped_total",
            "Source items skipped because they could not be parsed."
        );
        describe_counter!(
            "source_fetch_errors_total",
            "Source fetches that failed after retries."
        );
        describe_counter!(
            "source_fetch_retries_total",
            "Transient source request failures that were retried."
        );
        describe_counter!("notifications_sent_total", "Notifications delivered.");
        describe_counter!("notifications_failed_total", "Notifications that failed.");
        describe_counter!("cycles_total", "Completed poll cycles.");
        describe_counter!("cycle_failures_total", "Poll cycles that failed.");
        describe_histogram!("source_parse_ms", "Source payload parse time in milliseconds.");
        describe_gauge!("snapshot_records", "Records in the persisted snapshot.");
        describe_gauge!("last_cycle_ts", "Unix ts when the last cycle finished.");
    });
}

/// Normalize scraped text: decode entities, strip tags, collapse whitespace.
pub fn normalize_text(s: &str) -> String {
    // 1) HTML entity decode
    let mut out = html_escape::decode_html_entities(s).to_string();

    // 2) Strip HTML tags
    static RE_TAGS: OnceCell<regex::Regex> = OnceCell::new();
    let re_tags = RE_TAGS.get_or_init(|| regex::Regex::new(r"(?is)</?[^>]+>").unwrap());
    out = re_tags.replace_all(&out, "").to_string();

    // 3) Collapse whitespace (incl. NBSP)
    static RE_WS: OnceCell<regex::Regex> = OnceCell::new();
    let re_ws = RE_WS.get_or_init(|| regex::Regex::new(r"[\s\u{00A0}]+").unwrap());
    out = re_ws.replace_all(&out, " ").to_string();
    out = out.trim().to_string();

    // 4) Length cap: 500 chars
    if out.chars().count() > 500 {
        out = out.chars().take(500).collect();
    }

    out
}

/// Resolve a possibly relative link against `base`.
pub fn absolutize(base: &str, href: &str) -> Option<String> {
    let href = href.trim();
    if href.is_empty() {
        return None;
    }
    if href.starts_with("http://") || href.starts_with("https://") {
        return Some(href.to_string());
    }
    reqwest::Url::parse(base)
        .ok()?
        .join(href)
        .ok()
        .map(|u| u.to_string())
}

/// Result of fetching every source once.
#[derive(Debug, Default)]
pub struct FetchOutcome {
    /// Aggregated records in source-then-listing order.
    pub records: Vec<CompetitionRecord>,
    pub succeeded: Vec<Source>,
    pub failed: Vec<(Source, FetchError)>,
}

impl FetchOutcome {
    pub fn all_failed(&self) -> bool {
        self.succeeded.is_empty() && !self.failed.is_empty()
    }
}

/// Fetch each provider in order. A failing provider is logged and recorded in
/// `failed`; it never empties the other providers' contribution.
pub async fn fetch_all(providers: &[Box<dyn SourceProvider>]) -> FetchOutcome {
    ensure_metrics_described();

    let mut out = FetchOutcome::default();
    for p in providers {
        match p.fetch_latest().await {
            Ok(mut v) => {
                tracing::info!(provider = p.name(), count = v.len(), "source fetched");
                counter!("competitions_fetched_total", "source" => p.name())
                    .increment(v.len() as u64);
                out.records.append(&mut v);
                out.succeeded.push(p.source());
            }
            Err(e) => {
                tracing::warn!(error = %e, provider = p.name(), "source fetch failed");
                out.failed.push((p.source(), e));
            }
        }
    }
    out
}
