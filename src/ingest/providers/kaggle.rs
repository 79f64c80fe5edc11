// src/ingest/providers/kaggle.rs
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use metrics::{counter, histogram};
use scraper::{Html, Selector};
use serde::Deserialize;

use crate::ingest::absolutize;
use crate::ingest::http::{BasicAuth, HttpFetcher};
use crate::ingest::types::{CompetitionRecord, FetchError, Source, SourceProvider};

pub const KAGGLE_BASE: &str = "https://www.kaggle.com";
pub const KAGGLE_LIST_URL: &str = "https://www.kaggle.com/api/v1/competitions/list";

const PROVIDER: &str = "Kaggle";

/// One item of the competitions list endpoint. Only the fields we use.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct KaggleCompetition {
    #[serde(default)]
    id: Option<u64>,
    #[serde(rename = "ref")]
    reference: String,
    title: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    deadline: Option<String>,
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    reward: Option<serde_json::Value>,
}

/// `~/.kaggle/kaggle.json`, as written by the official CLI.
#[derive(Debug, Deserialize)]
struct KaggleJson {
    username: String,
    key: String,
}

/// Resolve credentials: explicit pair first, then `$KAGGLE_CONFIG_DIR/kaggle.json`,
/// then `~/.kaggle/kaggle.json`.
pub fn resolve_credentials(username: Option<String>, key: Option<String>) -> Option<BasicAuth> {
    if let (Some(u), Some(k)) = (username, key) {
        if !u.trim().is_empty() && !k.trim().is_empty() {
            return Some(BasicAuth {
                username: u,
                password: k,
            });
        }
    }
    let dir = std::env::var("KAGGLE_CONFIG_DIR")
        .map(PathBuf::from)
        .ok()
        .or_else(|| std::env::var("HOME").ok().map(|h| Path::new(&h).join(".kaggle")))?;
    match load_kaggle_json(&dir.join("kaggle.json")) {
        Ok(auth) => Some(auth),
        Err(e) => {
            tracing::debug!(error = %e, "no usable kaggle.json");
            None
        }
    }
}

pub fn load_kaggle_json(path: &Path) -> Result<BasicAuth> {
    let s = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    let v: KaggleJson = serde_json::from_str(&s).context("parsing kaggle.json")?;
    Ok(BasicAuth {
        username: v.username,
        password: v.key,
    })
}

pub struct KaggleProvider {
    mode: Mode,
}

enum Mode {
    Fixture(String),
    Http {
        fetcher: Arc<HttpFetcher>,
        auth: Option<BasicAuth>,
        list_url: String,
        fetch_images: bool,
    },
}

impl KaggleProvider {
    pub fn from_fixture(s: &str) -> Self {
        Self {
            mode: Mode::Fixture(s.to_string()),
        }
    }

    pub fn new(fetcher: Arc<HttpFetcher>, auth: Option<BasicAuth>) -> Self {
        Self {
            mode: Mode::Http {
                fetcher,
                auth,
                list_url: KAGGLE_LIST_URL.to_string(),
                fetch_images: false,
            },
        }
    }

    pub fn with_list_url(mut self, url: impl Into<String>) -> Self {
        if let Mode::Http { list_url, .. } = &mut self.mode {
            *list_url = url.into();
        }
        self
    }

    /// Also visit each competition page to pick a thumbnail (one extra request per item).
    pub fn with_image_lookup(mut self, enabled: bool) -> Self {
        if let Mode::Http { fetch_images, .. } = &mut self.mode {
            *fetch_images = enabled;
        }
        self
    }

    async fn attach_images(&self, fetcher: &HttpFetcher, records: &mut [CompetitionRecord]) {
        for rec in records.iter_mut() {
            match fetcher.get_text(PROVIDER, &rec.url, None).await {
                Ok(html) => {
                    rec.image_url = extract_page_image(&html, KAGGLE_BASE);
                    if rec.image_url.is_none() {
                        tracing::debug!(id = %rec.id, "no image on competition page");
                    }
                }
                Err(e) => tracing::warn!(id = %rec.id, error = %e, "competition page lookup failed"),
            }
        }
    }
}

#[async_trait]
impl SourceProvider for KaggleProvider {
    async fn fetch_latest(&self) -> Result<Vec<CompetitionRecord>, FetchError> {
        let now = Utc::now();
        match &self.mode {
            Mode::Fixture(s) => parse_listing(s, now),
            Mode::Http {
                fetcher,
                auth,
                list_url,
                fetch_images,
            } => {
                let Some(auth) = auth else {
                    return Err(FetchError::Credentials {
                        provider: PROVIDER,
                        hint: "set KAGGLE_USERNAME/KAGGLE_KEY or ~/.kaggle/kaggle.json".into(),
                    });
                };
                let body = fetcher.get_text(PROVIDER, list_url, Some(auth)).await?;
                let mut records = parse_listing(&body, now)?;
                if *fetch_images {
                    self.attach_images(fetcher, &mut records).await;
                }
                Ok(records)
            }
        }
    }

    fn name(&self) -> &'static str {
        PROVIDER
    }

    fn source(&self) -> Source {
        Source::Kaggle
    }
}

/// Parse the list payload. The array itself must be valid JSON; individual
/// malformed items are skipped. Competitions past their deadline are dropped.
pub fn parse_listing(body: &str, now: DateTime<Utc>) -> Result<Vec<CompetitionRecord>, FetchError> {
    let t0 = std::time::Instant::now();
    let items: Vec<serde_json::Value> =
        serde_json::from_str(body).map_err(|e| FetchError::Payload {
            provider: PROVIDER,
            reason: e.to_string(),
        })?;

    let mut out = Vec::with_capacity(items.len());
    for raw in items {
        match parse_item(raw, now) {
            Ok(Some(rec)) => out.push(rec),
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(provider = PROVIDER, error = %e, "skipping unparseable item");
                counter!("competitions_skipped_total", "source" => PROVIDER).increment(1);
            }
        }
    }

    let ms = t0.elapsed().as_secs_f64() * 1_000.0;
    histogram!("source_parse_ms", "source" => PROVIDER).record(ms);
    Ok(out)
}

fn parse_item(raw: serde_json::Value, now: DateTime<Utc>) -> Result<Option<CompetitionRecord>> {
    let c: KaggleCompetition = serde_json::from_value(raw).context("decoding competition")?;
    if c.title.trim().is_empty() {
        return Err(anyhow!("competition {} has no title", c.reference));
    }

    let deadline = match c.deadline.as_deref() {
        Some(d) => Some(parse_deadline(d).ok_or_else(|| anyhow!("bad deadline {d:?}"))?),
        None => None,
    };
    if deadline.is_some_and(|d| d <= now) {
        return Ok(None);
    }

    let (slug, url) = split_reference(&c.reference)?;
    let native_id = c.id.map(|n| n.to_string()).unwrap_or(slug);

    let mut rec = CompetitionRecord::new(Source::Kaggle, &native_id, c.title.trim().to_string(), url);
    rec.deadline = deadline;
    rec = rec
        .with_meta("category", c.category.unwrap_or_default())
        .with_meta("reward", c.reward.as_ref().map(format_reward).unwrap_or_default())
        .with_meta(
            "description",
            crate::ingest::normalize_text(c.description.as_deref().unwrap_or_default()),
        );
    Ok(Some(rec))
}

/// `ref` is either a slug (`titanic`) or a full competition URL.
fn split_reference(reference: &str) -> Result<(String, String)> {
    let r = reference.trim().trim_end_matches('/');
    if r.is_empty() {
        return Err(anyhow!("empty ref"));
    }
    if r.starts_with("http://") || r.starts_with("https://") {
        let slug = r.rsplit('/').next().unwrap_or(r).to_string();
        Ok((slug, r.to_string()))
    } else {
        Ok((r.to_string(), format!("{KAGGLE_BASE}/competitions/{r}")))
    }
}

fn parse_deadline(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%d %H:%M:%S UTC"]
        .iter()
        .find_map(|f| NaiveDateTime::parse_from_str(s, f).ok())
        .map(|n| n.and_utc())
}

fn format_reward(v: &serde_json::Value) -> String {
    match v {
        serde_json::Value::Number(n) => format!("${n}"),
        serde_json::Value::String(s) => {
            let t = s.trim();
            if !t.is_empty() && t.chars().all(|c| c.is_ascii_digit() || c == ',') {
                format!("${t}")
            } else {
                t.to_string()
            }
        }
        _ => String::new(),
    }
}

/// Pick a thumbnail from a competition page: OpenGraph first, then the logo,
/// the header image, and finally any lazy-loaded image.
pub fn extract_page_image(html: &str, base: &str) -> Option<String> {
    let doc = Html::parse_document(html);
    let candidates: [(&str, &str); 4] = [
        ("meta[property='og:image']", "content"),
        ("img.competition-logo", "src"),
        ("img.competition-header", "src"),
        ("img[data-src]", "data-src"),
    ];
    candidates.iter().find_map(|(sel, attr)| {
        let selector = Selector::parse(sel).ok()?;
        doc.select(&selector)
            .filter_map(|el| el.value().attr(attr))
            .find(|v| !v.trim().is_empty())
            .and_then(|v| absolutize(base, v))
    })
}
