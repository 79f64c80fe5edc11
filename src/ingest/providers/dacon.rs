// src/ingest/providers/dacon.rs
use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use metrics::{counter, histogram};
use once_cell::sync::{Lazy, OnceCell};
use regex::Regex;
use scraper::{ElementRef, Html, Selector};

use crate::ingest::http::HttpFetcher;
use crate::ingest::types::{CompetitionRecord, FetchError, Source, SourceProvider};
use crate::ingest::{absolutize, normalize_text};

pub const DACON_BASE: &str = "https://dacon.io";
pub const DACON_LIST_URL: &str = "https://dacon.io/competitions";

const PROVIDER: &str = "Dacon";

/// Status badge of a card that is still accepting participants.
pub const OPEN_STATUS_MARKER: &str = "참가신청중";
/// Label in front of the period line on the schedule page.
pub const PERIOD_LABEL: &str = "대회 기간 :";

struct Selectors {
    card: Selector,
    status: Selector,
    name: Selector,
    keyword: Selector,
    link: Selector,
    image: Selector,
}

static SELECTORS: Lazy<Selectors> = Lazy::new(|| Selectors {
    card: Selector::parse("div.comp").unwrap(),
    status: Selector::parse("div.dday").unwrap(),
    name: Selector::parse("p.name.ellipsis").unwrap(),
    keyword: Selector::parse("p.info2.ellipsis.keyword").unwrap(),
    link: Selector::parse("a[href]").unwrap(),
    image: Selector::parse("img").unwrap(),
});

pub struct DaconProvider {
    mode: Mode,
}

enum Mode {
    Fixture(String),
    Http {
        fetcher: Arc<HttpFetcher>,
        list_url: String,
        fetch_periods: bool,
    },
}

impl DaconProvider {
    pub fn from_fixture(s: &str) -> Self {
        Self {
            mode: Mode::Fixture(s.to_string()),
        }
    }

    pub fn new(fetcher: Arc<HttpFetcher>) -> Self {
        Self {
            mode: Mode::Http {
                fetcher,
                list_url: DACON_LIST_URL.to_string(),
                fetch_periods: true,
            },
        }
    }

    pub fn with_list_url(mut self, url: impl Into<String>) -> Self {
        if let Mode::Http { list_url, .. } = &mut self.mode {
            *list_url = url.into();
        }
        self
    }

    /// Visit `<link>/schedule` per open competition to fill `period` and `deadline`.
    pub fn with_period_lookup(mut self, enabled: bool) -> Self {
        if let Mode::Http { fetch_periods, .. } = &mut self.mode {
            *fetch_periods = enabled;
        }
        self
    }

    async fn attach_periods(&self, fetcher: &HttpFetcher, records: &mut [CompetitionRecord]) {
        for rec in records.iter_mut() {
            let url = format!("{}/schedule", rec.url.trim_end_matches('/'));
            match fetcher.get_text(PROVIDER, &url, None).await {
                Ok(html) => match parse_period(&html) {
                    Some(period) => {
                        rec.deadline = period_end(&period);
                        rec.metadata.insert("period".into(), period);
                    }
                    None => tracing::debug!(id = %rec.id, "no period on schedule page"),
                },
                Err(e) => tracing::warn!(id = %rec.id, error = %e, "schedule lookup failed"),
            }
        }
    }
}

#[async_trait]
impl SourceProvider for DaconProvider {
    async fn fetch_latest(&self) -> Result<Vec<CompetitionRecord>, FetchError> {
        match &self.mode {
            Mode::Fixture(s) => Ok(parse_listing(s, DACON_BASE)),
            Mode::Http {
                fetcher,
                list_url,
                fetch_periods,
            } => {
                let body = fetcher.get_text(PROVIDER, list_url, None).await?;
                let mut records = parse_listing(&body, DACON_BASE);
                if records.is_empty() {
                    tracing::warn!(provider = PROVIDER, "no open competitions on listing page");
                }
                if *fetch_periods {
                    self.attach_periods(fetcher, &mut records).await;
                }
                Ok(records)
            }
        }
    }

    fn name(&self) -> &'static str {
        PROVIDER
    }

    fn source(&self) -> Source {
        Source::Dacon
    }
}

/// Parse the competitions page: one record per open card, in page order.
/// Broken cards are skipped and logged.
pub fn parse_listing(html: &str, base: &str) -> Vec<CompetitionRecord> {
    let t0 = std::time::Instant::now();
    let doc = Html::parse_document(html);

    let mut out = Vec::new();
    for card in doc.select(&SELECTORS.card) {
        match parse_card(card, base) {
            Ok(Some(rec)) => out.push(rec),
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(provider = PROVIDER, error = %e, "skipping unparseable card");
                counter!("competitions_skipped_total", "source" => PROVIDER).increment(1);
            }
        }
    }

    let ms = t0.elapsed().as_secs_f64() * 1_000.0;
    histogram!("source_parse_ms", "source" => PROVIDER).record(ms);
    out
}

fn parse_card(card: ElementRef<'_>, base: &str) -> Result<Option<CompetitionRecord>> {
    let open = card
        .select(&SELECTORS.status)
        .next()
        .map(|el| el.text().collect::<String>().contains(OPEN_STATUS_MARKER))
        .unwrap_or(false);
    if !open {
        return Ok(None);
    }

    let title = card
        .select(&SELECTORS.name)
        .next()
        .map(element_text)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| anyhow!("card without name"))?;
    let href = card
        .select(&SELECTORS.link)
        .next()
        .and_then(|a| a.value().attr("href"))
        .ok_or_else(|| anyhow!("card {title:?} without link"))?;
    let url = absolutize(base, href).ok_or_else(|| anyhow!("card {title:?} has bad link"))?;
    let keywords = card
        .select(&SELECTORS.keyword)
        .next()
        .map(element_text)
        .unwrap_or_default();
    let image_url = card.select(&SELECTORS.image).next().and_then(|img| {
        let v = img.value();
        v.attr("src")
            .filter(|s| !s.trim().is_empty())
            .or_else(|| v.attr("data-src"))
            .and_then(|s| absolutize(base, s))
    });

    let native_id = competition_number(&url).unwrap_or_else(|| url.clone());
    let mut rec = CompetitionRecord::new(Source::Dacon, &native_id, title, url);
    rec.image_url = image_url;
    Ok(Some(rec.with_meta("keywords", keywords)))
}

fn element_text(el: ElementRef<'_>) -> String {
    normalize_text(&el.text().collect::<String>())
}

/// Numeric competition id from `/competitions/official/236000/...`.
pub fn competition_number(url: &str) -> Option<String> {
    static RE: OnceCell<Regex> = OnceCell::new();
    let re = RE.get_or_init(|| Regex::new(r"/competitions/(?:[a-z]+/)?(\d+)").unwrap());
    re.captures(url).map(|c| c[1].to_string())
}

/// Extract `start ~ end` from a schedule page, with clock times removed.
pub fn parse_period(html: &str) -> Option<String> {
    let doc = Html::parse_document(html);
    let line = doc
        .root_element()
        .text()
        .find(|t| t.contains(PERIOD_LABEL))?
        .to_string();

    let after = line.split(PERIOD_LABEL).nth(1).unwrap_or_default();

    static RE_TIME: OnceCell<Regex> = OnceCell::new();
    let re_time = RE_TIME.get_or_init(|| Regex::new(r"\d{1,2}:\d{2}").unwrap());
    let cleaned = re_time.replace_all(after, "");

    let parts: Vec<&str> = cleaned.split('~').map(str::trim).collect();
    let period = if parts.len() == 2 {
        format!("{} ~ {}", parts[0], parts[1])
    } else {
        normalize_text(&cleaned)
    };
    (!period.is_empty()).then_some(period)
}

/// Last date in the period, as the end of that day in Korea time.
pub fn period_end(period: &str) -> Option<DateTime<Utc>> {
    static RE_DATE: OnceCell<Regex> = OnceCell::new();
    let re = RE_DATE.get_or_init(|| {
        Regex::new(r"(\d{4})\s*[.\-/]\s*(\d{1,2})\s*[.\-/]\s*(\d{1,2})").unwrap()
    });
    let caps = re.captures_iter(period).last()?;
    let date = NaiveDate::from_ymd_opt(
        caps[1].parse().ok()?,
        caps[2].parse().ok()?,
        caps[3].parse().ok()?,
    )?;
    let kst = FixedOffset::east_opt(9 * 3600)?;
    date.and_hms_opt(23, 59, 59)?
        .and_local_timezone(kst)
        .single()
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn competition_number_from_links() {
        assert_eq!(
            competition_number("https://dacon.io/competitions/official/236000/overview/description")
                .as_deref(),
            Some("236000")
        );
        assert_eq!(
            competition_number("https://dacon.io/competitions/235999/overview").as_deref(),
            Some("235999")
        );
        assert!(competition_number("https://dacon.io/about").is_none());
    }

    #[test]
    fn period_strips_label_and_times() {
        let html = "<ul><li>- 대회 기간 : 2025.01.06 10:00 ~ 2025.02.28 23:59</li></ul>";
        assert_eq!(parse_period(html).as_deref(), Some("2025.01.06 ~ 2025.02.28"));
        assert!(parse_period("<p>일정 미정</p>").is_none());
    }

    #[test]
    fn period_end_is_end_of_day_kst() {
        let end = period_end("2025.01.06 ~ 2025.02.28").unwrap();
        assert_eq!(end, Utc.with_ymd_and_hms(2025, 2, 28, 14, 59, 59).unwrap());
        assert!(period_end("TBD").is_none());
    }

    #[test]
    fn closed_cards_are_ignored() {
        let html = r#"<div class="comp"><div class="dday">종료</div>
            <p class="name ellipsis">Closed</p><a href="/competitions/official/1/overview">x</a></div>"#;
        assert!(parse_listing(html, DACON_BASE).is_empty());
    }
}
