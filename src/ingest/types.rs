// src/ingest/types.rs
use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Listing source a record came from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Source {
    Kaggle,
    Dacon,
}

impl Source {
    /// Lowercase prefix used in record ids (`kaggle:123`).
    pub fn id_prefix(self) -> &'static str {
        match self {
            Source::Kaggle => "kaggle",
            Source::Dacon => "dacon",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            Source::Kaggle => "Kaggle",
            Source::Dacon => "Dacon",
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

/// One competition listing, normalized across sources.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CompetitionRecord {
    pub id: String, // "<source>:<native id>", dedup key
    pub title: String,
    pub url: String,
    pub source: Source,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    /// Source-specific fields (Kaggle: category/reward/description, Dacon: keywords/period).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
    /// Last cycle the record was listed by its source; set when merged into a snapshot.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<DateTime<Utc>>,
}

impl CompetitionRecord {
    pub fn new(source: Source, native_id: &str, title: String, url: String) -> Self {
        Self {
            id: format!("{}:{}", source.id_prefix(), native_id),
            title,
            url,
            source,
            deadline: None,
            image_url: None,
            metadata: BTreeMap::new(),
            last_seen: None,
        }
    }

    pub fn with_meta(mut self, key: &str, value: impl Into<String>) -> Self {
        let v = value.into();
        if !v.trim().is_empty() {
            self.metadata.insert(key.to_string(), v);
        }
        self
    }

    pub fn meta(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(String::as_str)
    }
}

/// Source-level failure after retries are exhausted. Never mapped to "no competitions".
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("{provider}: missing credentials ({hint})")]
    Credentials {
        provider: &'static str,
        hint: String,
    },
    #[error("{provider}: HTTP {status} from {url}")]
    Http {
        provider: &'static str,
        status: u16,
        url: String,
    },
    #[error("{provider}: {url} failed after {attempts} attempts: {last_error}")]
    Exhausted {
        provider: &'static str,
        url: String,
        attempts: u8,
        last_error: String,
    },
    #[error("{provider}: malformed payload: {reason}")]
    Payload {
        provider: &'static str,
        reason: String,
    },
    #[error("http client setup failed: {0}")]
    Client(#[from] reqwest::Error),
}

#[async_trait::async_trait]
pub trait SourceProvider: Send + Sync {
    async fn fetch_latest(&self) -> Result<Vec<CompetitionRecord>, FetchError>;
    fn name(&self) -> &'static str;
    fn source(&self) -> Source;
}
