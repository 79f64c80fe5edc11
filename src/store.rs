//! Snapshot persistence: the set of competitions known as of the last cycle,
//! stored as a pretty-printed JSON array.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::{fs, io::AsyncWriteExt};

use crate::ingest::types::{CompetitionRecord, Source};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("snapshot {path} is corrupt: {reason}")]
    Corrupt { path: PathBuf, reason: String },
    #[error("reading snapshot {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("writing snapshot {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("encoding snapshot: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Snapshot {
    records: Vec<CompetitionRecord>,
}

impl Snapshot {
    /// Build from records, keeping the first occurrence of each id.
    pub fn new(records: Vec<CompetitionRecord>) -> Self {
        let mut seen = HashSet::new();
        let records = records
            .into_iter()
            .filter(|r| seen.insert(r.id.clone()))
            .collect();
        Self { records }
    }

    pub fn records(&self) -> &[CompetitionRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn ids(&self) -> HashSet<&str> {
        self.records.iter().map(|r| r.id.as_str()).collect()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.records.iter().any(|r| r.id == id)
    }

    pub fn count_for(&self, source: Source) -> usize {
        self.records.iter().filter(|r| r.source == source).count()
    }

    /// Union of `self` and `current`, stamping `last_seen = now` on every
    /// record. Records present in both take `current`'s fields, except that a
    /// deadline, image or metadata key missing from the fresh copy is carried
    /// over from the stored one. Existing order is kept and unseen records are
    /// appended in fetch order. Nothing is dropped here, so a source that
    /// failed this cycle keeps its previous records.
    pub fn merge(&self, current: &[CompetitionRecord], now: DateTime<Utc>) -> Snapshot {
        let fresh: HashMap<&str, &CompetitionRecord> =
            current.iter().map(|r| (r.id.as_str(), r)).collect();

        let mut records: Vec<CompetitionRecord> = self
            .records
            .iter()
            .map(|prev| match fresh.get(prev.id.as_str()) {
                Some(cur) => {
                    let mut r = refresh(prev, cur);
                    r.last_seen = Some(now);
                    r
                }
                None => {
                    let mut r = prev.clone();
                    // records saved before `last_seen` existed start aging now
                    r.last_seen.get_or_insert(now);
                    r
                }
            })
            .collect();

        let mut known: HashSet<String> = records.iter().map(|r| r.id.clone()).collect();
        for r in current {
            if known.insert(r.id.clone()) {
                let mut r = r.clone();
                r.last_seen = Some(now);
                records.push(r);
            }
        }
        Snapshot { records }
    }

    /// Drop records whose deadline passed more than `retention` ago. Records
    /// without a deadline go once their source has not listed them for
    /// `retention`. Records with neither are kept.
    pub fn prune_expired(mut self, now: DateTime<Utc>, retention: Duration) -> Snapshot {
        let cutoff = now
            .checked_sub_signed(retention)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        self.records.retain(|r| match r.deadline {
            Some(d) => d >= cutoff,
            None => r.last_seen.map_or(true, |seen| seen >= cutoff),
        });
        self
    }
}

fn refresh(prev: &CompetitionRecord, cur: &CompetitionRecord) -> CompetitionRecord {
    let mut r = cur.clone();
    if r.deadline.is_none() {
        r.deadline = prev.deadline;
    }
    if r.image_url.is_none() {
        r.image_url = prev.image_url.clone();
    }
    for (k, v) in &prev.metadata {
        r.metadata.entry(k.clone()).or_insert_with(|| v.clone());
    }
    r
}

/// File-backed snapshot store. Only the scheduler touches the file.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    path: PathBuf,
}

impl SnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the snapshot. `Ok(None)` when the file does not exist yet.
    pub async fn read(&self) -> Result<Option<Snapshot>, StoreError> {
        let s = match fs::read_to_string(&self.path).await {
            Ok(s) => s,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(StoreError::Read {
                    path: self.path.clone(),
                    source: e,
                })
            }
        };
        let records: Vec<CompetitionRecord> =
            serde_json::from_str(&s).map_err(|e| StoreError::Corrupt {
                path: self.path.clone(),
                reason: e.to_string(),
            })?;
        Ok(Some(Snapshot::new(records)))
    }

    /// Never fails: a missing file is a first run, an unreadable one is
    /// logged and treated as empty.
    pub async fn load(&self) -> Snapshot {
        match self.read().await {
            Ok(Some(s)) => s,
            Ok(None) => {
                tracing::info!(path = %self.path.display(), "no snapshot yet, starting empty");
                Snapshot::default()
            }
            Err(e) => {
                tracing::warn!(error = %e, "snapshot unreadable, starting empty");
                Snapshot::default()
            }
        }
    }

    /// Write to a sibling temp file, fsync, then rename over the target.
    pub async fn save(&self, snapshot: &Snapshot) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec_pretty(snapshot)?;
        let write_err = |source| StoreError::Write {
            path: self.path.clone(),
            source,
        };

        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir).await.map_err(write_err)?;
        }

        let tmp = self.tmp_path();
        let mut f = fs::File::create(&tmp).await.map_err(write_err)?;
        f.write_all(&bytes).await.map_err(write_err)?;
        f.sync_all().await.map_err(write_err)?;
        drop(f);

        if let Err(e) = fs::rename(&tmp, &self.path).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(write_err(e));
        }
        Ok(())
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "snapshot.json".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}
