// src/diff.rs
use std::collections::HashSet;

use crate::ingest::types::CompetitionRecord;
use crate::store::Snapshot;

/// Records of `current` whose id is absent from `previous`, in fetch order.
/// An id repeated within `current` is reported once.
pub fn diff(previous: &Snapshot, current: &[CompetitionRecord]) -> Vec<CompetitionRecord> {
    let known = previous.ids();
    let mut emitted: HashSet<&str> = HashSet::new();
    current
        .iter()
        .filter(|&r| !known.contains(r.id.as_str()) && emitted.insert(r.id.as_str()))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::types::Source;

    fn rec(source: Source, id: &str) -> CompetitionRecord {
        CompetitionRecord::new(source, id, format!("Comp {id}"), format!("https://x/{id}"))
    }

    #[test]
    fn empty_previous_yields_everything_in_order() {
        let a = rec(Source::Kaggle, "1");
        let b = rec(Source::Dacon, "2");
        let out = diff(&Snapshot::default(), &[a.clone(), b.clone()]);
        assert_eq!(out, vec![a, b]);
    }

    #[test]
    fn known_ids_never_reported() {
        let a = rec(Source::Kaggle, "1");
        let prev = Snapshot::new(vec![a.clone()]);
        let mut changed = a.clone();
        changed.title = "retitled".into();
        assert!(diff(&prev, &[a, changed]).is_empty());
    }

    #[test]
    fn same_native_id_on_other_source_is_new() {
        let prev = Snapshot::new(vec![rec(Source::Kaggle, "7")]);
        let out = diff(&prev, &[rec(Source::Dacon, "7")]);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].id, "dacon:7");
    }

    #[test]
    fn duplicate_in_current_reported_once() {
        let a = rec(Source::Kaggle, "1");
        let out = diff(&Snapshot::default(), &[a.clone(), a.clone()]);
        assert_eq!(out, vec![a]);
    }
}
