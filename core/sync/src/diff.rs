//! Manifest comparison.
//!
//! Classifies every id of a collection into exactly one action by looking
//! at the two manifests and the watermark in effect for that id.

use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet, HashSet};

use inkboard_common::{Collection, ManifestEntry};

use crate::settings::Watermarks;

/// What a pass does with one id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Upload,
    Download,
    Unchanged,
    Conflict,
}

/// Classify one id.
///
/// `watermark` is the point in time both sides last agreed on; `None`
/// means the two sides have never been reconciled.
pub fn classify(
    local: Option<&ManifestEntry>,
    remote: Option<&ManifestEntry>,
    watermark: Option<DateTime<Utc>>,
) -> Action {
    let (local, remote) = match (local, remote) {
        (Some(local), Some(remote)) => (local, remote),
        (Some(_), None) => return Action::Upload,
        (None, Some(_)) => return Action::Download,
        (None, None) => return Action::Unchanged,
    };

    if local.content_hash == remote.content_hash {
        return Action::Unchanged;
    }

    let Some(watermark) = watermark else {
        return Action::Conflict;
    };

    match (local.updated_at > watermark, remote.updated_at > watermark) {
        (true, false) => Action::Upload,
        (false, true) => Action::Download,
        // Both changed, or content diverged without either side changing.
        _ => Action::Conflict,
    }
}

/// A conflicting id with both manifest entries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictCandidate {
    pub local: ManifestEntry,
    pub remote: ManifestEntry,
    /// Watermark the id was compared against.
    pub watermark: Option<DateTime<Utc>>,
}

/// Classified contents of one collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionDiff {
    pub collection: Collection,
    pub uploads: Vec<ManifestEntry>,
    pub downloads: Vec<ManifestEntry>,
    pub conflicts: Vec<ConflictCandidate>,
    pub unchanged: usize,
}

impl CollectionDiff {
    pub fn new(collection: Collection) -> Self {
        Self {
            collection,
            uploads: Vec::new(),
            downloads: Vec::new(),
            conflicts: Vec::new(),
            unchanged: 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.uploads.is_empty() && self.downloads.is_empty() && self.conflicts.is_empty()
    }
}

fn index(entries: &[ManifestEntry]) -> BTreeMap<&str, &ManifestEntry> {
    entries.iter().map(|e| (e.id.as_str(), e)).collect()
}

/// Diff the record manifests of one collection.
pub fn diff_records(
    collection: Collection,
    local: &[ManifestEntry],
    remote: &[ManifestEntry],
    last_sync_at: Option<DateTime<Utc>>,
    watermarks: &Watermarks,
) -> CollectionDiff {
    let local = index(local);
    let remote = index(remote);
    let ids: BTreeSet<&str> = local.keys().chain(remote.keys()).copied().collect();

    let mut diff = CollectionDiff::new(collection);
    for id in ids {
        let l = local.get(id).copied();
        let r = remote.get(id).copied();
        let watermark = watermarks.get(collection, id).or(last_sync_at);

        match (classify(l, r, watermark), l, r) {
            (Action::Upload, Some(l), _) => diff.uploads.push(l.clone()),
            (Action::Download, _, Some(r)) => diff.downloads.push(r.clone()),
            (Action::Conflict, Some(l), Some(r)) => diff.conflicts.push(ConflictCandidate {
                local: l.clone(),
                remote: r.clone(),
                watermark,
            }),
            _ => diff.unchanged += 1,
        }
    }
    diff
}

/// Asset paths present locally but missing remotely, limited to referenced ones.
///
/// Assets are content addressed, so presence is all that matters.
pub fn missing_assets<'a>(
    present: impl IntoIterator<Item = &'a str>,
    other_side: &HashSet<String>,
    referenced: &HashSet<String>,
) -> Vec<String> {
    let mut missing: Vec<String> = present
        .into_iter()
        .filter(|path| !other_side.contains(*path) && referenced.contains(*path))
        .map(str::to_string)
        .collect();
    missing.sort();
    missing.dedup();
    missing
}

/// Whether a pass can stop after fetching manifests.
///
/// True when both sides hold the same ids and nothing on either side
/// changed since the watermark.
pub fn nothing_changed(
    local: &[ManifestEntry],
    remote: &[ManifestEntry],
    watermark: DateTime<Utc>,
) -> bool {
    let local_ids: BTreeSet<&str> = local.iter().map(|e| e.id.as_str()).collect();
    let remote_ids: BTreeSet<&str> = remote.iter().map(|e| e.id.as_str()).collect();

    local_ids == remote_ids
        && local
            .iter()
            .chain(remote.iter())
            .all(|e| e.updated_at <= watermark)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use inkboard_common::EntityKind;
    use proptest::prelude::*;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn entry(id: &str, secs: i64, hash: &str) -> ManifestEntry {
        ManifestEntry {
            id: id.to_string(),
            updated_at: at(secs),
            content_hash: hash.to_string(),
            device_id: None,
        }
    }

    const PROJECTS: Collection = Collection::Records(EntityKind::Project);

    #[test]
    fn test_one_sided_ids() {
        let e = entry("x", 10, "h");
        assert_eq!(classify(Some(&e), None, Some(at(100))), Action::Upload);
        assert_eq!(classify(None, Some(&e), Some(at(100))), Action::Download);
        assert_eq!(classify(None, None, None), Action::Unchanged);
    }

    #[test]
    fn test_same_content_is_unchanged_regardless_of_time() {
        let l = entry("x", 200, "same");
        let r = entry("x", 300, "same");
        assert_eq!(classify(Some(&l), Some(&r), Some(at(100))), Action::Unchanged);
        assert_eq!(classify(Some(&l), Some(&r), None), Action::Unchanged);
    }

    #[test]
    fn test_single_side_change() {
        let old = entry("x", 50, "old");
        let new = entry("x", 150, "new");
        let wm = Some(at(100));

        assert_eq!(classify(Some(&new), Some(&old), wm), Action::Upload);
        assert_eq!(classify(Some(&old), Some(&new), wm), Action::Download);
    }

    #[test]
    fn test_both_changed_is_conflict() {
        let l = entry("x", 150, "mine");
        let r = entry("x", 160, "theirs");
        assert_eq!(classify(Some(&l), Some(&r), Some(at(100))), Action::Conflict);
    }

    #[test]
    fn test_no_watermark_divergence_is_conflict() {
        let l = entry("x", 1, "mine");
        let r = entry("x", 2, "theirs");
        assert_eq!(classify(Some(&l), Some(&r), None), Action::Conflict);
    }

    #[test]
    fn test_unexplained_divergence_is_conflict() {
        let l = entry("x", 10, "mine");
        let r = entry("x", 20, "theirs");
        assert_eq!(classify(Some(&l), Some(&r), Some(at(100))), Action::Conflict);
    }

    #[test]
    fn test_held_watermark_overrides_global() {
        let l = entry("x", 150, "mine");
        let r = entry("x", 160, "theirs");
        let mut held = Watermarks::default();
        held.hold(PROJECTS, "x", at(100));

        // Against the global watermark neither side changed; the hold keeps it a conflict.
        let diff = diff_records(PROJECTS, &[l], &[r], Some(at(500)), &held);
        assert_eq!(diff.conflicts.len(), 1);
        assert_eq!(diff.conflicts[0].watermark, Some(at(100)));
    }

    #[test]
    fn test_diff_records_buckets() {
        let local = vec![
            entry("a", 150, "a1"),
            entry("b", 50, "b0"),
            entry("c", 150, "c-local"),
            entry("d", 50, "d"),
        ];
        let remote = vec![
            entry("b", 150, "b1"),
            entry("c", 160, "c-remote"),
            entry("d", 60, "d"),
            entry("e", 10, "e"),
        ];

        let diff = diff_records(PROJECTS, &local, &remote, Some(at(100)), &Watermarks::default());

        let ids = |v: &[ManifestEntry]| v.iter().map(|e| e.id.clone()).collect::<Vec<_>>();
        assert_eq!(ids(&diff.uploads), vec!["a"]);
        assert_eq!(ids(&diff.downloads), vec!["b", "e"]);
        assert_eq!(diff.conflicts.len(), 1);
        assert_eq!(diff.conflicts[0].local.id, "c");
        assert_eq!(diff.unchanged, 1);
    }

    #[test]
    fn test_missing_assets_filters_unreferenced() {
        let remote: HashSet<String> = ["images/1/a.png".to_string()].into();
        let referenced: HashSet<String> =
            ["images/1/a.png".to_string(), "images/2/b.png".to_string()].into();

        let missing = missing_assets(
            ["images/1/a.png", "images/2/b.png", "images/3/stale.png"],
            &remote,
            &referenced,
        );
        assert_eq!(missing, vec!["images/2/b.png"]);
    }

    #[test]
    fn test_nothing_changed() {
        let wm = at(100);
        let local = vec![entry("a", 10, "x"), entry("b", 20, "y")];
        let remote = vec![entry("b", 20, "y"), entry("a", 10, "x")];
        assert!(nothing_changed(&local, &remote, wm));

        let edited = vec![entry("a", 110, "x2"), entry("b", 20, "y")];
        assert!(!nothing_changed(&edited, &remote, wm));
        assert!(!nothing_changed(&local[..1], &remote, wm));
        assert!(nothing_changed(&[], &[], wm));
    }

    fn arb_entry() -> impl Strategy<Value = ManifestEntry> {
        (0i64..1000, prop::sample::select(vec!["h1", "h2", "h3"]))
            .prop_map(|(secs, hash)| entry("id", secs, hash))
    }

    proptest! {
        #[test]
        fn prop_one_sided_never_conflicts(e in arb_entry(), wm in prop::option::of(0i64..1000)) {
            let wm = wm.map(at);
            prop_assert_eq!(classify(Some(&e), None, wm), Action::Upload);
            prop_assert_eq!(classify(None, Some(&e), wm), Action::Download);
        }

        #[test]
        fn prop_identical_content_never_conflicts(
            l in 0i64..1000,
            r in 0i64..1000,
            wm in prop::option::of(0i64..1000),
        ) {
            let local = entry("id", l, "same");
            let remote = entry("id", r, "same");
            prop_assert_eq!(classify(Some(&local), Some(&remote), wm.map(at)), Action::Unchanged);
        }

        #[test]
        fn prop_diff_partitions_ids(
            local in prop::collection::btree_map("[a-f]", arb_entry(), 0..6),
            remote in prop::collection::btree_map("[a-f]", arb_entry(), 0..6),
            wm in prop::option::of(0i64..1000),
        ) {
            let with_id = |m: std::collections::BTreeMap<String, ManifestEntry>| {
                m.into_iter().map(|(id, mut e)| { e.id = id; e }).collect::<Vec<_>>()
            };
            let local = with_id(local);
            let remote = with_id(remote);
            let all: BTreeSet<&str> = local.iter().chain(remote.iter()).map(|e| e.id.as_str()).collect();

            let diff = diff_records(PROJECTS, &local, &remote, wm.map(at), &Watermarks::default());
            let classified = diff.uploads.len() + diff.downloads.len() + diff.conflicts.len() + diff.unchanged;
            prop_assert_eq!(classified, all.len());
        }

        #[test]
        fn prop_newer_than_watermark_never_skips(secs in 101i64..1000) {
            let l = entry("id", secs, "changed");
            let r = entry("id", 50, "original");
            prop_assert_eq!(classify(Some(&l), Some(&r), Some(at(100))), Action::Upload);
        }
    }
}
