use std::collections::{HashMap, HashSet};

use crate::clock::day_of;

use super::result::SubscriptionResult;

/// Tombstones last seen longer ago than this are candidates for trimming
pub const TOMBSTONE_RETENTION_DAYS: i64 = 14;
/// Trimming only happens once this many old tombstones pile up
pub const TOMBSTONE_TRIM_THRESHOLD: usize = 10_000;
/// How many of the most recently seen old tombstones survive a trim
pub const TOMBSTONE_TRIM_KEEP: usize = 5_000;

/// What a merge of a fetched batch into a stored set did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileOutcome {
    /// An existing result was updated or soft-deleted
    pub changed: bool,
    /// Ids of the results appended by this merge
    pub new_ids: Vec<String>,
    /// Non-deleted results after the merge
    pub num_read: u32,
    pub num_unread: u32,
}

impl ReconcileOutcome {
    /// Whether the stored set must be written back
    pub fn needs_save(&self) -> bool {
        self.changed || !self.new_ids.is_empty()
    }
}

/// Merge `fetched` into `stored`.
///
/// Results are matched by key1 first. Only when that misses is key2 tried, and
/// only against stored results whose own key1 is absent from the batch, so two
/// differently named rows that share a uid in one fetch stay separate. Unmatched
/// rows are appended; with `first_scan` they arrive already read. When more than
/// `max_results` (zero meaning unlimited) non-deleted results remain, the oldest
/// are soft-deleted until the cap holds.
pub fn reconcile(
    stored: &mut Vec<SubscriptionResult>,
    fetched: Vec<SubscriptionResult>,
    first_scan: bool,
    max_results: u32,
    now: i64,
) -> ReconcileOutcome {
    let mut outcome = ReconcileOutcome::default();

    let fetched_key1: HashSet<Vec<u8>> = fetched.iter().map(|r| r.key1.clone()).collect();

    let mut by_key1: HashMap<Vec<u8>, usize> = HashMap::new();
    let mut by_key2: HashMap<Vec<u8>, usize> = HashMap::new();
    for (i, r) in stored.iter().enumerate() {
        by_key1.insert(r.key1.clone(), i);
        if let Some(key2) = &r.key2 {
            by_key2.insert(key2.clone(), i);
        }
    }

    for mut fresh in fetched {
        let existing = by_key1.get(&fresh.key1).copied().or_else(|| {
            let i = *by_key2.get(fresh.key2.as_ref()?)?;
            (!fetched_key1.contains(&stored[i].key1)).then_some(i)
        });

        match existing {
            Some(i) => {
                if stored[i].update_from(&fresh, now) {
                    outcome.changed = true;
                }
            }
            None => {
                if first_scan {
                    fresh.read = true;
                }
                let i = stored.len();
                by_key1.insert(fresh.key1.clone(), i);
                if let Some(key2) = &fresh.key2 {
                    by_key2.insert(key2.clone(), i);
                }
                outcome.new_ids.push(fresh.id.clone());
                stored.push(fresh);
            }
        }
    }

    let mut live = stored.iter().filter(|r| !r.deleted).count();
    let cap = max_results as usize;
    if cap > 0 && live > cap {
        for r in stored.iter_mut().filter(|r| !r.deleted) {
            r.delete(now);
            outcome.changed = true;
            live -= 1;
            if live <= cap {
                break;
            }
        }
    }

    let (num_read, num_unread) = count_read(stored);
    outcome.num_read = num_read;
    outcome.num_unread = num_unread;
    outcome
}

/// `(read, unread)` counts over non-deleted results
pub fn count_read(results: &[SubscriptionResult]) -> (u32, u32) {
    results
        .iter()
        .filter(|r| !r.deleted)
        .fold((0, 0), |(read, unread), r| {
            if r.read {
                (read + 1, unread)
            } else {
                (read, unread + 1)
            }
        })
}

/// Select the results that get persisted.
///
/// Old tombstones are all kept unless there are more than
/// [`TOMBSTONE_TRIM_THRESHOLD`] of them, in which case only the
/// [`TOMBSTONE_TRIM_KEEP`] most recently seen survive. Order is preserved.
pub fn trim_tombstones(results: &[SubscriptionResult], now: i64) -> Vec<SubscriptionResult> {
    let today = day_of(now);
    let is_old = |r: &SubscriptionResult| {
        r.deleted && r.last_seen_day > 0 && today - r.last_seen_day > TOMBSTONE_RETENTION_DAYS
    };

    let mut old: Vec<(usize, i64)> = results
        .iter()
        .enumerate()
        .filter(|(_, r)| is_old(r))
        .map(|(i, r)| (i, r.last_seen_day))
        .collect();
    if old.len() <= TOMBSTONE_TRIM_THRESHOLD {
        return results.to_vec();
    }

    old.sort_by(|a, b| b.1.cmp(&a.1));
    let dropped: HashSet<usize> = old[TOMBSTONE_TRIM_KEEP..].iter().map(|(i, _)| *i).collect();
    tracing::debug!(
        dropped = dropped.len(),
        "trimming old result tombstones"
    );

    results
        .iter()
        .enumerate()
        .filter(|(i, _)| !dropped.contains(i))
        .map(|(_, r)| r.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::DAY_MS;
    use crate::results::ResultItem;

    const NOW: i64 = 1_700_000_000_000;

    fn row(name: &str, uid: Option<&str>) -> SubscriptionResult {
        let mut item = ResultItem::new(name);
        item.uid = uid.map(str::to_string);
        SubscriptionResult::from_item("web", item, NOW)
    }

    fn batch(names: &[&str]) -> Vec<SubscriptionResult> {
        names.iter().map(|n| row(n, None)).collect()
    }

    #[test]
    fn test_first_scan_marks_read() {
        let mut stored = Vec::new();
        let out = reconcile(&mut stored, batch(&["a", "b", "c"]), true, 0, NOW);
        assert_eq!(out.new_ids.len(), 3);
        assert_eq!((out.num_read, out.num_unread), (3, 0));
        assert!(stored.iter().all(|r| r.read));
    }

    #[test]
    fn test_reconcile_is_idempotent() {
        let mut stored = Vec::new();
        let first = reconcile(&mut stored, batch(&["a", "b"]), false, 0, NOW);
        assert_eq!(first.num_unread, 2);
        let snapshot = stored.clone();

        let second = reconcile(&mut stored, batch(&["a", "b"]), false, 0, NOW);
        assert!(!second.needs_save());
        assert_eq!(second.num_unread, 2);
        assert_eq!(stored, snapshot);
    }

    #[test]
    fn test_changed_payload_merges_in_place() {
        let mut stored = Vec::new();
        reconcile(&mut stored, batch(&["a"]), false, 0, NOW);

        let mut fresh = row("a", None);
        fresh.item.seeds = 12;
        let out = reconcile(&mut stored, vec![fresh], false, 0, NOW);
        assert!(out.changed);
        assert!(out.new_ids.is_empty());
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].item.seeds, 12);
        assert_eq!(out.num_unread, 1);
    }

    #[test]
    fn test_renamed_result_matches_by_uid() {
        let mut stored = Vec::new();
        reconcile(&mut stored, vec![row("old name", Some("u1"))], false, 0, NOW);
        stored[0].read = true;

        let out = reconcile(&mut stored, vec![row("new name", Some("u1"))], false, 0, NOW);
        assert!(out.new_ids.is_empty());
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].item.name, "new name");
        // key1 stays what it was
        assert_eq!(stored[0].key1, row("old name", None).key1);
        assert!(stored[0].read);
    }

    #[test]
    fn test_distinct_names_sharing_uid_in_one_batch_stay_apart() {
        let mut stored = Vec::new();
        reconcile(&mut stored, vec![row("x", Some("dup"))], false, 0, NOW);

        let out = reconcile(
            &mut stored,
            vec![row("x", Some("dup")), row("y", Some("dup"))],
            false,
            0,
            NOW,
        );
        assert_eq!(out.new_ids.len(), 1);
        assert_eq!(stored.len(), 2);
    }

    #[test]
    fn test_cap_soft_deletes_oldest() {
        let mut stored = Vec::new();
        let names: Vec<String> = (0..10).map(|i| format!("r{}", i)).collect();
        let refs: Vec<&str> = names.iter().map(String::as_str).collect();
        let out = reconcile(&mut stored, batch(&refs), false, 4, NOW);

        assert_eq!(stored.len(), 10);
        assert_eq!(stored.iter().filter(|r| !r.deleted).count(), 4);
        assert!(stored[..6].iter().all(|r| r.deleted));
        assert_eq!(out.num_read + out.num_unread, 4);
        assert!(out.changed);
    }

    #[test]
    fn test_tombstone_does_not_come_back() {
        let mut stored = Vec::new();
        reconcile(&mut stored, batch(&["a"]), false, 0, NOW);
        stored[0].delete(NOW);

        let out = reconcile(&mut stored, batch(&["a"]), false, 0, NOW + 2 * DAY_MS);
        assert!(out.new_ids.is_empty());
        assert!(stored[0].deleted);
        assert_eq!(out.num_unread, 0);
    }

    #[test]
    fn test_trim_keeps_recent_tombstones() {
        let today = day_of(NOW);
        let mut results = Vec::new();
        for i in 0..(TOMBSTONE_TRIM_THRESHOLD + 1) {
            let mut r = row(&format!("t{}", i), None);
            r.deleted = true;
            r.last_seen_day = today - TOMBSTONE_RETENTION_DAYS - 1 - (i as i64 % 100);
            results.push(r);
        }
        results.push(row("live", None));

        let kept = trim_tombstones(&results, NOW);
        assert_eq!(kept.len(), TOMBSTONE_TRIM_KEEP + 1);
        assert_eq!(kept.last().unwrap().item.name, "live");

        let few = &results[..50];
        assert_eq!(trim_tombstones(few, NOW).len(), 50);
    }
}
