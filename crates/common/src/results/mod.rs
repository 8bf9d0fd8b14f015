//! Per-subscription result sets
//!
//! Each subscription owns one ordered set of [`SubscriptionResult`]s persisted at
//! `<dir>/<id>.json`. Every operation holds the subscription's results lock for
//! its whole load-modify-save cycle and then recomputes the read/unread counts
//! on the subscription's history, so counts and file never disagree.

mod reconcile;
mod result;

use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::clock::now_ms;
use crate::events::SubscriptionEvent;
use crate::storage;
use crate::subscription::{Subscription, SubscriptionError};

pub use reconcile::{
    count_read, reconcile, trim_tombstones, ReconcileOutcome, TOMBSTONE_RETENTION_DAYS,
    TOMBSTONE_TRIM_KEEP, TOMBSTONE_TRIM_THRESHOLD,
};
pub use result::{result_key1, result_key2, ResultItem, SubscriptionResult};

/// Result sets kept in memory
pub const RESULT_CACHE_SIZE: usize = 5;

#[derive(Debug, thiserror::Error)]
pub enum ResultStoreError {
    #[error("default error: {0}")]
    Default(#[from] anyhow::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed results file: {0}")]
    Json(#[from] serde_json::Error),
    #[error("subscription error: {0}")]
    Subscription(#[from] SubscriptionError),
}

#[derive(Serialize, Deserialize)]
struct ResultsFile {
    results: Vec<SubscriptionResult>,
}

#[derive(Debug)]
pub struct ResultStore {
    dir: PathBuf,
    default_max_results: AtomicU32,
    // most recently used first
    cache: Mutex<VecDeque<(String, Vec<SubscriptionResult>)>>,
}

impl ResultStore {
    pub fn new(dir: impl Into<PathBuf>, default_max_results: u32) -> Self {
        Self {
            dir: dir.into(),
            default_max_results: AtomicU32::new(default_max_results),
            cache: Mutex::new(VecDeque::with_capacity(RESULT_CACHE_SIZE)),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Cap for subscriptions without their own `max_results`; zero is unlimited
    pub fn default_max_results(&self) -> u32 {
        self.default_max_results.load(Ordering::Relaxed)
    }

    /// Change the default cap. Callers re-apply it with [`Self::check_max_results`].
    pub fn set_default_max_results(&self, max: u32) {
        self.default_max_results.store(max, Ordering::Relaxed);
    }

    fn path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", id))
    }

    fn cached(&self, id: &str) -> Option<Vec<SubscriptionResult>> {
        let mut cache = self.cache.lock();
        let pos = cache.iter().position(|(cid, _)| cid == id)?;
        let entry = cache.remove(pos)?;
        let results = entry.1.clone();
        cache.push_front(entry);
        Some(results)
    }

    fn cache_put(&self, id: &str, results: Vec<SubscriptionResult>) {
        let mut cache = self.cache.lock();
        cache.retain(|(cid, _)| cid != id);
        cache.push_front((id.to_string(), results));
        cache.truncate(RESULT_CACHE_SIZE);
    }

    async fn load(&self, id: &str) -> Result<Vec<SubscriptionResult>, ResultStoreError> {
        if let Some(results) = self.cached(id) {
            return Ok(results);
        }
        let results = match storage::read_resilient(&self.path(id)).await? {
            Some(data) => serde_json::from_slice::<ResultsFile>(&data)?.results,
            None => Vec::new(),
        };
        self.cache_put(id, results.clone());
        Ok(results)
    }

    async fn save(&self, id: &str, results: &[SubscriptionResult]) -> Result<(), ResultStoreError> {
        let file = ResultsFile {
            results: trim_tombstones(results, now_ms()),
        };
        let data = serde_json::to_vec(&file)?;
        // drop the cached copy first so a failed write is re-read from disk
        self.cache.lock().retain(|(cid, _)| cid != id);
        storage::write_resilient(&self.path(id), &data).await?;
        self.cache_put(id, file.results);
        Ok(())
    }

    /// Merge a fetched batch into the subscription's results.
    ///
    /// This is what a successful poll does: it always advances `last_scan`,
    /// refreshes the read/unread counts and clears the last error, and writes the
    /// set back only if the merge changed something.
    pub async fn reconcile(
        &self,
        sub: &Subscription,
        items: Vec<ResultItem>,
    ) -> Result<ReconcileOutcome, ResultStoreError> {
        let engine = sub.query()?.engine;
        let _guard = sub.results_lock().lock().await;

        let now = now_ms();
        let history = sub.history();
        let first_scan = history.last_scan == 0;
        let max_results = history.max_results.unwrap_or(self.default_max_results());

        let mut stored = self.load(sub.id()).await?;
        let fetched: Vec<SubscriptionResult> = items
            .into_iter()
            .map(|item| SubscriptionResult::from_item(&engine, item, now))
            .collect();
        let outcome = reconcile(&mut stored, fetched, first_scan, max_results, now);

        if outcome.needs_save() {
            self.save(sub.id(), &stored).await?;
        }

        let new_ids: HashSet<&String> = outcome.new_ids.iter().collect();
        let new_unread = stored
            .iter()
            .filter(|r| !r.read && !r.deleted && new_ids.contains(&r.id))
            .count();

        sub.update_history(|h| {
            h.last_scan = now;
            if !outcome.new_ids.is_empty() {
                h.last_new_result = now;
            }
            h.num_read = outcome.num_read;
            h.num_unread = outcome.num_unread;
            h.clear_error();
        });

        tracing::info!(
            id = %sub.id(),
            new = outcome.new_ids.len(),
            new_unread,
            unread = outcome.num_unread,
            "results reconciled"
        );
        if outcome.needs_save() {
            sub.events().publish(SubscriptionEvent::ResultsChanged {
                id: sub.id().to_string(),
                new_unread,
            });
        }
        Ok(outcome)
    }

    /// Apply `f` to the stored set under the results lock.
    ///
    /// `f` reports whether it changed anything; only then is the set saved and a
    /// results event published. Counts are refreshed either way.
    async fn modify<F>(&self, sub: &Subscription, f: F) -> Result<(), ResultStoreError>
    where
        F: FnOnce(&mut Vec<SubscriptionResult>) -> bool,
    {
        let _guard = sub.results_lock().lock().await;
        let mut stored = self.load(sub.id()).await?;
        let changed = f(&mut stored);
        if changed {
            self.save(sub.id(), &stored).await?;
        }
        let (read, unread) = count_read(&stored);
        sub.update_history(|h| {
            h.num_read = read;
            h.num_unread = unread;
        });
        if changed {
            sub.events().publish(SubscriptionEvent::ResultsChanged {
                id: sub.id().to_string(),
                new_unread: 0,
            });
        }
        Ok(())
    }

    pub async fn results(
        &self,
        sub: &Subscription,
        include_deleted: bool,
    ) -> Result<Vec<SubscriptionResult>, ResultStoreError> {
        let _guard = sub.results_lock().lock().await;
        let mut results = self.load(sub.id()).await?;
        if !include_deleted {
            results.retain(|r| !r.deleted);
        }
        Ok(results)
    }

    pub async fn result(
        &self,
        sub: &Subscription,
        result_id: &str,
    ) -> Result<Option<SubscriptionResult>, ResultStoreError> {
        let _guard = sub.results_lock().lock().await;
        Ok(self
            .load(sub.id())
            .await?
            .into_iter()
            .find(|r| r.id == result_id))
    }

    pub async fn delete_results(
        &self,
        sub: &Subscription,
        result_ids: &[String],
    ) -> Result<(), ResultStoreError> {
        let ids: HashSet<&String> = result_ids.iter().collect();
        let now = now_ms();
        self.modify(sub, |results| {
            let mut changed = false;
            for r in results.iter_mut().filter(|r| !r.deleted && ids.contains(&r.id)) {
                r.delete(now);
                changed = true;
            }
            changed
        })
        .await
    }

    pub async fn delete_all(&self, sub: &Subscription) -> Result<(), ResultStoreError> {
        let now = now_ms();
        self.modify(sub, |results| {
            let mut changed = false;
            for r in results.iter_mut().filter(|r| !r.deleted) {
                r.delete(now);
                changed = true;
            }
            changed
        })
        .await
    }

    async fn set_all_read(&self, sub: &Subscription, read: bool) -> Result<(), ResultStoreError> {
        self.modify(sub, |results| {
            let mut changed = false;
            for r in results.iter_mut().filter(|r| !r.deleted && r.read != read) {
                r.read = read;
                changed = true;
            }
            changed
        })
        .await
    }

    pub async fn mark_all_read(&self, sub: &Subscription) -> Result<(), ResultStoreError> {
        self.set_all_read(sub, true).await
    }

    pub async fn mark_all_unread(&self, sub: &Subscription) -> Result<(), ResultStoreError> {
        self.set_all_read(sub, false).await
    }

    /// Set the read state of individual results; `reads[i]` applies to `result_ids[i]`.
    pub async fn mark_results(
        &self,
        sub: &Subscription,
        result_ids: &[String],
        reads: &[bool],
    ) -> Result<(), ResultStoreError> {
        if result_ids.len() != reads.len() {
            return Err(anyhow::anyhow!(
                "{} result ids but {} read states",
                result_ids.len(),
                reads.len()
            )
            .into());
        }
        self.modify(sub, |results| {
            let mut changed = false;
            for (id, read) in result_ids.iter().zip(reads) {
                if let Some(r) = results.iter_mut().find(|r| &r.id == id) {
                    if r.read != *read {
                        r.read = *read;
                        changed = true;
                    }
                }
            }
            changed
        })
        .await
    }

    /// Re-apply the result cap, e.g. after `max_results` was lowered.
    pub async fn check_max_results(&self, sub: &Subscription) -> Result<(), ResultStoreError> {
        let max_results = sub
            .history()
            .max_results
            .unwrap_or(self.default_max_results());
        let now = now_ms();
        self.modify(sub, |results| {
            reconcile(results, Vec::new(), false, max_results, now).changed
        })
        .await
    }

    /// Forget every result and the poll history, so the next poll is a first scan.
    pub async fn reset(&self, sub: &Subscription) -> Result<(), ResultStoreError> {
        {
            let _guard = sub.results_lock().lock().await;
            self.remove(sub.id()).await?;
            sub.update_history(|h| {
                h.last_scan = 0;
                h.last_new_result = 0;
                h.num_read = 0;
                h.num_unread = 0;
                h.clear_error();
            });
        }
        sub.events().publish(SubscriptionEvent::ResultsChanged {
            id: sub.id().to_string(),
            new_unread: 0,
        });
        Ok(())
    }

    /// Delete the persisted result set of `id`.
    pub async fn remove(&self, id: &str) -> Result<(), ResultStoreError> {
        self.cache.lock().retain(|(cid, _)| cid != id);
        storage::remove_resilient(&self.path(id)).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::Envelope;
    use crate::events::EventBus;
    use crate::subscription::{AddType, Query};
    use tempfile::TempDir;

    fn subscription(bus: EventBus) -> Subscription {
        let payload = Query::new("web").with_interval(120).to_payload().unwrap();
        let env = Envelope::create("s", true, false, payload, None).unwrap();
        Subscription::new(env, AddType::Create, 0, bus)
    }

    fn items(names: &[&str]) -> Vec<ResultItem> {
        names.iter().map(|n| ResultItem::new(n)).collect()
    }

    #[tokio::test]
    async fn test_poll_scenario() {
        let dir = TempDir::new().unwrap();
        let store = ResultStore::new(dir.path(), 0);
        let bus = EventBus::new();
        let sub = subscription(bus.clone());
        let mut rx = bus.subscribe();

        // first poll: everything read
        store.reconcile(&sub, items(&["a", "b", "c"])).await.unwrap();
        let h = sub.history();
        assert_eq!((h.num_read, h.num_unread), (3, 0));
        assert!(h.last_scan > 0);

        // same rows again: no change, no results event
        while rx.try_recv().is_some() {}
        let out = store.reconcile(&sub, items(&["a", "b", "c"])).await.unwrap();
        assert!(!out.needs_save());
        assert!(std::iter::from_fn(|| rx.try_recv())
            .all(|e| !matches!(e, SubscriptionEvent::ResultsChanged { .. })));

        // changed payload for an existing name merges in place
        let mut changed = ResultItem::new("b");
        changed.seeds = 77;
        store.reconcile(&sub, vec![changed]).await.unwrap();
        assert_eq!(sub.history().num_unread, 0);
        let all = store.results(&sub, true).await.unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[1].item.seeds, 77);
    }

    #[tokio::test]
    async fn test_persisted_across_instances() {
        let dir = TempDir::new().unwrap();
        let sub = subscription(EventBus::new());
        {
            let store = ResultStore::new(dir.path(), 0);
            store.reconcile(&sub, items(&["a"])).await.unwrap();
            store.reconcile(&sub, items(&["b"])).await.unwrap();
        }
        let store = ResultStore::new(dir.path(), 0);
        let results = store.results(&sub, false).await.unwrap();
        assert_eq!(results.len(), 2);
        assert!(results[0].read);
        assert!(!results[1].read);
    }

    #[tokio::test]
    async fn test_mark_and_delete() {
        let dir = TempDir::new().unwrap();
        let store = ResultStore::new(dir.path(), 0);
        let sub = subscription(EventBus::new());
        sub.update_history(|h| h.last_scan = 1);
        store.reconcile(&sub, items(&["a", "b", "c"])).await.unwrap();
        assert_eq!(sub.history().num_unread, 3);

        let ids: Vec<String> = store
            .results(&sub, false)
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect();

        store
            .mark_results(&sub, &ids[..2], &[true, false])
            .await
            .unwrap();
        assert_eq!(sub.history().num_unread, 2);

        store.delete_results(&sub, &ids[..1]).await.unwrap();
        assert_eq!(sub.history().num_read, 0);
        assert_eq!(store.results(&sub, false).await.unwrap().len(), 2);
        assert_eq!(store.results(&sub, true).await.unwrap().len(), 3);

        store.mark_all_read(&sub).await.unwrap();
        assert_eq!(sub.history().num_unread, 0);
        store.mark_all_unread(&sub).await.unwrap();
        assert_eq!(sub.history().num_unread, 2);

        store.delete_all(&sub).await.unwrap();
        assert_eq!(sub.history().num_unread, 0);
        assert!(store
            .mark_results(&sub, &ids, &[true])
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_lowering_cap_soft_deletes() {
        let dir = TempDir::new().unwrap();
        let store = ResultStore::new(dir.path(), 0);
        let sub = subscription(EventBus::new());
        store
            .reconcile(&sub, items(&["a", "b", "c", "d"]))
            .await
            .unwrap();

        sub.update_history(|h| h.max_results = Some(2));
        store.check_max_results(&sub).await.unwrap();
        assert_eq!(store.results(&sub, false).await.unwrap().len(), 2);
        assert_eq!(store.results(&sub, true).await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_reset_makes_next_poll_a_first_scan() {
        let dir = TempDir::new().unwrap();
        let store = ResultStore::new(dir.path(), 0);
        let sub = subscription(EventBus::new());
        store.reconcile(&sub, items(&["a"])).await.unwrap();

        store.reset(&sub).await.unwrap();
        assert_eq!(sub.history().last_scan, 0);
        assert!(store.results(&sub, true).await.unwrap().is_empty());
        assert!(!dir.path().join(format!("{}.json", sub.id())).exists());
    }

    #[tokio::test]
    async fn test_cache_is_bounded() {
        let dir = TempDir::new().unwrap();
        let store = ResultStore::new(dir.path(), 0);
        for _ in 0..(RESULT_CACHE_SIZE + 2) {
            let sub = subscription(EventBus::new());
            store.reconcile(&sub, items(&["a"])).await.unwrap();
        }
        assert_eq!(store.cache.lock().len(), RESULT_CACHE_SIZE);
    }
}
