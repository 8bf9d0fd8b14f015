//! Automatic downloads of new results
//!
//! Subscriptions with `auto_dl` set have every new unread result queued here.
//! A bounded pool of workers fetches them through the [`ResultDownloader`];
//! a finished download becomes an association of the subscription.
//!
//! [`ResultDownloader`]: crate::providers::ResultDownloader

use crate::clock::{now_ms, DAY_MS};
use crate::providers::DownloadError;
use crate::subscription::Subscription;

use super::{Scheduler, SchedulerError};

impl Scheduler {
    /// Queue `result_id` of `sub` for download unless it already is queued.
    pub(super) fn queue_result_download(&self, sub: &Subscription, result_id: String) {
        let key = format!("{}:{}", sub.id(), result_id);
        if !self.0.state.lock().active_downloads.insert(key.clone()) {
            return;
        }

        let scheduler = self.clone();
        let sub = sub.clone();
        tokio::spawn(async move {
            let permit = scheduler.0.download_slots.clone().acquire_owned().await;
            if permit.is_ok() {
                if let Err(e) = scheduler.download_result(&sub, &result_id).await {
                    tracing::info!(id = %sub.id(), result_id, "result download failed: {}", e);
                    if let Err(e) = scheduler.mark_stale_result_read(&sub, &result_id, now_ms()).await {
                        tracing::warn!(id = %sub.id(), result_id, "failed to mark result read: {}", e);
                    }
                }
            }
            drop(permit);
            scheduler.0.state.lock().active_downloads.remove(&key);
            scheduler.calculate_schedule();
        });
    }

    /// Whether a download of `result_id` of `sub` is queued or running
    pub fn is_downloading(&self, sub: &Subscription, result_id: &str) -> bool {
        self.0
            .state
            .lock()
            .active_downloads
            .contains(&format!("{}:{}", sub.id(), result_id))
    }

    /// Number of result downloads queued or running
    pub fn active_downloads(&self) -> usize {
        self.0.state.lock().active_downloads.len()
    }

    /// Fetch one result now.
    ///
    /// Deleted and already read results, and ones without a link, are skipped
    /// with `Ok(false)`. A download that fails to decode is retried once with
    /// the referer setting flipped; if that works the flipped setting is kept
    /// for the subscription.
    pub async fn download_result(
        &self,
        sub: &Subscription,
        result_id: &str,
    ) -> Result<bool, SchedulerError> {
        let results = self.0.registry.results();
        let Some(result) = results.result(sub, result_id).await? else {
            return Ok(false);
        };
        if result.deleted || result.read {
            return Ok(false);
        }
        let Some(link) = result.item.link.as_deref() else {
            return Ok(false);
        };

        let referer = sub.query()?.referer;
        let with_ref = sub.history().dl_with_ref;
        let pick = |use_ref: bool| if use_ref { referer.as_deref() } else { None };

        let downloader = &self.0.downloader;
        let (hash, used_ref) = match downloader.download(link, pick(with_ref)).await {
            Ok(hash) => (hash, with_ref),
            Err(DownloadError::Decode(message)) => {
                tracing::debug!(id = %sub.id(), result_id, "retrying download with referer {}: {}", !with_ref, message);
                (downloader.download(link, pick(!with_ref)).await?, !with_ref)
            }
            Err(e) => return Err(e.into()),
        };

        tracing::info!(id = %sub.id(), result_id, %hash, "result downloaded");
        if used_ref != with_ref {
            sub.update_history(|h| h.dl_with_ref = used_ref);
        }
        sub.add_association(hash);
        results
            .mark_results(sub, &[result_id.to_string()], &[true])
            .await?;
        Ok(true)
    }

    /// Give up on a result that keeps failing once it is old enough.
    async fn mark_stale_result_read(
        &self,
        sub: &Subscription,
        result_id: &str,
        now: i64,
    ) -> Result<(), SchedulerError> {
        let days = self.0.config.mark_read_after_days;
        if days == 0 {
            return Ok(());
        }
        let results = self.0.registry.results();
        let Some(result) = results.result(sub, result_id).await? else {
            return Ok(());
        };
        if result.found_at + days as i64 * DAY_MS < now {
            tracing::info!(id = %sub.id(), result_id, days, "marking undownloadable result read");
            results
                .mark_results(sub, &[result_id.to_string()], &[true])
                .await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::config::SchedulerConfig;
    use crate::content_id::ContentId;
    use crate::results::ResultItem;
    use crate::testkit::TestNetwork;

    fn linked(name: &str) -> ResultItem {
        let mut item = ResultItem::new(name);
        item.link = Some(format!("https://tracker.example.com/{}", name));
        item
    }

    async fn unread_result(peer: &crate::testkit::TestPeer, sub: &crate::subscription::Subscription, name: &str) -> String {
        let results = peer.registry.results();
        let outcome = results.reconcile(sub, vec![linked(name)]).await.unwrap();
        let id = outcome.new_ids[0].clone();
        results
            .mark_results(sub, &[id.clone()], &[false])
            .await
            .unwrap();
        id
    }

    #[tokio::test]
    async fn test_downloaded_result_becomes_association() {
        let network = TestNetwork::new();
        let peer = network.peer("a").await;
        let sub = peer.create_public("episodes").await;
        let id = unread_result(&peer, &sub, "ep1").await;
        let hash = ContentId::new(vec![7; 20]);
        network
            .downloader()
            .serve("https://tracker.example.com/ep1", hash.clone());

        assert!(peer.scheduler.download_result(&sub, &id).await.unwrap());
        assert!(sub.has_association(&hash));
        let stored = peer.registry.results().result(&sub, &id).await.unwrap().unwrap();
        assert!(stored.read);

        // already read now
        assert!(!peer.scheduler.download_result(&sub, &id).await.unwrap());
        assert_eq!(network.downloader().calls().len(), 1);
    }

    #[tokio::test]
    async fn test_decode_failure_flips_referer() {
        let network = TestNetwork::new();
        let peer = network.peer("a").await;
        let sub = peer.create_public("picky").await;
        let id = unread_result(&peer, &sub, "ep2").await;
        network.downloader().serve_without_referer(
            "https://tracker.example.com/ep2",
            ContentId::new(vec![8; 20]),
        );
        assert!(sub.history().dl_with_ref);

        assert!(peer.scheduler.download_result(&sub, &id).await.unwrap());
        assert!(!sub.history().dl_with_ref);
        let calls = network.downloader().calls();
        assert_eq!(calls.len(), 2);
        assert!(calls[0].1.is_some());
        assert!(calls[1].1.is_none());
    }

    #[tokio::test]
    async fn test_old_failing_result_marked_read() {
        let network = TestNetwork::new();
        let peer = network
            .peer_with_scheduler("a", SchedulerConfig {
                mark_read_after_days: 1,
                ..SchedulerConfig::default()
            })
            .await;
        let sub = peer.create_public("broken").await;
        let id = unread_result(&peer, &sub, "missing").await;

        // fresh results stay unread
        peer.scheduler.queue_result_download(&sub, id.clone());
        assert!(peer.scheduler.is_downloading(&sub, &id));
        peer.wait_downloads_idle().await;
        assert_eq!(network.downloader().calls().len(), 1);
        let stored = peer.registry.results().result(&sub, &id).await.unwrap().unwrap();
        assert!(!stored.read);

        peer.scheduler
            .mark_stale_result_read(&sub, &id, stored.found_at + 2 * crate::clock::DAY_MS)
            .await
            .unwrap();
        let stored = peer.registry.results().result(&sub, &id).await.unwrap().unwrap();
        assert!(stored.read);
    }
}
