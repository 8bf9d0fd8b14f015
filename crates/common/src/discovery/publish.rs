//! Announcing associations and presence records

use rand::seq::SliceRandom;

use crate::content_id::ContentId;
use crate::dht::{association_key, presence_key, DhtFlags, GetRequest};
use crate::subscription::{Association, Subscription};

use super::presence;
use super::record::AssociationRecord;
use super::{
    scaled, Discovery, LookupError, DHT_READ_TIMEOUT, PUBLISH_ASSOCIATIONS_MAX,
    PUBLISH_HITS_ENOUGH, PUBLISH_HITS_THIN, SLEEPING_PUBLISH_DELAY,
};

const ASSOCIATION_READ_MAX: usize = 30;
const PRESENCE_READ_MAX: usize = 24;

impl Discovery {
    /// Start announcing unpublished associations, up to the concurrency cap.
    ///
    /// Each worker announces one pair and then starts the next, so this only
    /// needs calling when new associations show up.
    pub fn publish_associations(&self) {
        if !self.0.config.publish_associations {
            return;
        }
        while self.spawn_association_publish() {}
    }

    fn spawn_association_publish(&self) -> bool {
        let cap = if self.0.dht.is_sleeping() {
            1
        } else {
            PUBLISH_ASSOCIATIONS_MAX
        };

        let (sub, assoc) = {
            let mut state = self.0.state.lock();
            if state.publish_assoc_active >= cap {
                return false;
            }
            let Some(pair) = self.next_association() else {
                return false;
            };
            state.publish_assoc_active += 1;
            pair
        };

        let discovery = self.clone();
        tokio::spawn(async move {
            match discovery.publish_association(&sub, &assoc.hash).await {
                Ok(written) => {
                    tracing::debug!(id = %sub.id(), hash = %assoc.hash, written, "association published")
                }
                Err(e) => {
                    tracing::info!(id = %sub.id(), hash = %assoc.hash, "association publish failed: {}", e)
                }
            }
            discovery.0.state.lock().publish_assoc_active -= 1;
            discovery.publish_next_association().await;
        });
        true
    }

    async fn publish_next_association(&self) {
        if self.0.dht.is_sleeping() {
            {
                let mut state = self.0.state.lock();
                if state.publish_next_pending {
                    return;
                }
                state.publish_next_pending = true;
            }
            tokio::time::sleep(SLEEPING_PUBLISH_DELAY).await;
            self.0.state.lock().publish_next_pending = false;
        }
        self.publish_associations();
    }

    /// Next unpublished association of a subscribed public subscription,
    /// marked published as it is handed out.
    fn next_association(&self) -> Option<(Subscription, Association)> {
        self.0
            .registry
            .subscriptions(true)
            .into_iter()
            .filter(|sub| sub.is_public())
            .find_map(|sub| {
                let assoc = sub.take_association_for_publish()?;
                Some((sub, assoc))
            })
    }

    /// Announce that `sub` is associated with `hash`.
    ///
    /// Returns whether a record was written; a key that already holds
    /// enough of our announcement, or is diversified, is left alone.
    pub async fn publish_association(
        &self,
        sub: &Subscription,
        hash: &ContentId,
    ) -> Result<bool, LookupError> {
        let dht = &self.0.dht;
        dht.wait_ready().await;
        let anonymous = sub.is_anonymous();
        let key = association_key(hash);
        let ours = AssociationRecord::new(&sub.short_id(), sub.version(), self.0.salt);
        let encoded = ours.encode();

        let request = GetRequest::new(ASSOCIATION_READ_MAX, scaled(DHT_READ_TIMEOUT, anonymous, 2))
            .allow_diversify();
        let outcome = dht.get(&key, request).await?;

        let mut hits = 0;
        let mut max_version = 0;
        for value in &outcome.values {
            if value.value.len() != encoded.len() {
                continue;
            }
            let Some(record) = AssociationRecord::decode(&value.value) else {
                continue;
            };
            if record.same_announcement(&ours) {
                hits += 1;
                max_version = max_version.max(record.version);
            }
        }

        if max_version > sub.version() && !sub.is_mine() {
            tracing::debug!(id = %sub.id(), max_version, "higher version announced");
            if let Err(e) = self.0.jobs.dispatch_upgrade_check(sub.id(), max_version) {
                tracing::warn!("failed to queue upgrade check: {}", e);
            }
        }

        if hits >= PUBLISH_HITS_ENOUGH || outcome.diversified {
            return Ok(false);
        }

        let mut flags = DhtFlags::ANON;
        if hits < PUBLISH_HITS_THIN {
            flags = flags | DhtFlags::PRECIOUS;
        }
        if anonymous {
            flags = flags | DhtFlags::BRIDGED;
        }
        dht.put(&key, encoded, flags).await?;
        Ok(true)
    }

    /// Announce the next subscribed public subscription whose current version
    /// has not been announced yet.
    ///
    /// One announcement runs at a time; each one starts the next when done.
    pub fn publish_presence(&self) {
        if !self.0.config.publish_subscriptions {
            return;
        }

        let sub = {
            let mut state = self.0.state.lock();
            if state.presence_active {
                return;
            }
            let mut subs = self.0.registry.subscriptions(true);
            subs.shuffle(&mut rand::rng());
            let Some(sub) = subs
                .into_iter()
                .find(|s| s.is_public() && !s.is_published())
            else {
                return;
            };
            sub.set_published(true);
            state.presence_active = true;
            sub
        };

        let discovery = self.clone();
        tokio::spawn(async move {
            match discovery.publish_presence_for(&sub).await {
                Ok(written) => {
                    tracing::debug!(id = %sub.id(), version = sub.version(), written, "presence published")
                }
                Err(e) => {
                    tracing::info!(id = %sub.id(), "presence publish failed: {}", e)
                }
            }
            discovery.0.state.lock().presence_active = false;
            discovery.publish_presence();
        });
    }

    /// Announce the current version of `sub` under its presence key.
    ///
    /// Returns whether a record was written. Records that would not fit in a
    /// DHT value are never written.
    pub async fn publish_presence_for(&self, sub: &Subscription) -> Result<bool, LookupError> {
        let dht = &self.0.dht;
        dht.wait_ready().await;
        let anonymous = sub.is_anonymous();
        let version = sub.version();
        let key = presence_key(&sub.short_id(), version);

        let request = GetRequest::new(PRESENCE_READ_MAX, scaled(DHT_READ_TIMEOUT, anonymous, 2))
            .with_flags(DhtFlags::SINGLE_VALUE)
            .allow_diversify();
        let outcome = dht.get(&key, request).await?;

        let hits = outcome
            .values
            .iter()
            .filter_map(|v| presence::decode(&v.value).ok())
            .filter(|details| sub.verified_publication_version(details) == Some(version))
            .count();

        if hits >= PUBLISH_HITS_ENOUGH || outcome.diversified {
            return Ok(false);
        }

        let blob = presence::encode(&sub.publication_details(), self.0.seed)?;
        if blob.len() >= dht.max_value_size() {
            tracing::warn!(
                id = %sub.id(),
                size = blob.len(),
                max = dht.max_value_size(),
                "presence record too large to publish"
            );
            return Ok(false);
        }

        let mut flags = DhtFlags::SINGLE_VALUE;
        if hits < PUBLISH_HITS_THIN {
            flags = flags | DhtFlags::PRECIOUS;
        }
        if anonymous {
            flags = flags | DhtFlags::BRIDGED;
        }
        dht.put(&key, blob, flags).await?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dht::Dht;
    use crate::testkit::TestNetwork;

    #[tokio::test]
    async fn test_association_publish_flags() {
        let network = TestNetwork::new();
        let alice = network.peer("alice").await;
        let sub = alice.create_public("shows").await;
        let content = ContentId::new(vec![9; 20]);

        assert!(alice.discovery.publish_association(&sub, &content).await.unwrap());
        let key = association_key(&content);
        let flags = network.dht().flags_of(&key, "alice").unwrap();
        assert!(flags.contains(DhtFlags::ANON | DhtFlags::PRECIOUS));
        assert!(!flags.contains(DhtFlags::BRIDGED));
    }

    #[tokio::test]
    async fn test_association_publish_skipped_when_enough_copies() {
        let network = TestNetwork::new();
        let alice = network.peer("alice").await;
        let sub = alice.create_public("popular").await;
        let content = ContentId::new(vec![4; 20]);
        let key = association_key(&content);

        for i in 0..PUBLISH_HITS_ENOUGH {
            let record = AssociationRecord::new(&sub.short_id(), sub.version(), i as u8).encode();
            network
                .dht()
                .node(&format!("n{}", i))
                .put(&key, record, DhtFlags::ANON)
                .await
                .unwrap();
        }
        assert!(!alice.discovery.publish_association(&sub, &content).await.unwrap());
        assert!(network.dht().flags_of(&key, "alice").is_none());
    }

    #[tokio::test]
    async fn test_association_publish_skipped_when_diversified() {
        let network = TestNetwork::new();
        let alice = network.peer("alice").await;
        let sub = alice.create_public("hot").await;
        let content = ContentId::new(vec![5; 20]);
        network.dht().set_diversified(&association_key(&content), true);

        assert!(!alice.discovery.publish_association(&sub, &content).await.unwrap());
    }

    #[tokio::test]
    async fn test_higher_announced_version_queues_upgrade_check() {
        let network = TestNetwork::new();
        let alice = network.peer("alice").await;
        let bob = network.peer("bob").await;
        let sub = alice.create_public("evolving").await;
        let theirs = bob.adopt(&sub);
        theirs.set_subscribed(true);

        let content = ContentId::new(vec![6; 20]);
        let record = AssociationRecord::new(&sub.short_id(), 9, 1).encode();
        network
            .dht()
            .node("carol")
            .put(&association_key(&content), record, DhtFlags::ANON)
            .await
            .unwrap();

        bob.discovery.publish_association(&theirs, &content).await.unwrap();
        let jobs = bob.take_jobs();
        assert!(jobs.contains(&crate::jobs::Job::CheckUpgrade {
            id: sub.id().to_string(),
            version: 9
        }));
    }

    #[tokio::test]
    async fn test_second_publish_in_cycle_is_noop() {
        let network = TestNetwork::new();
        let alice = network.peer("alice").await;
        let sub = alice.create_public("once").await;
        sub.add_association(ContentId::new(vec![8; 20]));

        let first = alice.discovery.next_association();
        assert!(first.is_some());
        assert!(alice.discovery.next_association().is_none());
        assert_eq!(sub.associations_remaining_for_publish(), 0);
    }

    #[tokio::test]
    async fn test_presence_publish_and_verify() {
        let network = TestNetwork::new();
        let alice = network.peer("alice").await;
        let sub = alice.create_public("announced").await;

        assert!(alice.discovery.publish_presence_for(&sub).await.unwrap());
        let key = presence_key(&sub.short_id(), sub.version());
        let stored = network
            .dht()
            .node("reader")
            .get(&key, GetRequest::new(10, DHT_READ_TIMEOUT))
            .await
            .unwrap();
        let details = presence::decode(&stored.values[0].value).unwrap();
        assert_eq!(sub.verified_publication_version(&details), Some(sub.version()));
        let flags = network.dht().flags_of(&key, "alice").unwrap();
        assert!(flags.contains(DhtFlags::SINGLE_VALUE | DhtFlags::PRECIOUS));
    }

    #[tokio::test]
    async fn test_presence_too_large_is_not_published() {
        let network = TestNetwork::new();
        let alice = network.peer_with_max_value_size("alice", 16).await;
        let sub = alice.create_public("big").await;

        assert!(!alice.discovery.publish_presence_for(&sub).await.unwrap());
        assert_eq!(
            network
                .dht()
                .value_count(&presence_key(&sub.short_id(), sub.version())),
            0
        );
    }
}
