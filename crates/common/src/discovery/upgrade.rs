//! Upgrade checks and popularity
//!
//! Both ask the directory first and fall back to the DHT. Upgrades only ever
//! act on a presence record that verifies against the public key we hold.

use std::time::Duration;

use crate::clock::now_ms;
use crate::content_id::ContentId;
use crate::dht::{presence_key, DhtFlags, GetRequest};
use crate::envelope::Envelope;
use crate::providers::DirectoryEntry;
use crate::subscription::{PublicationDetails, Subscription};

use super::presence;
use super::{scaled, Discovery, LookupError, DHT_READ_TIMEOUT};

const UPGRADE_READ_MAX: usize = 12;
const POPULARITY_TIMEOUT: Duration = Duration::from_secs(15);
/// Scale applied to popularity counts of diversified keys
const DIVERSIFIED_FACTOR: u64 = 11;
const DIVERSIFIED_FLOOR: u64 = 10;

impl Discovery {
    /// Look for a verified copy of version `new_version` of `sub` and offer it.
    ///
    /// Returns whether the upgrade was applied. Checks are rate limited per
    /// subscription, singletons never upgrade, and a version the user was
    /// already asked about is not offered again.
    pub async fn check_upgrade(
        &self,
        sub: &Subscription,
        new_version: u32,
    ) -> Result<bool, LookupError> {
        if !self.0.config.check_upgrades
            || new_version <= sub.version()
            || sub.highest_prompted_version() >= new_version
            || !sub.can_auto_upgrade_check(now_ms())
        {
            return Ok(false);
        }
        let anonymous = sub.is_anonymous();
        let short_id = sub.short_id();

        if !anonymous {
            if let Some((envelope, _)) = self.directory_envelope(&short_id, false).await {
                if envelope.version() > sub.version()
                    && envelope.public_key() == &sub.public_key()
                {
                    return self.offer_upgrade(sub, envelope).await;
                }
            }
        }

        let request = GetRequest::new(UPGRADE_READ_MAX, scaled(DHT_READ_TIMEOUT, anonymous, 2))
            .with_flags(DhtFlags::SINGLE_VALUE);
        let outcome = self
            .0
            .dht
            .get(&presence_key(&short_id, new_version), request)
            .await?;

        let verified = outcome
            .values
            .iter()
            .filter_map(|v| presence::decode(&v.value).ok())
            .find(|details| sub.verified_publication_version(details) == Some(new_version));
        let Some(PublicationDetails::Signed { hash, size, .. }) = verified else {
            tracing::debug!(id = %sub.id(), new_version, "no verified presence record");
            return Ok(false);
        };

        // a busy peer skips the check; the next announcement queues another
        let Ok(permit) = self.0.envelope_downloads.try_acquire() else {
            tracing::debug!(id = %sub.id(), "too many envelope downloads, skipping upgrade");
            return Ok(false);
        };
        let envelope = self
            .fetch_verified_envelope(&ContentId::new(hash), size, &permit)
            .await?;
        drop(permit);

        if envelope.public_key() != &sub.public_key() || envelope.version() != new_version {
            return Err(LookupError::Mismatch(format!(
                "expected version {} of {}, got version {}",
                new_version,
                sub.id(),
                envelope.version()
            )));
        }
        self.offer_upgrade(sub, envelope).await
    }

    async fn offer_upgrade(&self, sub: &Subscription, envelope: Envelope) -> Result<bool, LookupError> {
        let version = envelope.version();
        let accepted = self.0.prompt.confirm(sub, version).await;
        sub.set_highest_user_prompted_version(version);
        if !accepted {
            tracing::info!(id = %sub.id(), version, "upgrade declined");
            return Ok(false);
        }
        sub.apply_upgrade(envelope)?;
        Ok(true)
    }

    /// How many peers carry `sub`, cached on the subscription.
    pub async fn popularity(&self, sub: &Subscription) -> Result<u64, LookupError> {
        let anonymous = sub.is_anonymous();
        if !anonymous {
            match self.0.directory.lookup(&sub.short_id(), false).await {
                Ok(Some(DirectoryEntry {
                    popularity: Some(popularity),
                    ..
                })) => {
                    sub.set_cached_popularity(popularity);
                    return Ok(popularity);
                }
                Ok(None) if sub.is_singleton() => {
                    let popularity = if sub.is_subscribed() { 1 } else { 0 };
                    sub.set_cached_popularity(popularity);
                    return Ok(popularity);
                }
                Ok(_) => {}
                Err(e) => tracing::debug!(id = %sub.id(), "directory popularity failed: {}", e),
            }
        }

        let timeout = scaled(POPULARITY_TIMEOUT, anonymous, 3);
        let mut keys = vec![presence_key(&sub.short_id(), sub.version())];
        if let PublicationDetails::Signed { hash, .. } = sub.publication_details() {
            keys.push(hash);
        }
        let stats = futures::future::join_all(
            keys.iter()
                .map(|key| self.0.dht.key_stats(key, timeout)),
        )
        .await;

        let mut best = None;
        let mut diversified = false;
        for stat in stats {
            match stat {
                Ok(stat) => {
                    best = Some(best.map_or(stat.entries, |b: u64| b.max(stat.entries)));
                    diversified |= stat.diversified;
                }
                Err(e) => tracing::debug!(id = %sub.id(), "popularity read failed: {}", e),
            }
        }

        let Some(mut popularity) = best else {
            return Err(LookupError::NoPopularity);
        };
        if diversified {
            popularity = if popularity == 0 {
                DIVERSIFIED_FLOOR
            } else {
                popularity * DIVERSIFIED_FACTOR
            };
        }
        sub.set_cached_popularity(popularity);
        Ok(popularity)
    }
}
