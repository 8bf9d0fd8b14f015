//! Gossip of subscriptions over the DHT
//!
//! Two kinds of record are announced and read back:
//!
//! * **associations**, under `subscription:assoc:<content id>`, say "this
//!   subscription found this content". Reading them is how a peer discovers
//!   subscriptions it did not know about; the tick reads them for content
//!   this peer downloaded every `lookup_every_ticks`.
//! * **presence records**, under `subscription:publish:<short id>:<version>`,
//!   prove a version of a subscription exists and carry what is needed to
//!   fetch and verify its envelope.
//!
//! Every announcement is read-before-write: when a key already holds enough
//! copies, or the DHT reports it as diversified, nothing is written.
//!
//! A version higher than ours seen in any announcement is never trusted on
//! its own. It queues an upgrade check that reads the presence record for
//! exactly that version, verifies it against the public key we already hold,
//! fetches the envelope and only then asks the [`UpgradePrompt`].
//!
//! Nothing in here propagates network failures to callers of the background
//! loops: they are logged and the next tick tries again.

mod fetch;
mod lookup;
mod presence;
mod publish;
mod record;
mod upgrade;

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::{watch, Semaphore};
use tokio::time::{interval, MissedTickBehavior};

use crate::clock::now_ms;
use crate::config::DiscoveryConfig;
use crate::dht::{Dht, DhtError};
use crate::envelope::EnvelopeError;
use crate::events::{ChangeReason, SubscriptionEvent};
use crate::jobs::{Job, JobDispatcher, JobReceiver};
use crate::providers::{ContentFetcher, Directory, FetchError, UpgradePrompt};
use crate::registry::{Registry, RegistryError};
use crate::subscription::SubscriptionError;

pub use fetch::{fetch_envelope, MAX_ENVELOPE_SIZE, RESOLVE_TIMEOUT, SIZE_SLOP};
pub use lookup::{LookupEvent, LookupHandle, LookupOutcome};
pub use presence::{decode as decode_presence, encode as encode_presence, PresenceError};
pub use record::{AssociationRecord, ASSOCIATION_RECORD_SIZE, MAX_RECORD_VERSION};

/// Concurrent association announcements; one while the DHT sleeps
pub const PUBLISH_ASSOCIATIONS_MAX: usize = 3;
/// Concurrent envelope downloads for lookups and upgrades
pub const MAX_ENVELOPE_DOWNLOADS: usize = 8;

/// A key holding this many copies is not written to again
const PUBLISH_HITS_ENOUGH: usize = 10;
/// Below this many copies a write asks replicas to keep the value longer
const PUBLISH_HITS_THIN: usize = 3;

const DHT_READ_TIMEOUT: Duration = Duration::from_secs(60);
const SLEEPING_PUBLISH_DELAY: Duration = Duration::from_secs(60);
/// Potential associations are tidied every this-many ticks
const TIDY_EVERY_TICKS: u64 = 60;

#[derive(Debug, thiserror::Error)]
pub enum LookupError {
    #[error("default error: {0}")]
    Default(#[from] anyhow::Error),
    #[error("lookup cancelled")]
    Cancelled,
    #[error("dht error: {0}")]
    Dht(#[from] DhtError),
    #[error("fetch error: {0}")]
    Fetch(#[from] FetchError),
    #[error("envelope error: {0}")]
    Envelope(#[from] EnvelopeError),
    #[error("presence record error: {0}")]
    Presence(#[from] PresenceError),
    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),
    #[error("subscription error: {0}")]
    Subscription(#[from] SubscriptionError),
    /// A fetched envelope is not the one the announcement promised
    #[error("envelope mismatch: {0}")]
    Mismatch(String),
    #[error("no popularity available")]
    NoPopularity,
}

#[derive(Debug, Default)]
struct DiscoveryState {
    publish_assoc_active: usize,
    /// A delayed association publish is already queued
    publish_next_pending: bool,
    presence_active: bool,
    /// A periodic association lookup is running
    periodic_lookup_active: bool,
    ticks: u64,
}

struct DiscoveryInner {
    registry: Registry,
    dht: Arc<dyn Dht>,
    fetcher: Arc<dyn ContentFetcher>,
    directory: Arc<dyn Directory>,
    prompt: Arc<dyn UpgradePrompt>,
    config: DiscoveryConfig,
    jobs: JobDispatcher,
    /// Fixed per process, see [`AssociationRecord`]
    salt: u8,
    /// Fixed per process, see [`encode_presence`]
    seed: u32,
    /// One permit per concurrent envelope download
    envelope_downloads: Semaphore,
    state: Mutex<DiscoveryState>,
}

/// Handle to the gossip protocol of one peer
#[derive(Clone)]
pub struct Discovery(Arc<DiscoveryInner>);

impl std::fmt::Debug for Discovery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Discovery")
            .field("dht", &self.0.dht)
            .field("state", &*self.0.state.lock())
            .field(
                "envelope_downloads",
                &self.0.envelope_downloads.available_permits(),
            )
            .finish()
    }
}

/// Scale a read timeout for the slower anonymous network.
fn scaled(base: Duration, anonymous: bool, factor: u32) -> Duration {
    if anonymous {
        base * factor
    } else {
        base
    }
}

impl Discovery {
    /// Create the protocol handle and the receiver its worker drains.
    ///
    /// Pass the receiver to [`Discovery::run`].
    pub fn new(
        registry: Registry,
        dht: Arc<dyn Dht>,
        fetcher: Arc<dyn ContentFetcher>,
        directory: Arc<dyn Directory>,
        prompt: Arc<dyn UpgradePrompt>,
        config: DiscoveryConfig,
    ) -> (Self, JobReceiver) {
        let (jobs, receiver) = JobDispatcher::new();
        let discovery = Self(Arc::new(DiscoveryInner {
            registry,
            dht,
            fetcher,
            directory,
            prompt,
            config,
            jobs,
            salt: rand::random(),
            seed: rand::random(),
            envelope_downloads: Semaphore::new(MAX_ENVELOPE_DOWNLOADS),
            state: Mutex::new(DiscoveryState::default()),
        }));
        (discovery, receiver)
    }

    pub fn registry(&self) -> &Registry {
        &self.0.registry
    }

    pub fn jobs(&self) -> &JobDispatcher {
        &self.0.jobs
    }

    /// Drive jobs, registry events and the periodic tick until `shutdown` fires.
    pub async fn run(self, jobs: JobReceiver, mut shutdown: watch::Receiver<()>) {
        let mut job_stream = jobs.into_async();
        let mut events = self.0.registry.events().subscribe();
        let mut ticker = interval(self.0.config.tick());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // the first tick completes immediately
        ticker.tick().await;

        tracing::info!(tick = ?self.0.config.tick(), "discovery worker started");
        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    tracing::info!("discovery worker shutting down");
                    break;
                }

                Some(job) = job_stream.next() => self.spawn_job(job),

                Some(event) = events.recv() => self.handle_event(event),

                _ = ticker.tick() => self.tick().await,

                else => {
                    tracing::info!("discovery job queue closed, shutting down worker");
                    break;
                }
            }
        }
    }

    fn spawn_job(&self, job: Job) {
        let discovery = self.clone();
        match job {
            Job::CheckUpgrade { id, version } => {
                let Some(sub) = self.0.registry.get(&id) else {
                    return;
                };
                tokio::spawn(async move {
                    match discovery.check_upgrade(&sub, version).await {
                        Ok(true) => {}
                        Ok(false) => tracing::debug!(%id, version, "no upgrade applied"),
                        Err(e) => tracing::info!(%id, version, "upgrade check failed: {}", e),
                    }
                });
            }
            Job::LookupPopularity { id } => {
                let Some(sub) = self.0.registry.get(&id) else {
                    return;
                };
                tokio::spawn(async move {
                    match discovery.popularity(&sub).await {
                        Ok(popularity) => tracing::debug!(%id, popularity, "popularity refreshed"),
                        Err(e) => tracing::debug!(%id, "popularity lookup failed: {}", e),
                    }
                });
            }
        }
    }

    fn handle_event(&self, event: SubscriptionEvent) {
        match event {
            SubscriptionEvent::Changed {
                reason: ChangeReason::Associations,
                ..
            } => self.publish_associations(),
            SubscriptionEvent::Added { .. }
            | SubscriptionEvent::Upgraded { .. }
            | SubscriptionEvent::Changed {
                reason: ChangeReason::Details | ChangeReason::Metadata,
                ..
            } => self.publish_presence(),
            _ => {}
        }
    }

    /// One periodic pass of housekeeping and publishing.
    pub async fn tick(&self) {
        let ticks = {
            let mut state = self.0.state.lock();
            state.ticks += 1;
            state.ticks
        };
        let now = now_ms();

        match self.0.registry.expire_unused(now).await {
            Ok(Some(id)) => tracing::debug!(%id, "expired unused subscription"),
            Ok(None) => {}
            Err(e) => tracing::warn!("failed to expire unused subscription: {}", e),
        }

        let every = self.0.config.publish_every_ticks.max(1);
        if ticks % every == 0 && self.associations_pending() {
            self.publish_associations();
        }
        self.publish_presence();

        let every = self.0.config.lookup_every_ticks.max(1);
        if self.0.config.lookup_associations && ticks % every == 0 {
            self.periodic_association_lookup(now);
        }

        if ticks % TIDY_EVERY_TICKS == 0 {
            self.0.registry.tidy_potential_associations(now);
        }
    }

    fn associations_pending(&self) -> bool {
        self.0
            .registry
            .subscriptions(true)
            .iter()
            .any(|s| s.is_public() && s.associations_remaining_for_publish() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content_id::ContentId;
    use crate::testkit::{PeerOptions, TestNetwork};

    #[tokio::test]
    async fn test_tick_looks_up_associations_of_downloaded_content() {
        let network = TestNetwork::new();
        let alice = network.peer("alice").await;
        let bob = network
            .peer_with(
                "bob",
                PeerOptions {
                    discovery: DiscoveryConfig {
                        lookup_every_ticks: 1,
                        ..DiscoveryConfig::default()
                    },
                    ..PeerOptions::default()
                },
            )
            .await;

        let content = ContentId::new(vec![5; 20]);
        let theirs = alice.create_public("theirs").await;
        theirs.add_association(content.clone());
        assert!(alice.discovery.publish_association(&theirs, &content).await.unwrap());
        assert!(alice.discovery.publish_presence_for(&theirs).await.unwrap());
        network.serve_envelope(&theirs);

        // bob downloaded the same content through another subscription
        let local = bob.create_public("local").await;
        local.add_association(content.clone());

        bob.discovery.tick().await;
        tokio::time::timeout(Duration::from_secs(5), async {
            while bob.registry.associations_for(&content).is_none() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("periodic lookup did not run");

        let found = bob.registry.get(theirs.id()).unwrap();
        assert!(!found.is_subscribed());
        assert!(bob.registry.associations_for(&content).unwrap().full_lookup);
        // looked up content is not due again right away
        assert_eq!(bob.registry.association_lookup_candidate(now_ms()), None);
    }

    #[test]
    fn test_scaled_timeouts() {
        assert_eq!(scaled(DHT_READ_TIMEOUT, false, 2), DHT_READ_TIMEOUT);
        assert_eq!(
            scaled(DHT_READ_TIMEOUT, true, 2),
            Duration::from_secs(120)
        );
    }
}
