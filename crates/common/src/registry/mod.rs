//! The owned collection of every known subscription
//!
//! A [`Registry`] is constructed once at startup and handed to the scheduler
//! and the discovery worker; nothing about it is global. It keeps the
//! subscriptions sorted by id behind one `RwLock`, owns the [`ResultStore`] and
//! the [`EventBus`], and persists everything to `subscriptions.json` in its
//! directory.

mod file;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::clock::{now_ms, DAY_MS, HOUR_MS};
use crate::config::RegistryConfig;
use crate::content_id::ContentId;
use crate::envelope::{singleton_short_id, Envelope, EnvelopeError, ShortId, SingletonDescriptor};
use crate::events::{EventBus, SubscriptionEvent};
use crate::results::{ResultStore, ResultStoreError};
use crate::storage;
use crate::subscription::{AddType, Query, Subscription, SubscriptionError};

use file::RegistryFile;

pub const CONFIG_FILE_NAME: &str = "subscriptions.json";
pub const RESULTS_DIR_NAME: &str = "results";

/// Engine that polls singleton (bare feed) subscriptions
pub const SINGLETON_ENGINE: &str = "rss";

/// Lookup results older than this are dropped once there are more than
/// [`POTENTIAL_ASSOCIATIONS_KEEP`] of them
const POTENTIAL_ASSOCIATION_TTL_MS: i64 = HOUR_MS;
const POTENTIAL_ASSOCIATIONS_KEEP: usize = 16;
/// Content already associated with more subscriptions than this is not looked up again
const LOOKUP_SKIP_KNOWN: usize = 8;
/// Spread of the per-content delay between periodic lookups
const LOOKUP_JITTER_MS: i64 = 4 * HOUR_MS;

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("default error: {0}")]
    Default(#[from] anyhow::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed registry file: {0}")]
    Json(#[from] serde_json::Error),
    #[error("envelope error: {0}")]
    Envelope(#[from] EnvelopeError),
    #[error("subscription error: {0}")]
    Subscription(#[from] SubscriptionError),
    #[error("result store error: {0}")]
    Results(#[from] ResultStoreError),
}

/// What a discovery pass learned about one piece of content
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PotentialAssociation {
    pub short_ids: Vec<ShortId>,
    /// Came from a full network lookup rather than a single local association
    pub full_lookup: bool,
    pub recorded_at: i64,
}

struct RegistryInner {
    dir: PathBuf,
    config: RwLock<RegistryConfig>,
    // sorted by id
    subs: RwLock<Vec<Subscription>>,
    results: ResultStore,
    events: EventBus,
    potential: Mutex<HashMap<ContentId, PotentialAssociation>>,
    save_lock: tokio::sync::Mutex<()>,
}

/// Cheaply cloneable handle to the registry
#[derive(Clone)]
pub struct Registry(Arc<RegistryInner>);

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("dir", &self.0.dir)
            .field("subscriptions", &self.0.subs.read().len())
            .finish()
    }
}

impl Registry {
    /// An empty registry persisting under `dir`
    pub fn new(dir: impl Into<PathBuf>, config: RegistryConfig) -> Self {
        let dir = dir.into();
        let results = ResultStore::new(dir.join(RESULTS_DIR_NAME), config.max_results);
        Self(Arc::new(RegistryInner {
            dir,
            config: RwLock::new(config),
            subs: RwLock::new(Vec::new()),
            results,
            events: EventBus::new(),
            potential: Mutex::new(HashMap::new()),
            save_lock: tokio::sync::Mutex::new(()),
        }))
    }

    /// Open the registry under `dir`, restoring whatever was saved there.
    ///
    /// Records that fail to load (bad signature, unknown schema) are logged and
    /// skipped; they disappear at the next save.
    pub async fn load(dir: impl Into<PathBuf>, config: RegistryConfig) -> Result<Self, RegistryError> {
        let registry = Self::new(dir, config);
        let path = registry.config_path();
        let Some(data) = storage::read_resilient(&path).await? else {
            tracing::info!(path = %path.display(), "no saved subscriptions");
            return Ok(registry);
        };

        let file: RegistryFile = serde_json::from_slice(&data)?;
        let mut subs = Vec::with_capacity(file.subs.len());
        for record in file.subs {
            match Subscription::from_record(record, registry.0.events.clone()) {
                Ok(sub) => subs.push(sub),
                Err(e) => tracing::warn!("skipping unreadable subscription record: {}", e),
            }
        }
        subs.sort_by(|a, b| a.id().cmp(b.id()));
        subs.dedup_by(|a, b| a.id() == b.id());
        tracing::info!(count = subs.len(), "subscriptions loaded");

        *registry.0.subs.write() = subs;
        Ok(registry)
    }

    pub fn dir(&self) -> &Path {
        &self.0.dir
    }

    fn config_path(&self) -> PathBuf {
        self.0.dir.join(CONFIG_FILE_NAME)
    }

    pub fn config(&self) -> RegistryConfig {
        self.0.config.read().clone()
    }

    pub fn events(&self) -> &EventBus {
        &self.0.events
    }

    pub fn results(&self) -> &ResultStore {
        &self.0.results
    }

    // creation

    /// Author a new subscription. It starts subscribed and owned by us.
    pub fn create(
        &self,
        name: &str,
        is_public: bool,
        is_anonymous: bool,
        payload: Vec<u8>,
    ) -> Result<Subscription, RegistryError> {
        Query::from_payload(&payload).map_err(SubscriptionError::from)?;
        let envelope = Envelope::create(name, is_public, is_anonymous, payload, None)?;
        let sub = Subscription::new(envelope, AddType::Create, now_ms(), self.0.events.clone());
        tracing::info!(id = %sub.id(), name, "subscription created");
        Ok(self.add_subscription(sub))
    }

    /// Subscription for a keyless feed, identified by its descriptor key.
    ///
    /// Every peer derives the same id from the same key, so an existing entry
    /// for it is returned as is.
    pub fn create_singleton(
        &self,
        descriptor: SingletonDescriptor,
        add_type: AddType,
    ) -> Result<Subscription, RegistryError> {
        let short_id = singleton_short_id(&descriptor.key);
        if let Some(existing) = self.get_by_short_id(&short_id) {
            return Ok(existing);
        }

        let url = std::str::from_utf8(&descriptor.key)
            .map_err(|_| anyhow::anyhow!("singleton key is not a url"))?;
        let payload = Query::new(SINGLETON_ENGINE)
            .with_url(url)
            .with_interval(descriptor.check_interval_mins() as i64)
            .to_payload()
            .map_err(SubscriptionError::from)?;
        let name = descriptor.name.clone();
        let anonymous = descriptor.anonymous;
        let envelope = Envelope::create(&name, true, anonymous, payload, Some(descriptor))?;

        let sub = Subscription::new(envelope, add_type, now_ms(), self.0.events.clone());
        tracing::info!(id = %sub.id(), name, ?add_type, "singleton subscription created");
        Ok(self.add_subscription(sub))
    }

    /// Import an encoded envelope someone handed us and subscribe to it.
    ///
    /// Importing a newer version of a known subscription upgrades it in place.
    /// Singletons are matched by their feed alone: every peer signs its copy
    /// with its own key, so a known one is only subscribed to, never upgraded.
    pub fn import_document(&self, data: &[u8]) -> Result<Subscription, RegistryError> {
        let envelope = Envelope::decode(data, true)?;
        if let Some(existing) = self.get_by_short_id(&envelope.short_id()) {
            let singleton = envelope.singleton().is_some() || existing.is_singleton();
            if singleton {
                tracing::debug!(id = %existing.id(), "singleton already known, keeping our copy");
            } else if envelope.version() > existing.version() {
                existing.apply_upgrade(envelope)?;
            }
            existing.set_subscribed(true);
            return Ok(existing);
        }

        let sub = Subscription::new(envelope, AddType::Import, now_ms(), self.0.events.clone());
        sub.set_subscribed(true);
        tracing::info!(id = %sub.id(), "subscription imported");
        Ok(self.add_subscription(sub))
    }

    /// Keep a verified envelope found on the network, unsubscribed.
    pub fn add_from_lookup(&self, envelope: Envelope) -> Subscription {
        let sub = Subscription::new(envelope, AddType::Lookup, now_ms(), self.0.events.clone());
        self.add_subscription(sub)
    }

    /// Insert `sub`, or return the entry that already has its id.
    pub fn add_subscription(&self, sub: Subscription) -> Subscription {
        {
            let mut subs = self.0.subs.write();
            match subs.binary_search_by(|s| s.id().cmp(sub.id())) {
                Ok(pos) => return subs[pos].clone(),
                Err(pos) => subs.insert(pos, sub.clone()),
            }
        }
        self.0.events.publish(SubscriptionEvent::Added {
            id: sub.id().to_string(),
        });
        sub
    }

    /// Forget a subscription and delete its results.
    pub async fn remove_subscription(&self, id: &str) -> Result<Option<Subscription>, RegistryError> {
        let removed = {
            let mut subs = self.0.subs.write();
            match subs.binary_search_by(|s| s.id().cmp(id)) {
                Ok(pos) => Some(subs.remove(pos)),
                Err(_) => None,
            }
        };
        let Some(sub) = removed else {
            return Ok(None);
        };

        {
            let _guard = sub.results_lock().lock().await;
            self.0.results.remove(id).await?;
        }
        tracing::info!(id, name = %sub.name(), "subscription removed");
        self.0.events.publish(SubscriptionEvent::Removed { id: id.to_string() });
        Ok(Some(sub))
    }

    // queries

    pub fn get(&self, id: &str) -> Option<Subscription> {
        let subs = self.0.subs.read();
        subs.binary_search_by(|s| s.id().cmp(id))
            .ok()
            .map(|pos| subs[pos].clone())
    }

    pub fn get_by_short_id(&self, short_id: &ShortId) -> Option<Subscription> {
        self.get(&short_id.to_id())
    }

    pub fn subscriptions(&self, subscribed_only: bool) -> Vec<Subscription> {
        self.0
            .subs
            .read()
            .iter()
            .filter(|s| !subscribed_only || s.is_subscribed())
            .cloned()
            .collect()
    }

    // associations

    /// Remember which subscriptions a lookup found for `hash`.
    ///
    /// Subscribed public subscriptions among them take the association too, so
    /// we help announce it.
    pub fn record_associations(&self, hash: &ContentId, subs: &[Subscription], full_lookup: bool) {
        self.0.potential.lock().insert(
            hash.clone(),
            PotentialAssociation {
                short_ids: subs.iter().map(Subscription::short_id).collect(),
                full_lookup,
                recorded_at: now_ms(),
            },
        );
        for sub in subs {
            if sub.is_subscribed() && sub.is_public() {
                sub.add_association(hash.clone());
            }
        }
        tracing::debug!(%hash, count = subs.len(), full_lookup, "associations recorded");
        self.0
            .events
            .publish(SubscriptionEvent::AssociationsChanged { hash: hash.clone() });
    }

    pub fn associations_for(&self, hash: &ContentId) -> Option<PotentialAssociation> {
        self.0.potential.lock().get(hash).cloned()
    }

    /// Content of ours that is due for a periodic association lookup.
    ///
    /// Candidates are the associations of subscribed subscriptions, which is
    /// the content this peer downloaded. Content known to belong to `n`
    /// subscriptions is due `n + 1` days after its last lookup plus a fixed
    /// per-content jitter; past [`LOOKUP_SKIP_KNOWN`] it is never due. The most
    /// recently associated due content wins.
    pub fn association_lookup_candidate(&self, now: i64) -> Option<ContentId> {
        let subs = self.subscriptions(true);
        let potential = self.0.potential.lock();

        let mut newest: Option<(i64, ContentId)> = None;
        for assoc in subs.iter().flat_map(Subscription::associations) {
            let (known, last_check) = potential
                .get(&assoc.hash)
                .map(|p| (p.short_ids.len(), p.recorded_at.min(now)))
                .unwrap_or((0, 0));
            if known > LOOKUP_SKIP_KNOWN {
                continue;
            }
            let due_after = (known as i64 + 1) * DAY_MS + assoc.when.rem_euclid(LOOKUP_JITTER_MS);
            if now - last_check < due_after {
                continue;
            }
            if newest.as_ref().map_or(true, |(when, _)| assoc.when > *when) {
                newest = Some((assoc.when, assoc.hash));
            }
        }
        newest.map(|(_, hash)| hash)
    }

    /// Drop stale lookup results, keeping at least a handful.
    pub fn tidy_potential_associations(&self, now: i64) {
        let mut potential = self.0.potential.lock();
        if potential.len() <= POTENTIAL_ASSOCIATIONS_KEEP {
            return;
        }
        let mut stale: Vec<(ContentId, i64)> = potential
            .iter()
            .filter(|(_, p)| p.recorded_at <= now && now - p.recorded_at > POTENTIAL_ASSOCIATION_TTL_MS)
            .map(|(hash, p)| (hash.clone(), p.recorded_at))
            .collect();
        stale.sort_by_key(|(_, at)| *at);
        let removable = potential.len() - POTENTIAL_ASSOCIATIONS_KEEP;
        for (hash, _) in stale.into_iter().take(removable) {
            potential.remove(&hash);
        }
    }

    // housekeeping

    /// Remove the oldest foreign, unsubscribed subscription past its retention.
    ///
    /// At most one goes per call; returns its id.
    pub async fn expire_unused(&self, now: i64) -> Result<Option<String>, RegistryError> {
        let retention = self.0.config.read().expire_unused_ms();
        let expired = self
            .subscriptions(false)
            .into_iter()
            .filter(|s| !(s.is_mine() || s.is_subscribed()))
            .filter(|s| now - s.add_time() > retention)
            .min_by_key(Subscription::add_time);

        let Some(sub) = expired else {
            return Ok(None);
        };
        tracing::info!(id = %sub.id(), name = %sub.name(), "removing unused subscription");
        self.remove_subscription(sub.id()).await?;
        Ok(Some(sub.id().to_string()))
    }

    /// Change the default result cap and apply it to every subscription.
    pub async fn set_max_results(&self, max: u32) -> Result<(), RegistryError> {
        self.0.config.write().max_results = max;
        self.0.results.set_default_max_results(max);
        for sub in self.subscriptions(false) {
            self.0.results.check_max_results(&sub).await?;
        }
        Ok(())
    }

    // persistence

    /// Write every subscription to the registry file.
    pub async fn save_config(&self) -> Result<(), RegistryError> {
        let _guard = self.0.save_lock.lock().await;
        let subs = self.subscriptions(false);
        let file = RegistryFile::new(
            subs.iter()
                .map(Subscription::to_record)
                .collect::<Result<_, _>>()?,
        );
        let data = serde_json::to_vec_pretty(&file)?;
        storage::write_resilient(&self.config_path(), &data).await?;
        tracing::debug!(count = subs.len(), "subscriptions saved");
        Ok(())
    }

    /// Save the registry a short delay after changes, and once more on shutdown.
    pub fn spawn_config_saver(&self, mut shutdown: watch::Receiver<()>) -> JoinHandle<()> {
        let registry = self.clone();
        let mut events = self.0.events.subscribe();
        let delay = self.0.config.read().save_delay();

        tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    _ = shutdown.changed() => break,
                    event = events.recv() => event,
                };
                let Some(event) = event else {
                    break;
                };
                if !file::needs_save(&event) {
                    continue;
                }

                let stopping = tokio::select! {
                    _ = tokio::time::sleep(delay) => false,
                    _ = shutdown.changed() => true,
                };
                while events.try_recv().is_some() {}
                if stopping {
                    break;
                }
                if let Err(e) = registry.save_config().await {
                    tracing::error!("failed to save subscriptions: {}", e);
                }
            }

            if let Err(e) = registry.save_config().await {
                tracing::error!("failed to save subscriptions on shutdown: {}", e);
            }
        })
    }
}
