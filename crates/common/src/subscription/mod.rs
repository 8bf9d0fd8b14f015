//! The in-memory subscription entity
//!
//! A [`Subscription`] wraps the signed [`Envelope`] together with everything that
//! is only ever known locally: whether we are subscribed, which content we have
//! associated with it, what the network told us about its popularity, and its
//! poll history.
//!
//! # Locking
//!
//! All entity state sits behind a single `parking_lot::Mutex` that is only held
//! for short synchronous sections and never across an `.await`. The result
//! store's read-modify-persist cycle is serialized separately by an async mutex
//! owned by the entity (see [`crate::results::ResultStore`]), so readers never
//! observe a partially merged result set.
//!
//! # Signed mutations
//!
//! Renames, visibility changes and payload changes all follow the same pattern:
//! the envelope is copied, the copy gets the new details and a bumped version
//! and is re-signed, and only then is it swapped in. Any failure (most commonly
//! a missing private key) leaves the entity exactly as it was.

mod association;
mod history;
mod publication;
mod query;
mod record;

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::clock::{now_ms, HOUR_MS};
use crate::content_id::ContentId;
use crate::crypto::{PublicKey, SecretKey};
use crate::envelope::{verify, Envelope, EnvelopeDetails, EnvelopeError, ShortId};
use crate::events::{ChangeReason, EventBus, SubscriptionEvent};

pub use association::{Association, MAX_ASSOCIATIONS, MIN_RECENT_ASSOC_TO_RETAIN};
pub use history::{History, FATAL_ERROR_FAILS};
pub use publication::PublicationDetails;
pub use query::{Query, Schedule};
pub use record::{AddType, SubscriptionRecord};

use publication::VerifyCache;

/// Minimum spacing between automatic upgrade checks of one subscription
pub const AUTO_UPGRADE_CHECK_INTERVAL_MS: i64 = 4 * HOUR_MS;

#[derive(Debug, thiserror::Error)]
pub enum SubscriptionError {
    #[error("default error: {0}")]
    Default(#[from] anyhow::Error),
    #[error("envelope error: {0}")]
    Envelope(#[from] EnvelopeError),
    #[error("invalid payload: {0}")]
    Payload(#[from] serde_json::Error),
    #[error("upgrade rejected: {0}")]
    UpgradeRejected(String),
}

impl SubscriptionError {
    /// Whether the mutation failed because we do not own the subscription
    pub fn is_ownership(&self) -> bool {
        matches!(self, SubscriptionError::Envelope(EnvelopeError::NotOwner))
    }
}

#[derive(Debug)]
struct SubscriptionState {
    envelope: Envelope,
    add_type: AddType,
    add_time: i64,
    local_name: Option<String>,
    subscribed: bool,
    popularity: Option<u64>,
    last_auto_upgrade_check: i64,
    published: bool,
    highest_prompted_version: u32,
    associations: Vec<Association>,
    history: History,
    verify_cache: VerifyCache,
    meta_mutation: u64,
}

impl SubscriptionState {
    /// A new version invalidates everything we announced for the old one.
    fn version_updated(&mut self) {
        if self.envelope.is_public() {
            self.published = false;
            for assoc in self.associations.iter_mut() {
                assoc.published = false;
            }
        }
    }
}

struct SubscriptionInner {
    short_id: ShortId,
    id: String,
    state: Mutex<SubscriptionState>,
    results_lock: tokio::sync::Mutex<()>,
    events: EventBus,
}

/// Cheaply cloneable handle to one subscription
#[derive(Clone)]
pub struct Subscription(Arc<SubscriptionInner>);

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.0.state.lock();
        f.debug_struct("Subscription")
            .field("id", &self.0.id)
            .field("name", &state.envelope.name())
            .field("version", &state.envelope.version())
            .field("subscribed", &state.subscribed)
            .finish()
    }
}

impl PartialEq for Subscription {
    fn eq(&self, other: &Self) -> bool {
        self.0.short_id == other.0.short_id
    }
}

impl Eq for Subscription {}

impl Subscription {
    /// Wrap an envelope in a fresh entity.
    ///
    /// Locally created subscriptions start subscribed; imported and looked up
    /// ones do not.
    pub fn new(envelope: Envelope, add_type: AddType, add_time: i64, events: EventBus) -> Self {
        let short_id = envelope.short_id();
        let state = SubscriptionState {
            envelope,
            add_type,
            add_time,
            local_name: None,
            subscribed: add_type == AddType::Create,
            popularity: None,
            last_auto_upgrade_check: 0,
            published: false,
            highest_prompted_version: 0,
            associations: Vec::new(),
            history: History::default(),
            verify_cache: VerifyCache::default(),
            meta_mutation: 0,
        };
        Self(Arc::new(SubscriptionInner {
            short_id,
            id: short_id.to_id(),
            state: Mutex::new(state),
            results_lock: tokio::sync::Mutex::new(()),
            events,
        }))
    }

    /// Restore an entity from its persisted record.
    pub fn from_record(
        record: SubscriptionRecord,
        events: EventBus,
    ) -> Result<Self, SubscriptionError> {
        let mut envelope = Envelope::decode(&record.envelope, true)?;
        if let Some(hex) = &record.private_key {
            let key = SecretKey::from_hex(hex).map_err(EnvelopeError::from)?;
            envelope = envelope.with_private_key(key)?;
        }
        let sub = Self::new(envelope, record.add_type, record.add_time, events);
        {
            let mut state = sub.0.state.lock();
            state.local_name = record.local_name;
            state.subscribed = record.subscribed;
            state.popularity = record.popularity;
            state.last_auto_upgrade_check = record.last_auto_upgrade_check;
            state.highest_prompted_version = record.highest_prompted_version;
            state.associations = record.associations;
            state.history = record.history;
        }
        Ok(sub)
    }

    pub fn to_record(&self) -> Result<SubscriptionRecord, SubscriptionError> {
        let state = self.0.state.lock();
        Ok(SubscriptionRecord {
            envelope: state.envelope.encode()?,
            private_key: state.envelope.private_key().map(|k| k.to_hex()),
            add_type: state.add_type,
            add_time: state.add_time,
            local_name: state.local_name.clone(),
            subscribed: state.subscribed,
            popularity: state.popularity,
            last_auto_upgrade_check: state.last_auto_upgrade_check,
            highest_prompted_version: state.highest_prompted_version,
            associations: state.associations.clone(),
            history: state.history.clone(),
        })
    }

    fn changed(&self, reason: ChangeReason) {
        self.0.events.publish(SubscriptionEvent::Changed {
            id: self.0.id.clone(),
            reason,
        });
    }

    pub fn id(&self) -> &str {
        &self.0.id
    }

    pub fn short_id(&self) -> ShortId {
        self.0.short_id
    }

    pub(crate) fn events(&self) -> &EventBus {
        &self.0.events
    }

    pub(crate) fn results_lock(&self) -> &tokio::sync::Mutex<()> {
        &self.0.results_lock
    }

    /// Display name: the local override if set, else the signed name
    pub fn name(&self) -> String {
        let state = self.0.state.lock();
        state
            .local_name
            .clone()
            .unwrap_or_else(|| state.envelope.name().to_string())
    }

    pub fn envelope(&self) -> Envelope {
        self.0.state.lock().envelope.clone()
    }

    pub fn public_key(&self) -> PublicKey {
        *self.0.state.lock().envelope.public_key()
    }

    pub fn version(&self) -> u32 {
        self.0.state.lock().envelope.version()
    }

    /// Highest version known: our own or one the user was already prompted about
    pub fn highest_version(&self) -> u32 {
        let state = self.0.state.lock();
        state
            .envelope
            .version()
            .max(state.highest_prompted_version)
    }

    pub fn highest_prompted_version(&self) -> u32 {
        self.0.state.lock().highest_prompted_version
    }

    pub fn is_public(&self) -> bool {
        self.0.state.lock().envelope.is_public()
    }

    pub fn is_anonymous(&self) -> bool {
        self.0.state.lock().envelope.is_anonymous()
    }

    pub fn is_singleton(&self) -> bool {
        self.0.state.lock().envelope.singleton().is_some()
    }

    /// We hold the private key and (for singletons) authored it here
    pub fn is_mine(&self) -> bool {
        let state = self.0.state.lock();
        state.envelope.private_key().is_some()
            && (state.envelope.singleton().is_none() || state.add_type == AddType::Create)
    }

    pub fn is_subscribed(&self) -> bool {
        self.0.state.lock().subscribed
    }

    pub fn add_type(&self) -> AddType {
        self.0.state.lock().add_type
    }

    pub fn add_time(&self) -> i64 {
        self.0.state.lock().add_time
    }

    pub fn payload(&self) -> Vec<u8> {
        self.0.state.lock().envelope.payload().to_vec()
    }

    pub fn query(&self) -> Result<Query, SubscriptionError> {
        let state = self.0.state.lock();
        Ok(Query::from_payload(state.envelope.payload())?)
    }

    pub fn cached_popularity(&self) -> Option<u64> {
        self.0.state.lock().popularity
    }

    pub fn is_published(&self) -> bool {
        self.0.state.lock().published
    }

    /// Counter bumped on every metadata change, for cheap change detection
    pub fn meta_mutation(&self) -> u64 {
        self.0.state.lock().meta_mutation
    }

    pub fn history(&self) -> History {
        self.0.state.lock().history.clone()
    }

    // signed mutations

    fn mutate<F>(&self, apply: F) -> Result<(), SubscriptionError>
    where
        F: FnOnce(&mut EnvelopeDetails),
    {
        {
            let mut state = self.0.state.lock();
            let mut details = state.envelope.details().clone();
            apply(&mut details);
            if &details == state.envelope.details() {
                return Ok(());
            }
            details.version = state.envelope.version() + 1;

            let mut next = state.envelope.clone();
            next.rewrite(details)?;
            tracing::debug!(id = %self.0.id, version = next.version(), "subscription details updated");

            state.envelope = next;
            state.version_updated();
            state.meta_mutation += 1;
        }
        self.changed(ChangeReason::Details);
        Ok(())
    }

    pub fn set_name(&self, name: &str) -> Result<(), SubscriptionError> {
        self.mutate(|d| d.name = name.to_string())
    }

    pub fn set_public(&self, is_public: bool) -> Result<(), SubscriptionError> {
        self.mutate(|d| d.is_public = is_public)
    }

    pub fn set_payload(&self, payload: Vec<u8>) -> Result<(), SubscriptionError> {
        Query::from_payload(&payload)?;
        self.mutate(|d| d.payload = payload)
    }

    /// Change name, visibility and payload as a single new version.
    pub fn set_details(
        &self,
        name: &str,
        is_public: bool,
        payload: Vec<u8>,
    ) -> Result<(), SubscriptionError> {
        Query::from_payload(&payload)?;
        self.mutate(|d| {
            d.name = name.to_string();
            d.is_public = is_public;
            d.payload = payload;
        })
    }

    /// Replace the envelope with a verified newer version of the same subscription.
    pub fn apply_upgrade(&self, newer: Envelope) -> Result<(), SubscriptionError> {
        let version = newer.version();
        {
            let mut state = self.0.state.lock();
            if newer.public_key() != state.envelope.public_key() {
                return Err(SubscriptionError::UpgradeRejected(
                    "public key mismatch".to_string(),
                ));
            }
            if newer.short_id() != self.0.short_id {
                return Err(SubscriptionError::UpgradeRejected(
                    "short id mismatch".to_string(),
                ));
            }
            if version <= state.envelope.version() {
                return Err(SubscriptionError::UpgradeRejected(format!(
                    "version {} is not newer than {}",
                    version,
                    state.envelope.version()
                )));
            }

            let newer = match state.envelope.private_key() {
                Some(key) => newer.with_private_key(key.clone())?,
                None => newer,
            };
            state.envelope = newer;
            state.version_updated();
            state.meta_mutation += 1;
        }
        tracing::info!(id = %self.0.id, version, "subscription upgraded");
        self.0.events.publish(SubscriptionEvent::Upgraded {
            id: self.0.id.clone(),
            version,
        });
        self.changed(ChangeReason::Details);
        Ok(())
    }

    // local-only state

    fn update_local<R>(&self, reason: ChangeReason, f: impl FnOnce(&mut SubscriptionState) -> R) -> R {
        let result = {
            let mut state = self.0.state.lock();
            let r = f(&mut state);
            state.meta_mutation += 1;
            r
        };
        self.changed(reason);
        result
    }

    pub fn set_local_name(&self, name: Option<String>) {
        self.update_local(ChangeReason::Metadata, |s| s.local_name = name);
    }

    pub fn set_subscribed(&self, subscribed: bool) {
        if self.is_subscribed() == subscribed {
            return;
        }
        self.update_local(ChangeReason::Metadata, |s| {
            s.subscribed = subscribed;
            if subscribed {
                s.published = false;
            }
        });
    }

    pub fn set_cached_popularity(&self, popularity: u64) {
        if self.cached_popularity() == Some(popularity) {
            return;
        }
        self.update_local(ChangeReason::Metadata, |s| s.popularity = Some(popularity));
    }

    /// Remember that the user was shown (at least) `version`.
    ///
    /// Never goes below the current version.
    pub fn set_highest_user_prompted_version(&self, version: u32) {
        self.update_local(ChangeReason::Metadata, |s| {
            s.highest_prompted_version = version.max(s.envelope.version());
        });
    }

    pub fn set_published(&self, published: bool) {
        self.0.state.lock().published = published;
    }

    /// Whether an automatic upgrade check may run now; records the check if so.
    ///
    /// Singletons never upgrade. Otherwise at most one check per
    /// [`AUTO_UPGRADE_CHECK_INTERVAL_MS`]; a clock that went backwards resets
    /// the window.
    pub fn can_auto_upgrade_check(&self, now: i64) -> bool {
        let mut state = self.0.state.lock();
        if state.envelope.singleton().is_some() {
            return false;
        }
        let last = state.last_auto_upgrade_check;
        if last > 0 && now >= last && now - last < AUTO_UPGRADE_CHECK_INTERVAL_MS {
            return false;
        }
        state.last_auto_upgrade_check = now;
        true
    }

    /// Apply `f` to the poll history and report a history change.
    pub fn update_history<R>(&self, f: impl FnOnce(&mut History) -> R) -> R {
        self.update_local(ChangeReason::History, |s| f(&mut s.history))
    }

    // associations

    /// Record that `hash` belongs to this subscription.
    ///
    /// Returns false if it was already known.
    pub fn add_association(&self, hash: ContentId) -> bool {
        let added = {
            let mut state = self.0.state.lock();
            let added = association::add(
                &mut state.associations,
                hash.clone(),
                now_ms(),
                &mut rand::rng(),
            );
            if added {
                state.meta_mutation += 1;
            }
            added
        };
        if added {
            tracing::debug!(id = %self.0.id, %hash, "association added");
            self.changed(ChangeReason::Associations);
        }
        added
    }

    pub fn has_association(&self, hash: &ContentId) -> bool {
        self.0
            .state
            .lock()
            .associations
            .iter()
            .any(|a| &a.hash == hash)
    }

    pub fn associations(&self) -> Vec<Association> {
        self.0.state.lock().associations.clone()
    }

    pub fn association_count(&self) -> usize {
        self.0.state.lock().associations.len()
    }

    pub fn associations_remaining_for_publish(&self) -> usize {
        self.0
            .state
            .lock()
            .associations
            .iter()
            .filter(|a| !a.published)
            .count()
    }

    /// Next association to announce, marked published as it is handed out.
    pub fn take_association_for_publish(&self) -> Option<Association> {
        let mut state = self.0.state.lock();
        association::take_for_publish(&mut state.associations, &mut rand::rng())
    }

    // presence

    /// What a presence record for our current version says
    pub fn publication_details(&self) -> PublicationDetails {
        let state = self.0.state.lock();
        let envelope = &state.envelope;
        match envelope.singleton() {
            Some(descriptor) => PublicationDetails::Singleton {
                version: envelope.version(),
                descriptor: descriptor.clone(),
            },
            None => PublicationDetails::Signed {
                version: envelope.version(),
                hash: envelope.hash().to_vec(),
                size: envelope.size(),
                sig: envelope.signature().to_vec(),
            },
        }
    }

    /// Version a presence record proves, if its signature checks out.
    ///
    /// Singletons have per-peer keys that can never verify each other, so they
    /// always report the current version. The last check is cached.
    pub fn verified_publication_version(&self, details: &PublicationDetails) -> Option<u32> {
        let (public_key, singleton_version) = {
            let state = self.0.state.lock();
            if state.envelope.singleton().is_some() {
                (*state.envelope.public_key(), Some(state.envelope.version()))
            } else {
                if let Some(cached) = state.verify_cache.get(details) {
                    return cached.then(|| details.version());
                }
                (*state.envelope.public_key(), None)
            }
        };
        if singleton_version.is_some() {
            return singleton_version;
        }

        let ok = match details {
            PublicationDetails::Signed {
                version,
                hash,
                size,
                sig,
            } => verify(&public_key, hash, *version, *size, sig),
            PublicationDetails::Singleton { .. } => false,
        };
        self.0
            .state
            .lock()
            .verify_cache
            .put(details.clone(), ok);
        ok.then(|| details.version())
    }
}
