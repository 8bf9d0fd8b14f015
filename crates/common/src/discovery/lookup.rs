//! Finding subscriptions through the content they are associated with

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{Notify, Semaphore, SemaphorePermit};
use tokio::task::JoinSet;
use tokio::time::{sleep_until, Instant};

use crate::content_id::ContentId;
use crate::dht::{association_key, presence_key, DhtFlags, GetRequest};
use crate::envelope::{singleton_short_id, Envelope, ShortId};
use crate::subscription::{AddType, PublicationDetails, Subscription};

use super::presence;
use super::record::AssociationRecord;
use super::{scaled, Discovery, LookupError, DHT_READ_TIMEOUT, MAX_ENVELOPE_DOWNLOADS};

const ASSOCIATION_READ_MAX: usize = 30;
const PRESENCE_READ_MAX: usize = 12;

/// How a lookup ended; delivered exactly once
#[derive(Debug)]
pub enum LookupOutcome {
    /// Every subscription found. With `timed_out` set the deadline passed
    /// first and the list holds what was found before it.
    Complete {
        subscriptions: Vec<Subscription>,
        timed_out: bool,
    },
    Failed(LookupError),
}

#[derive(Debug)]
pub enum LookupEvent {
    /// A subscription associated with the content, as soon as it is known
    Found(Subscription),
    /// Always the last event
    Finished(LookupOutcome),
}

#[derive(Debug, Default)]
struct ControlState {
    cancelled: bool,
    deadline: Option<Instant>,
}

/// Cancel and timeout requests, honoured whenever the lookup task gets to them
#[derive(Debug, Default)]
struct LookupControl {
    state: Mutex<ControlState>,
    notify: Notify,
}

enum Interrupt {
    Cancelled,
    TimedOut,
}

impl LookupControl {
    fn cancel(&self) {
        self.state.lock().cancelled = true;
        self.notify.notify_waiters();
    }

    fn set_deadline(&self, deadline: Instant) {
        self.state.lock().deadline = Some(deadline);
        self.notify.notify_waiters();
    }

    /// Resolves once the lookup is cancelled or past its deadline.
    async fn interrupted(&self) -> Interrupt {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // register before reading the state so no request slips between
            notified.as_mut().enable();

            let (cancelled, deadline) = {
                let state = self.state.lock();
                (state.cancelled, state.deadline)
            };
            if cancelled {
                return Interrupt::Cancelled;
            }
            match deadline {
                Some(deadline) => tokio::select! {
                    _ = notified => {}
                    _ = sleep_until(deadline) => return Interrupt::TimedOut,
                },
                None => notified.await,
            }
        }
    }
}

/// A running association lookup
///
/// Dropping the handle does not stop the lookup; its results are still
/// recorded in the registry.
#[derive(Debug)]
pub struct LookupHandle {
    control: Arc<LookupControl>,
    events: flume::Receiver<LookupEvent>,
}

impl LookupHandle {
    /// Stop the lookup; it finishes with [`LookupError::Cancelled`].
    ///
    /// Safe to call at any point, including before the lookup got going.
    pub fn cancel(&self) {
        self.control.cancel();
    }

    /// Finish the lookup `timeout` from now with whatever it found so far.
    pub fn set_timeout(&self, timeout: Duration) {
        self.control.set_deadline(Instant::now() + timeout);
    }

    /// Next event, or `None` after [`LookupEvent::Finished`] was taken.
    pub async fn next_event(&self) -> Option<LookupEvent> {
        self.events.recv_async().await.ok()
    }

    /// Wait for the outcome, skipping incremental results.
    pub async fn outcome(self) -> LookupOutcome {
        while let Some(event) = self.next_event().await {
            if let LookupEvent::Finished(outcome) = event {
                return outcome;
            }
        }
        LookupOutcome::Failed(LookupError::Default(anyhow::anyhow!(
            "lookup task ended without an outcome"
        )))
    }
}

impl Discovery {
    /// Find the subscriptions that announced an association with `hash`.
    pub fn lookup_associations(&self, hash: &ContentId) -> LookupHandle {
        let control = Arc::new(LookupControl::default());
        let (tx, rx) = flume::unbounded();

        let discovery = self.clone();
        let hash = hash.clone();
        let task_control = control.clone();
        tokio::spawn(async move {
            let found = Mutex::new(Vec::new());
            let outcome = tokio::select! {
                biased;

                interrupt = task_control.interrupted() => match interrupt {
                    Interrupt::Cancelled => LookupOutcome::Failed(LookupError::Cancelled),
                    Interrupt::TimedOut => {
                        tracing::debug!(%hash, "association lookup timed out");
                        LookupOutcome::Complete {
                            subscriptions: found.lock().clone(),
                            timed_out: true,
                        }
                    }
                },

                result = discovery.association_lookup(&hash, &found, &tx) => match result {
                    Ok(()) => LookupOutcome::Complete {
                        subscriptions: found.lock().clone(),
                        timed_out: false,
                    },
                    Err(e) => {
                        tracing::debug!(%hash, "association lookup failed: {}", e);
                        LookupOutcome::Failed(e)
                    }
                },
            };

            // whatever turned up is kept, however the lookup ended
            let full_lookup = matches!(
                outcome,
                LookupOutcome::Complete {
                    timed_out: false,
                    ..
                }
            );
            let subs = found.lock().clone();
            if full_lookup || !subs.is_empty() {
                discovery
                    .0
                    .registry
                    .record_associations(&hash, &subs, full_lookup);
            }
            // the caller may have dropped the handle
            let _ = tx.send(LookupEvent::Finished(outcome));
        });

        LookupHandle {
            control,
            events: rx,
        }
    }

    /// Start a lookup for the next due content of ours, unless one is running.
    ///
    /// Returns whether a lookup started.
    pub(super) fn periodic_association_lookup(&self, now: i64) -> bool {
        let hash = {
            let mut state = self.0.state.lock();
            if state.periodic_lookup_active {
                return false;
            }
            let Some(hash) = self.0.registry.association_lookup_candidate(now) else {
                return false;
            };
            state.periodic_lookup_active = true;
            hash
        };

        tracing::debug!(%hash, "periodic association lookup starts");
        let handle = self.lookup_associations(&hash);
        let discovery = self.clone();
        tokio::spawn(async move {
            match handle.outcome().await {
                LookupOutcome::Complete { subscriptions, .. } => {
                    tracing::debug!(%hash, found = subscriptions.len(), "periodic association lookup done")
                }
                LookupOutcome::Failed(e) => {
                    tracing::debug!(%hash, "periodic association lookup failed: {}", e);
                    // counts as checked so the same content is not retried every pass
                    let registry = &discovery.0.registry;
                    if registry.associations_for(&hash).is_none() {
                        registry.record_associations(&hash, &[], false);
                    }
                }
            }
            discovery.0.state.lock().periodic_lookup_active = false;
        });
        true
    }

    async fn association_lookup(
        &self,
        hash: &ContentId,
        found: &Mutex<Vec<Subscription>>,
        events: &flume::Sender<LookupEvent>,
    ) -> Result<(), LookupError> {
        let dht = &self.0.dht;
        dht.wait_ready().await;
        let anonymous = dht.is_anonymous();

        let request = GetRequest::new(
            ASSOCIATION_READ_MAX,
            scaled(DHT_READ_TIMEOUT, anonymous, 2),
        )
        .with_flags(DhtFlags::SINGLE_VALUE)
        .allow_diversify();
        let outcome = dht.get(&association_key(hash), request).await?;

        let mut announced: HashMap<ShortId, u32> = HashMap::new();
        for value in &outcome.values {
            let Some((short_id, version)) = AssociationRecord::decode(&value.value)
                .and_then(|record| Some((record.short_id()?, record.version)))
            else {
                continue;
            };
            let highest = announced.entry(short_id).or_insert(version);
            *highest = (*highest).max(version);
        }
        tracing::debug!(%hash, hits = announced.len(), "association lookup read");

        let report = |sub: Subscription| {
            let _ = events.send(LookupEvent::Found(sub.clone()));
            found.lock().push(sub);
        };

        // unknown subscriptions are looked up a few at a time; the rest wait
        let fan_out = Arc::new(Semaphore::new(MAX_ENVELOPE_DOWNLOADS));
        let mut lookups = JoinSet::new();
        for (short_id, version) in announced {
            match self.0.registry.get_by_short_id(&short_id) {
                Some(sub) => {
                    if version > sub.version() && !sub.is_mine() {
                        if let Err(e) = self.0.jobs.dispatch_upgrade_check(sub.id(), version) {
                            tracing::warn!("failed to queue upgrade check: {}", e);
                        }
                    }
                    report(sub);
                }
                None => {
                    let discovery = self.clone();
                    let fan_out = fan_out.clone();
                    lookups.spawn(async move {
                        let result = match fan_out.acquire_owned().await {
                            Ok(_permit) => {
                                discovery
                                    .lookup_subscription(&short_id, version, anonymous)
                                    .await
                            }
                            Err(e) => Err(LookupError::Default(e.into())),
                        };
                        (short_id, result)
                    });
                }
            }
        }

        while let Some(joined) = lookups.join_next().await {
            match joined {
                Ok((_, Ok(Some(sub)))) => report(sub),
                Ok((short_id, Ok(None))) => {
                    tracing::debug!(%short_id, "announced subscription not found")
                }
                Ok((short_id, Err(e))) => {
                    tracing::debug!(%short_id, "subscription lookup failed: {}", e)
                }
                Err(e) => tracing::warn!("subscription lookup task failed: {}", e),
            }
        }
        Ok(())
    }

    /// Find version `version` of an unknown subscription and add it to the
    /// registry, unsubscribed.
    ///
    /// The directory is asked first, then the presence record for that exact
    /// version is read and the envelope it points at fetched, waiting for one
    /// of the [`MAX_ENVELOPE_DOWNLOADS`] download permits. `Ok(None)` when
    /// nothing usable turned up.
    pub async fn lookup_subscription(
        &self,
        short_id: &ShortId,
        version: u32,
        anonymous: bool,
    ) -> Result<Option<Subscription>, LookupError> {
        if let Some((envelope, popularity)) = self.directory_envelope(short_id, anonymous).await {
            let sub = self.0.registry.add_from_lookup(envelope);
            if let Some(popularity) = popularity {
                sub.set_cached_popularity(popularity);
            }
            return Ok(Some(sub));
        }

        let permit = self
            .0
            .envelope_downloads
            .acquire()
            .await
            .map_err(|e| LookupError::Default(e.into()))?;

        let request = GetRequest::new(PRESENCE_READ_MAX, scaled(DHT_READ_TIMEOUT, anonymous, 2))
            .with_flags(DhtFlags::SINGLE_VALUE);
        let outcome = self
            .0
            .dht
            .get(&presence_key(short_id, version), request)
            .await?;

        for value in outcome.values {
            let details = match presence::decode(&value.value) {
                Ok(details) => details,
                Err(e) => {
                    tracing::trace!(%short_id, "ignoring presence record: {}", e);
                    continue;
                }
            };
            if details.version() != version {
                continue;
            }

            match details {
                PublicationDetails::Singleton { descriptor, .. } => {
                    if singleton_short_id(&descriptor.key) != *short_id {
                        continue;
                    }
                    let sub = self
                        .0
                        .registry
                        .create_singleton(descriptor, AddType::Lookup)?;
                    self.queue_popularity(&sub);
                    return Ok(Some(sub));
                }
                PublicationDetails::Signed { hash, size, .. } => {
                    let envelope = self
                        .fetch_verified_envelope(&ContentId::new(hash), size, &permit)
                        .await?;
                    if envelope.short_id() != *short_id || envelope.version() != version {
                        return Err(LookupError::Mismatch(format!(
                            "expected {} version {}, got {} version {}",
                            short_id,
                            version,
                            envelope.short_id(),
                            envelope.version()
                        )));
                    }
                    tracing::info!(%short_id, version, name = envelope.name(), "subscription found");
                    let sub = self.0.registry.add_from_lookup(envelope);
                    self.queue_popularity(&sub);
                    return Ok(Some(sub));
                }
            }
        }
        Ok(None)
    }

    /// Subscriptions found without the directory arrive with no popularity.
    fn queue_popularity(&self, sub: &Subscription) {
        if sub.cached_popularity().is_none() {
            if let Err(e) = self.0.jobs.dispatch_popularity(sub.id()) {
                tracing::warn!("failed to queue popularity lookup: {}", e);
            }
        }
    }

    /// The directory's copy of a subscription, if it has one that checks out.
    pub(super) async fn directory_envelope(
        &self,
        short_id: &ShortId,
        anonymous: bool,
    ) -> Option<(Envelope, Option<u64>)> {
        let entry = match self.0.directory.lookup(short_id, anonymous).await {
            Ok(entry) => entry?,
            Err(e) => {
                tracing::debug!(%short_id, "directory lookup failed: {}", e);
                return None;
            }
        };
        let data = entry.envelope?;
        match Envelope::decode(&data, true) {
            Ok(envelope) if envelope.short_id() == *short_id => Some((envelope, entry.popularity)),
            Ok(envelope) => {
                tracing::warn!(%short_id, got = %envelope.short_id(), "directory returned the wrong subscription");
                None
            }
            Err(e) => {
                tracing::warn!(%short_id, "directory returned an unusable envelope: {}", e);
                None
            }
        }
    }

    /// Download and verify an envelope while holding a download permit.
    pub(super) async fn fetch_verified_envelope(
        &self,
        hash: &ContentId,
        size: u32,
        _permit: &SemaphorePermit<'_>,
    ) -> Result<Envelope, LookupError> {
        let data = super::fetch_envelope(self.0.fetcher.as_ref(), hash, size).await?;
        Ok(Envelope::decode(&data, true)?)
    }
}
