//! Polling of subscribed searches
//!
//! The [`Scheduler`] keeps exactly one timer armed for the soonest due
//! subscription. When it fires, every subscription due within a few seconds is
//! polled in due order and the timer is re-armed. Nothing is scheduled before
//! [`Scheduler::permit`] is called, so the daemon can finish starting up first.
//!
//! Failed polls back off exponentially from the time of the last failure; the
//! failure state lives only in memory and starts clean on every run. A poll
//! counts as successful when it advanced the subscription's `last_scan`,
//! because the search and merge paths record their own errors instead of
//! returning them.

mod backoff;
mod downloads;
mod limits;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{oneshot, watch, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::clock::{now_ms, SECOND_MS};
use crate::config::SchedulerConfig;
use crate::events::{ChangeReason, SubscriptionEvent};
use crate::providers::{DownloadError, ResultDownloader, SearchEngine, SearchError, SearchRequest};
use crate::registry::Registry;
use crate::results::ResultStoreError;
use crate::subscription::{Subscription, SubscriptionError};

pub use backoff::{backoff_delay, FAIL_INIT_DELAY_MS, FAIL_MAX_DELAY_MS};
pub use limits::RateLimits;

use backoff::ScanState;
use limits::HostPolls;

/// Re-arming within this long of the last run pushes the timer out by as much
const DEBOUNCE_MS: i64 = 30 * SECOND_MS;
/// Subscriptions due within this long are polled with the current batch
const DUE_SLACK_MS: i64 = 10 * SECOND_MS;

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("default error: {0}")]
    Default(#[from] anyhow::Error),
    #[error("{host} was polled too recently, retry in {retry_in:?}")]
    RateLimited { host: String, retry_in: Duration },
    #[error("subscription error: {0}")]
    Subscription(#[from] SubscriptionError),
    #[error("result store error: {0}")]
    Results(#[from] ResultStoreError),
    #[error("download error: {0}")]
    Download(#[from] DownloadError),
}

#[derive(Debug, Default)]
struct SchedulerState {
    permitted: bool,
    scheduling: bool,
    timer: Option<JoinHandle<()>>,
    /// Bumped on every re-arm so a superseded timer that already woke does nothing
    timer_generation: u64,
    last_schedule: Option<i64>,
    scans: HashMap<String, ScanState>,
    /// Callers waiting on the poll in flight for a subscription
    in_flight: HashMap<String, Vec<oneshot::Sender<Joined>>>,
    host_polls: HostPolls,
    /// `<subscription id>:<result id>` of queued or running result downloads
    active_downloads: std::collections::HashSet<String>,
}

struct SchedulerInner {
    registry: Registry,
    search: Arc<dyn SearchEngine>,
    downloader: Arc<dyn ResultDownloader>,
    config: SchedulerConfig,
    rate_limits: RateLimits,
    download_slots: Arc<Semaphore>,
    state: Mutex<SchedulerState>,
}

/// Cheaply cloneable handle to the poll scheduler
#[derive(Clone)]
pub struct Scheduler(Arc<SchedulerInner>);

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.0.state.lock();
        f.debug_struct("Scheduler")
            .field("permitted", &state.permitted)
            .field("in_flight", &state.in_flight.len())
            .field("active_downloads", &state.active_downloads.len())
            .finish()
    }
}

/// The outcome of a poll as seen by the callers that joined it
#[derive(Debug, Clone)]
enum Joined {
    Polled(bool),
    RateLimited { host: String, retry_in: Duration },
    Failed(String),
}

impl Joined {
    fn of(result: &Result<bool, SchedulerError>) -> Self {
        match result {
            Ok(polled) => Joined::Polled(*polled),
            Err(SchedulerError::RateLimited { host, retry_in }) => Joined::RateLimited {
                host: host.clone(),
                retry_in: *retry_in,
            },
            Err(e) => Joined::Failed(e.to_string()),
        }
    }

    fn into_result(self) -> Result<bool, SchedulerError> {
        match self {
            Joined::Polled(polled) => Ok(polled),
            Joined::RateLimited { host, retry_in } => {
                Err(SchedulerError::RateLimited { host, retry_in })
            }
            Joined::Failed(message) => Err(anyhow::anyhow!(message).into()),
        }
    }
}

/// Removes the in-flight entry of a poll and hands its outcome to the waiters
/// when dropped
struct InFlight {
    scheduler: Scheduler,
    id: String,
    outcome: Option<Joined>,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        let waiters = self.scheduler.0.state.lock().in_flight.remove(&self.id);
        let outcome = self
            .outcome
            .take()
            .unwrap_or_else(|| Joined::Failed("poll in flight was abandoned".to_string()));
        for waiter in waiters.into_iter().flatten() {
            let _ = waiter.send(outcome.clone());
        }
    }
}

impl Scheduler {
    pub fn new(
        registry: Registry,
        search: Arc<dyn SearchEngine>,
        downloader: Arc<dyn ResultDownloader>,
        config: SchedulerConfig,
    ) -> Self {
        let rate_limits = RateLimits::parse(&config.rate_limits);
        let workers = config.result_download_workers.max(1);
        Self(Arc::new(SchedulerInner {
            registry,
            search,
            downloader,
            config,
            rate_limits,
            download_slots: Arc::new(Semaphore::new(workers)),
            state: Mutex::new(SchedulerState::default()),
        }))
    }

    pub fn registry(&self) -> &Registry {
        &self.0.registry
    }

    /// Allow scheduling and arm the first timer.
    pub fn permit(&self) {
        self.0.state.lock().permitted = true;
        tracing::info!("scheduling permitted");
        self.calculate_schedule();
    }

    /// Re-arm scheduling whenever something that affects it changes, until
    /// `shutdown` fires.
    pub async fn run(self, mut shutdown: watch::Receiver<()>) {
        let mut events = self.0.registry.events().subscribe();
        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    tracing::info!("scheduler shutting down");
                    break;
                }
                event = events.recv() => match event {
                    Some(event) if affects_schedule(&event) => self.calculate_schedule(),
                    Some(_) => {}
                    None => break,
                },
            }
        }

        let mut state = self.0.state.lock();
        state.permitted = false;
        if let Some(timer) = state.timer.take() {
            timer.abort();
        }
    }

    /// When `sub` is due next: the backoff retry time while it is failing,
    /// otherwise its regular schedule.
    pub fn next_scan_time(&self, sub: &Subscription) -> Option<i64> {
        let retry = self
            .0
            .state
            .lock()
            .scans
            .get(sub.id())
            .and_then(ScanState::retry_at);
        if retry.is_some() {
            return retry;
        }
        let schedule = sub.query().ok()?.schedule;
        sub.history()
            .next_scan_time(schedule.as_ref(), self.0.config.default_interval_mins, now_ms())
    }

    /// Consecutive failed automatic polls of `id` in this run
    pub fn fails(&self, id: &str) -> u32 {
        self.0
            .state
            .lock()
            .scans
            .get(id)
            .map(|s| s.fails)
            .unwrap_or(0)
    }

    /// Compute every due time and arm the timer for the soonest.
    pub fn calculate_schedule(&self) {
        {
            let state = self.0.state.lock();
            if !state.permitted || state.scheduling {
                return;
            }
        }

        let mut due = Vec::new();
        for sub in self.0.registry.subscriptions(true) {
            let history = sub.history();
            if !history.enabled || history.is_fatal() {
                continue;
            }
            if let Some(next) = self.next_scan_time(&sub) {
                due.push((sub.id().to_string(), next));
            }
        }

        let now = now_ms();
        let mut state = self.0.state.lock();
        if !state.permitted || state.scheduling {
            return;
        }
        for scan in state.scans.values_mut() {
            scan.next_scan = None;
        }
        let mut soonest: Option<i64> = None;
        for (id, next) in due {
            state.scans.entry(id).or_default().next_scan = Some(next);
            soonest = Some(soonest.map_or(next, |s| s.min(next)));
        }

        if let Some(timer) = state.timer.take() {
            timer.abort();
        }
        state.timer_generation += 1;
        let Some(mut next) = soonest else {
            return;
        };
        if let Some(last) = state.last_schedule {
            if now - last < DEBOUNCE_MS && next - now < DEBOUNCE_MS {
                next = now + DEBOUNCE_MS;
            }
        }
        let delay = Duration::from_millis(next.saturating_sub(now).max(0) as u64);
        tracing::debug!(?delay, "next poll scheduled");

        let generation = state.timer_generation;
        let scheduler = self.clone();
        state.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            {
                let mut state = scheduler.0.state.lock();
                if state.timer_generation != generation {
                    return;
                }
                // fired; re-arming from here on must not abort this task
                state.timer = None;
            }
            scheduler.schedule().await;
        }));
    }

    /// Poll every subscription that is due, soonest first, then re-arm.
    pub async fn schedule(&self) {
        let mut due: Vec<(i64, Subscription)> = {
            let mut state = self.0.state.lock();
            if state.scheduling {
                return;
            }
            state.scheduling = true;
            state.last_schedule = Some(now_ms());
            self.0
                .registry
                .subscriptions(true)
                .into_iter()
                .filter_map(|sub| {
                    let next = state.scans.get(sub.id())?.next_scan?;
                    Some((next, sub))
                })
                .collect()
        };
        due.sort_by_key(|(next, _)| *next);

        for (next, sub) in due {
            if !sub.history().enabled || next > now_ms() + DUE_SLACK_MS {
                continue;
            }
            if let Some(scan) = self.0.state.lock().scans.get_mut(sub.id()) {
                scan.next_scan = None;
            }

            let last_scan = sub.history().last_scan;
            match self.download(&sub, true).await {
                Ok(true) if sub.history().last_scan != last_scan => self.scan_succeeded(sub.id()),
                Ok(true) => self.scan_failed(sub.id()),
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(id = %sub.id(), "scheduled poll failed: {}", e);
                    self.scan_failed(sub.id());
                }
            }
        }

        self.0.state.lock().scheduling = false;
        self.calculate_schedule();
    }

    fn scan_failed(&self, id: &str) {
        let mut state = self.0.state.lock();
        let scan = state.scans.entry(id.to_string()).or_default();
        scan.failed(now_ms());
        tracing::info!(id, fails = scan.fails, retry_in_ms = backoff_delay(scan.fails), "poll failed");
    }

    fn scan_succeeded(&self, id: &str) {
        if let Some(scan) = self.0.state.lock().scans.get_mut(id) {
            scan.succeeded();
        }
    }

    /// Poll `sub` now.
    ///
    /// Returns whether a poll happened. A poll already running for `sub` is
    /// joined instead of repeated, and its outcome is the joiner's. A host still cooling down refuses the poll:
    /// quietly with `Ok(false)` for automatic polls, with
    /// [`SchedulerError::RateLimited`] otherwise. Search failures are recorded
    /// on the subscription's history, not returned.
    pub async fn download(&self, sub: &Subscription, is_auto: bool) -> Result<bool, SchedulerError> {
        let waiter = {
            let mut state = self.0.state.lock();
            match state.in_flight.get_mut(sub.id()) {
                Some(waiters) => {
                    let (tx, rx) = oneshot::channel();
                    waiters.push(tx);
                    Some(rx)
                }
                None => {
                    state.in_flight.insert(sub.id().to_string(), Vec::new());
                    None
                }
            }
        };
        if let Some(rx) = waiter {
            tracing::debug!(id = %sub.id(), "joining poll in flight");
            return match rx.await {
                Ok(joined) => joined.into_result(),
                Err(_) => Err(anyhow::anyhow!("poll in flight was abandoned").into()),
            };
        }
        let mut in_flight = InFlight {
            scheduler: self.clone(),
            id: sub.id().to_string(),
            outcome: None,
        };
        let result = self.poll(sub, is_auto).await;
        in_flight.outcome = Some(Joined::of(&result));
        result
    }

    async fn poll(&self, sub: &Subscription, is_auto: bool) -> Result<bool, SchedulerError> {
        let query = sub.query()?;
        if let Some(host) = query.host() {
            let admitted =
                self.0
                    .state
                    .lock()
                    .host_polls
                    .admit(&self.0.rate_limits, &host, Instant::now());
            if let Err(retry_in) = admitted {
                if is_auto {
                    tracing::debug!(id = %sub.id(), %host, ?retry_in, "poll rate limited");
                    return Ok(false);
                }
                return Err(SchedulerError::RateLimited { host, retry_in });
            }
        }

        let history = sub.history();
        let request = SearchRequest {
            subscription_id: sub.id().to_string(),
            query,
            networks: history.networks.clone(),
            max_age_secs: history.max_age_secs,
        };
        tracing::debug!(id = %sub.id(), is_auto, "polling subscription");

        match self.0.search.execute(request).await {
            Ok(items) => match self.0.registry.results().reconcile(sub, items).await {
                Ok(outcome) => {
                    if history.auto_dl {
                        for result_id in outcome.new_ids {
                            self.queue_result_download(sub, result_id);
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(id = %sub.id(), "failed to store results: {}", e);
                    sub.update_history(|h| h.set_last_error(&e.to_string(), false));
                }
            },
            Err(SearchError::Auth(message)) => {
                tracing::info!(id = %sub.id(), "search authentication failed: {}", message);
                sub.update_history(|h| h.set_last_error(&message, true));
            }
            Err(SearchError::Fatal(message)) => {
                tracing::warn!(id = %sub.id(), "search failed permanently: {}", message);
                sub.update_history(|h| h.set_fatal_error(&message));
            }
            Err(e) => {
                tracing::info!(id = %sub.id(), "search failed: {}", e);
                sub.update_history(|h| h.set_last_error(&e.to_string(), false));
            }
        }

        sub.events().publish(SubscriptionEvent::Downloaded {
            id: sub.id().to_string(),
        });
        Ok(true)
    }
}

fn affects_schedule(event: &SubscriptionEvent) -> bool {
    matches!(
        event,
        SubscriptionEvent::Added { .. }
            | SubscriptionEvent::Removed { .. }
            | SubscriptionEvent::Upgraded { .. }
            | SubscriptionEvent::Changed {
                reason: ChangeReason::Details | ChangeReason::History | ChangeReason::Metadata,
                ..
            }
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MINUTE_MS;
    use crate::results::ResultItem;
    use crate::testkit::TestNetwork;

    fn items(names: &[&str]) -> Vec<ResultItem> {
        names.iter().map(|n| ResultItem::new(n)).collect()
    }

    #[tokio::test]
    async fn test_poll_reconciles_results() {
        let network = TestNetwork::new();
        let peer = network.peer("a").await;
        let sub = peer.create_polled("news", None, 120).await;
        network.search().push_items(sub.id(), items(&["a", "b", "c"]));

        assert!(peer.scheduler.download(&sub, false).await.unwrap());
        let history = sub.history();
        assert!(history.last_scan > 0);
        assert_eq!((history.num_read, history.num_unread), (3, 0));
    }

    #[tokio::test]
    async fn test_search_errors_are_recorded() {
        let network = TestNetwork::new();
        let peer = network.peer("a").await;
        let sub = peer.create_polled("private", None, 120).await;

        network
            .search()
            .push_error(sub.id(), SearchError::Auth("bad cookie".to_string()));
        assert!(peer.scheduler.download(&sub, false).await.unwrap());
        let history = sub.history();
        assert_eq!(history.last_error.as_deref(), Some("bad cookie"));
        assert!(history.auth_failed);
        assert_eq!(history.consec_fails, 1);

        network
            .search()
            .push_error(sub.id(), SearchError::Fatal("gone".to_string()));
        peer.scheduler.download(&sub, false).await.unwrap();
        assert!(sub.history().is_fatal());

        network.search().push_items(sub.id(), items(&["x"]));
        peer.scheduler.download(&sub, false).await.unwrap();
        assert_eq!(sub.history().last_error, None);
    }

    #[tokio::test]
    async fn test_rate_limit_auto_and_explicit() {
        let network = TestNetwork::new();
        let peer = network
            .peer_with_scheduler("a", SchedulerConfig {
                rate_limits: "feeds.example.com=5".to_string(),
                ..SchedulerConfig::default()
            })
            .await;
        let sub = peer
            .create_polled("limited", Some("https://feeds.example.com/rss"), 60)
            .await;

        assert!(peer.scheduler.download(&sub, false).await.unwrap());
        assert!(!peer.scheduler.download(&sub, true).await.unwrap());
        let err = peer.scheduler.download(&sub, false).await.unwrap_err();
        assert!(matches!(err, SchedulerError::RateLimited { ref host, .. } if host == "feeds.example.com"));
        assert_eq!(network.search().calls(sub.id()), 1);
    }

    #[tokio::test]
    async fn test_concurrent_polls_are_single_flight() {
        let network = TestNetwork::new();
        let peer = network.peer("a").await;
        let sub = peer.create_polled("slow", None, 60).await;
        network.search().set_delay(Duration::from_millis(200));
        network.search().push_items(sub.id(), items(&["one"]));

        let (first, second) = tokio::join!(
            peer.scheduler.download(&sub, false),
            peer.scheduler.download(&sub, false)
        );
        assert!(first.unwrap());
        assert!(second.unwrap());
        assert_eq!(network.search().calls(sub.id()), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_joined_poll_sees_abandoned_leader() {
        let network = TestNetwork::new();
        let peer = network.peer("a").await;
        let sub = peer.create_polled("slow", None, 60).await;
        network.search().set_delay(Duration::from_secs(30));

        let leader = {
            let scheduler = peer.scheduler.clone();
            let sub = sub.clone();
            tokio::spawn(async move { scheduler.download(&sub, false).await })
        };
        while network.search().calls(sub.id()) == 0 {
            tokio::task::yield_now().await;
        }

        let follower = {
            let scheduler = peer.scheduler.clone();
            let sub = sub.clone();
            tokio::spawn(async move { scheduler.download(&sub, false).await })
        };
        let waiting = |scheduler: &Scheduler| {
            scheduler
                .0
                .state
                .lock()
                .in_flight
                .get(sub.id())
                .map_or(0, Vec::len)
        };
        while waiting(&peer.scheduler) == 0 {
            tokio::task::yield_now().await;
        }
        leader.abort();

        let joined = follower.await.unwrap();
        assert!(joined.is_err());
        assert_eq!(network.search().calls(sub.id()), 1);
    }

    #[test]
    fn test_joined_outcome_keeps_rate_limit() {
        let limited: Result<bool, SchedulerError> = Err(SchedulerError::RateLimited {
            host: "feeds.example.com".to_string(),
            retry_in: Duration::from_secs(5),
        });
        let joined = Joined::of(&limited).into_result();
        assert!(matches!(
            joined,
            Err(SchedulerError::RateLimited { ref host, retry_in })
                if host == "feeds.example.com" && retry_in == Duration::from_secs(5)
        ));
        assert!(matches!(Joined::of(&Ok(false)).into_result(), Ok(false)));
    }

    #[tokio::test]
    async fn test_failures_back_off_from_last_failure() {
        let network = TestNetwork::new();
        let peer = network.peer("a").await;
        let sub = peer.create_polled("flaky", None, 60).await;

        for k in 1..=4u32 {
            network
                .search()
                .push_error(sub.id(), SearchError::Failed("timeout".to_string()));
            // force the subscription due now
            peer.scheduler.0.state.lock().scans.entry(sub.id().to_string()).or_default().next_scan =
                Some(now_ms());
            peer.scheduler.schedule().await;

            assert_eq!(peer.scheduler.fails(sub.id()), k);
            let fail_time = peer.scheduler.0.state.lock().scans[sub.id()].fail_time;
            let next = peer.scheduler.next_scan_time(&sub).unwrap();
            assert_eq!(
                next - fail_time,
                (FAIL_INIT_DELAY_MS * 2i64.pow(k - 1)).min(FAIL_MAX_DELAY_MS)
            );
        }

        network.search().push_items(sub.id(), items(&["ok"]));
        peer.scheduler.0.state.lock().scans.entry(sub.id().to_string()).or_default().next_scan =
            Some(now_ms());
        peer.scheduler.schedule().await;
        assert_eq!(peer.scheduler.fails(sub.id()), 0);
        let next = peer.scheduler.next_scan_time(&sub).unwrap();
        assert_eq!(next, sub.history().last_scan + 60 * MINUTE_MS);
    }

    #[tokio::test]
    async fn test_schedule_skips_not_yet_due() {
        let network = TestNetwork::new();
        let peer = network.peer("a").await;
        let sub = peer.create_polled("later", None, 60).await;
        sub.update_history(|h| h.last_scan = now_ms());
        peer.scheduler.permit();

        peer.scheduler.schedule().await;
        assert_eq!(network.search().calls(sub.id()), 0);
        let due = peer.scheduler.0.state.lock().scans[sub.id()].next_scan.unwrap();
        assert!(due > now_ms() + 50 * MINUTE_MS);
    }

    #[tokio::test]
    async fn test_nothing_scheduled_before_permit() {
        let network = TestNetwork::new();
        let peer = network.peer("a").await;
        peer.create_polled("waiting", None, 60).await;

        peer.scheduler.calculate_schedule();
        assert!(peer.scheduler.0.state.lock().timer.is_none());
        peer.scheduler.permit();
        assert!(peer.scheduler.0.state.lock().timer.is_some());
    }
}
