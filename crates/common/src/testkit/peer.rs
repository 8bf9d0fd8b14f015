use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tempfile::TempDir;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::discovery::Discovery;
use crate::dht::MemoryDht;
use crate::envelope::Envelope;
use crate::jobs::{Job, JobReceiver};
use crate::providers::{ContentFetcher, Directory, ResultDownloader, SearchEngine};
use crate::registry::Registry;
use crate::scheduler::Scheduler;
use crate::subscription::{Query, Subscription};

use super::network::PeerOptions;
use super::providers::RecordingPrompt;

/// Engine name used by subscriptions the test peers create
pub const TEST_ENGINE: &str = "test";

/// One peer of a [`TestNetwork`](super::TestNetwork): a registry in a
/// temporary directory with its discovery and scheduler wired up
pub struct TestPeer {
    pub name: String,
    pub registry: Registry,
    pub dht: MemoryDht,
    pub discovery: Discovery,
    pub scheduler: Scheduler,
    prompt: Arc<RecordingPrompt>,
    jobs: Mutex<Option<JobReceiver>>,
    shutdown_tx: Option<watch::Sender<()>>,
    tasks: Vec<JoinHandle<()>>,
    _dir: TempDir,
}

impl std::fmt::Debug for TestPeer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestPeer")
            .field("name", &self.name)
            .field("registry", &self.registry)
            .finish()
    }
}

impl TestPeer {
    #[allow(clippy::too_many_arguments)]
    pub(super) async fn new(
        name: &str,
        dht: MemoryDht,
        fetcher: Arc<dyn ContentFetcher>,
        directory: Arc<dyn Directory>,
        prompt: Arc<RecordingPrompt>,
        search: Arc<dyn SearchEngine>,
        downloader: Arc<dyn ResultDownloader>,
        options: PeerOptions,
    ) -> Self {
        let dir = TempDir::new().expect("create temp dir");
        let registry = Registry::load(dir.path(), options.registry)
            .await
            .expect("load registry");
        let (discovery, jobs) = Discovery::new(
            registry.clone(),
            Arc::new(dht.clone()),
            fetcher,
            directory,
            prompt.clone(),
            options.discovery,
        );
        let scheduler = Scheduler::new(registry.clone(), search, downloader, options.scheduler);
        tracing::debug!("[{}] test peer created", name);

        Self {
            name: name.to_string(),
            registry,
            dht,
            discovery,
            scheduler,
            prompt,
            jobs: Mutex::new(Some(jobs)),
            shutdown_tx: None,
            tasks: Vec::new(),
            _dir: dir,
        }
    }

    /// Author a public, subscribed subscription that is never polled.
    pub async fn create_public(&self, name: &str) -> Subscription {
        let mut query = Query::new(TEST_ENGINE);
        query.referer = Some("https://tracker.example.com/".to_string());
        let payload = query.to_payload().expect("encode query");
        self.registry
            .create(name, true, false, payload)
            .expect("create subscription")
    }

    /// Author a private, subscribed subscription polled every `interval` minutes.
    pub async fn create_polled(&self, name: &str, url: Option<&str>, interval: i64) -> Subscription {
        let mut query = Query::new(TEST_ENGINE).with_interval(interval);
        if let Some(url) = url {
            query = query.with_url(url);
        }
        let payload = query.to_payload().expect("encode query");
        self.registry
            .create(name, false, false, payload)
            .expect("create subscription")
    }

    /// Learn `sub` the way a lookup would: from its public, verified document.
    pub fn adopt(&self, sub: &Subscription) -> Subscription {
        let data = sub.envelope().encode().expect("encode envelope");
        let envelope = Envelope::decode(&data, true).expect("decode envelope");
        self.registry.add_from_lookup(envelope)
    }

    /// Jobs queued for the discovery worker so far; empty once started.
    pub fn take_jobs(&self) -> Vec<Job> {
        let jobs = self.jobs.lock();
        let Some(receiver) = jobs.as_ref() else {
            return Vec::new();
        };
        std::iter::from_fn(|| receiver.try_recv()).collect()
    }

    /// How often this peer was asked to confirm an upgrade
    pub fn prompts(&self) -> usize {
        self.prompt.asked()
    }

    /// Wait until no result downloads are queued or running.
    pub async fn wait_downloads_idle(&self) {
        while self.scheduler.active_downloads() > 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    /// Run the discovery worker and the scheduler in the background.
    pub async fn start(&mut self) {
        let Some(jobs) = self.jobs.lock().take() else {
            return;
        };
        let (shutdown_tx, shutdown_rx) = watch::channel(());
        self.tasks.push(tokio::spawn(
            self.discovery.clone().run(jobs, shutdown_rx.clone()),
        ));
        self.tasks
            .push(tokio::spawn(self.scheduler.clone().run(shutdown_rx)));
        self.scheduler.permit();
        self.shutdown_tx = Some(shutdown_tx);

        // let the workers subscribe to registry events
        tokio::time::sleep(Duration::from_millis(50)).await;
        tracing::info!("[{}] test peer started", self.name);
    }

    pub async fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        for task in self.tasks.drain(..) {
            let _ = task.await;
        }
        tracing::info!("[{}] test peer stopped", self.name);
    }
}
