use std::sync::Arc;

use parking_lot::Mutex;

use common::dht::{Dht, MemoryDhtNetwork};
use common::jobs::JobReceiver;
use common::prelude::{Discovery, Registry, RegistryError, Scheduler, SecretKey};
use common::providers::{
    AutoUpgrade, ContentFetcher, Directory, NoDirectory, ResultDownloader, SearchEngine,
};

use crate::providers::{
    http_client, HttpContentFetcher, HttpDht, HttpDirectory, HttpDownloader, HttpSearchEngine,
    Unconfigured,
};
use crate::ServiceConfig;

/// Number of hex characters of the node key used as the DHT node id
const NODE_ID_LEN: usize = 16;

/// Everything the running service shares between its tasks
#[derive(Clone)]
pub struct State {
    registry: Registry,
    discovery: Discovery,
    scheduler: Scheduler,
    node_id: String,
    jobs: Arc<Mutex<Option<JobReceiver>>>,
}

impl std::fmt::Debug for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("State")
            .field("node_id", &self.node_id)
            .field("registry", &self.registry)
            .finish()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StateSetupError {
    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),
    #[error("http client error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("key error: {0}")]
    Key(String),
}

impl State {
    pub async fn from_config(config: &ServiceConfig) -> Result<Self, StateSetupError> {
        let key = match &config.node_secret {
            Some(key) => key.clone(),
            None => SecretKey::generate().map_err(|e| StateSetupError::Key(e.to_string()))?,
        };
        let node_id: String = key.public().to_hex().chars().take(NODE_ID_LEN).collect();

        let app = &config.app;
        let registry = Registry::load(&config.subs_dir, app.registry.clone()).await?;
        tracing::info!(
            dir = %config.subs_dir.display(),
            subscriptions = registry.subscriptions(false).len(),
            "registry loaded"
        );

        let client = http_client()?;
        let search: Arc<dyn SearchEngine> = match &app.search_url {
            Some(url) => Arc::new(HttpSearchEngine::new(url.clone(), client.clone())),
            None => Arc::new(Unconfigured("search service")),
        };
        let (downloader, fetcher): (Arc<dyn ResultDownloader>, Arc<dyn ContentFetcher>) =
            match &app.transfer_url {
                Some(url) => (
                    Arc::new(HttpDownloader::new(url.clone(), client.clone())),
                    Arc::new(HttpContentFetcher::new(url.clone(), client.clone())),
                ),
                None => (
                    Arc::new(Unconfigured("transfer service")),
                    Arc::new(Unconfigured("transfer service")),
                ),
            };
        let directory: Arc<dyn Directory> = match &app.directory_url {
            Some(url) => Arc::new(HttpDirectory::new(url.clone(), client.clone())),
            None => Arc::new(NoDirectory),
        };
        let dht: Arc<dyn Dht> = match (&app.dht_url, config.offline) {
            (_, true) => {
                tracing::info!("offline: gossiping on a process-local dht");
                Arc::new(MemoryDhtNetwork::new().node(&node_id))
            }
            (Some(url), false) => Arc::new(HttpDht::new(url.clone(), client, &node_id)),
            (None, false) => Arc::new(Unconfigured("dht gateway")),
        };

        let (discovery, jobs) = Discovery::new(
            registry.clone(),
            dht,
            fetcher,
            directory,
            Arc::new(AutoUpgrade(app.auto_upgrade)),
            app.discovery.clone(),
        );
        let scheduler = Scheduler::new(registry.clone(), search, downloader, app.scheduler.clone());

        Ok(Self {
            registry,
            discovery,
            scheduler,
            node_id,
            jobs: Arc::new(Mutex::new(Some(jobs))),
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn discovery(&self) -> &Discovery {
        &self.discovery
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// The discovery job queue; `None` once a worker has taken it.
    pub fn take_jobs(&self) -> Option<JobReceiver> {
        self.jobs.lock().take()
    }
}
