use std::sync::Arc;

use crate::config::{DiscoveryConfig, RegistryConfig, SchedulerConfig};
use crate::content_id::ContentId;
use crate::dht::{MemoryDht, MemoryDhtNetwork};
use crate::providers::DirectoryEntry;
use crate::subscription::Subscription;

use super::peer::TestPeer;
use super::providers::{
    MemoryDirectory, MemoryFetcher, RecordingPrompt, ScriptedDownloader, ScriptedSearchEngine,
};

/// Knobs for a single peer of a [`TestNetwork`]
#[derive(Debug, Clone, Default)]
pub struct PeerOptions {
    pub max_value_size: Option<usize>,
    pub anonymous: bool,
    pub decline_upgrades: bool,
    pub registry: RegistryConfig,
    pub scheduler: SchedulerConfig,
    pub discovery: DiscoveryConfig,
}

/// A set of peers sharing one in-memory DHT, content store, directory,
/// search engine and result downloader
#[derive(Debug, Clone, Default)]
pub struct TestNetwork {
    dht: MemoryDhtNetwork,
    fetcher: MemoryFetcher,
    directory: MemoryDirectory,
    search: ScriptedSearchEngine,
    downloader: ScriptedDownloader,
}

impl TestNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dht(&self) -> &MemoryDhtNetwork {
        &self.dht
    }

    pub fn fetcher(&self) -> &MemoryFetcher {
        &self.fetcher
    }

    pub fn directory(&self) -> &MemoryDirectory {
        &self.directory
    }

    pub fn search(&self) -> &ScriptedSearchEngine {
        &self.search
    }

    pub fn downloader(&self) -> &ScriptedDownloader {
        &self.downloader
    }

    pub async fn peer(&self, name: &str) -> TestPeer {
        self.peer_with(name, PeerOptions::default()).await
    }

    pub async fn peer_with_max_value_size(&self, name: &str, max: usize) -> TestPeer {
        self.peer_with(
            name,
            PeerOptions {
                max_value_size: Some(max),
                ..PeerOptions::default()
            },
        )
        .await
    }

    pub async fn peer_declining_upgrades(&self, name: &str) -> TestPeer {
        self.peer_with(
            name,
            PeerOptions {
                decline_upgrades: true,
                ..PeerOptions::default()
            },
        )
        .await
    }

    pub async fn peer_with_scheduler(&self, name: &str, scheduler: SchedulerConfig) -> TestPeer {
        self.peer_with(
            name,
            PeerOptions {
                scheduler,
                ..PeerOptions::default()
            },
        )
        .await
    }

    pub async fn peer_with(&self, name: &str, options: PeerOptions) -> TestPeer {
        let mut dht: MemoryDht = self.dht.node(name).with_anonymous(options.anonymous);
        if let Some(max) = options.max_value_size {
            dht = dht.with_max_value_size(max);
        }
        let prompt = if options.decline_upgrades {
            RecordingPrompt::declining()
        } else {
            RecordingPrompt::default()
        };
        TestPeer::new(
            name,
            dht,
            Arc::new(self.fetcher.clone()),
            Arc::new(self.directory.clone()),
            Arc::new(prompt),
            Arc::new(self.search.clone()),
            Arc::new(self.downloader.clone()),
            options,
        )
        .await
    }

    /// Make the current envelope of `sub` fetchable by its hash.
    pub fn serve_envelope(&self, sub: &Subscription) {
        let envelope = sub.envelope();
        let data = envelope.encode().expect("encode envelope");
        self.fetcher.serve(ContentId::new(*envelope.hash()), data);
    }

    /// List the current version of `sub` in the directory.
    pub fn list_in_directory(&self, sub: &Subscription, popularity: Option<u64>) {
        let data = sub.envelope().encode().expect("encode envelope");
        self.directory.list(
            sub.short_id(),
            DirectoryEntry {
                version: sub.version(),
                envelope: Some(data),
                popularity,
            },
        );
    }
}
