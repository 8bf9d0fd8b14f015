use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;

use common::dht::{Dht, DhtError, DhtFlags, GetOutcome, GetRequest, KeyStats, DEFAULT_MAX_VALUE_SIZE};
use common::prelude::{ContentId, ResultItem};
use common::providers::{
    ContentFetcher, ContentInfo, DownloadError, FetchError, ResultDownloader, SearchEngine,
    SearchError, SearchRequest, TransferProgress,
};

/// Stand-in for a service missing from `config.toml`; every call fails
///
/// Failures are plain (not fatal) so subscriptions start polling once the
/// service is configured and the daemon restarted.
#[derive(Debug, Clone, Copy)]
pub struct Unconfigured(pub &'static str);

impl Unconfigured {
    fn message(&self) -> String {
        format!("no {} configured", self.0)
    }
}

#[async_trait]
impl SearchEngine for Unconfigured {
    async fn execute(&self, _request: SearchRequest) -> Result<Vec<ResultItem>, SearchError> {
        Err(SearchError::Failed(self.message()))
    }
}

#[async_trait]
impl ResultDownloader for Unconfigured {
    async fn download(&self, _link: &str, _referer: Option<&str>) -> Result<ContentId, DownloadError> {
        Err(DownloadError::Failed(self.message()))
    }
}

#[async_trait]
impl ContentFetcher for Unconfigured {
    async fn resolve(&self, _hash: &ContentId, _timeout: Duration) -> Result<ContentInfo, FetchError> {
        Err(FetchError::Failed(self.message()))
    }

    async fn download(
        &self,
        _hash: &ContentId,
        _progress: watch::Sender<TransferProgress>,
    ) -> Result<Vec<u8>, FetchError> {
        Err(FetchError::Failed(self.message()))
    }
}

#[async_trait]
impl Dht for Unconfigured {
    async fn get(&self, _key: &[u8], _request: GetRequest) -> Result<GetOutcome, DhtError> {
        Err(DhtError::Unavailable(self.message()))
    }

    async fn put(&self, _key: &[u8], _value: Vec<u8>, _flags: DhtFlags) -> Result<(), DhtError> {
        Err(DhtError::Unavailable(self.message()))
    }

    async fn key_stats(&self, _key: &[u8], _timeout: Duration) -> Result<KeyStats, DhtError> {
        Err(DhtError::Unavailable(self.message()))
    }

    fn max_value_size(&self) -> usize {
        DEFAULT_MAX_VALUE_SIZE
    }

    fn is_initialising(&self) -> bool {
        false
    }

    async fn wait_ready(&self) {}

    fn is_sleeping(&self) -> bool {
        false
    }

    fn is_anonymous(&self) -> bool {
        false
    }
}
