use std::fmt::Debug;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;

use crate::content_id::ContentId;

/// What the transfer layer knows about a piece of content before fetching it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentInfo {
    pub size: u64,
}

/// Progress a running download reports to whoever watches it
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransferProgress {
    pub bytes: u64,
    /// Sources currently able to serve the whole content
    pub seeds: u32,
}

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("default error: {0}")]
    Default(#[from] anyhow::Error),
    #[error("content not found: {0}")]
    NotFound(ContentId),
    #[error("content of {size} bytes exceeds the limit of {limit}")]
    TooLarge { size: u64, limit: u64 },
    #[error("transfer abandoned: {0}")]
    Abandoned(String),
    #[error("fetch failed: {0}")]
    Failed(String),
}

/// Retrieves small payloads (envelope documents) by content id
#[async_trait]
pub trait ContentFetcher: Send + Sync + Debug + 'static {
    /// Look up the size of `hash` without downloading it.
    async fn resolve(&self, hash: &ContentId, timeout: Duration) -> Result<ContentInfo, FetchError>;

    /// Download `hash`, publishing progress on `progress` as bytes arrive.
    ///
    /// The caller enforces stall and total timeouts by dropping the future.
    async fn download(
        &self,
        hash: &ContentId,
        progress: watch::Sender<TransferProgress>,
    ) -> Result<Vec<u8>, FetchError>;
}
