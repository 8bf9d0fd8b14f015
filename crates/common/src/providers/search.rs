use std::fmt::Debug;

use async_trait::async_trait;

use crate::content_id::ContentId;
use crate::results::ResultItem;
use crate::subscription::Query;

/// One poll of a subscription's saved search
#[derive(Debug, Clone, PartialEq)]
pub struct SearchRequest {
    pub subscription_id: String,
    pub query: Query,
    /// Networks the search may use; `None` lets the engine decide
    pub networks: Option<Vec<String>>,
    /// Ignore rows older than this
    pub max_age_secs: Option<u64>,
}

#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    #[error("default error: {0}")]
    Default(#[from] anyhow::Error),
    /// The engine rejected our credentials
    #[error("authentication failed: {0}")]
    Auth(String),
    /// Retrying will never help, e.g. the engine no longer exists
    #[error("fatal search error: {0}")]
    Fatal(String),
    #[error("search failed: {0}")]
    Failed(String),
}

/// Turns a query into result rows
#[async_trait]
pub trait SearchEngine: Send + Sync + Debug + 'static {
    async fn execute(&self, request: SearchRequest) -> Result<Vec<ResultItem>, SearchError>;
}

#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    #[error("default error: {0}")]
    Default(#[from] anyhow::Error),
    /// The link answered but not with something we can use; often fixed by
    /// sending (or not sending) a referer
    #[error("could not decode download: {0}")]
    Decode(String),
    #[error("download failed: {0}")]
    Failed(String),
}

/// Downloads the content a result links to
#[async_trait]
pub trait ResultDownloader: Send + Sync + Debug + 'static {
    /// Fetch `link` and hand it to the transfer layer, returning its content id.
    async fn download(&self, link: &str, referer: Option<&str>) -> Result<ContentId, DownloadError>;
}
