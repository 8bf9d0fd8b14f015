use std::fmt::Debug;

use async_trait::async_trait;

use crate::envelope::ShortId;

/// What an authoritative directory knows about a subscription
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryEntry {
    pub version: u32,
    /// Encoded envelope document at `version`, if the directory serves it
    pub envelope: Option<Vec<u8>>,
    pub popularity: Option<u64>,
}

#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    #[error("default error: {0}")]
    Default(#[from] anyhow::Error),
    #[error("directory unavailable: {0}")]
    Unavailable(String),
}

/// Central directory consulted before falling back to the DHT
#[async_trait]
pub trait Directory: Send + Sync + Debug + 'static {
    /// `Ok(None)` means the directory does not know the subscription.
    async fn lookup(
        &self,
        short_id: &ShortId,
        anonymous: bool,
    ) -> Result<Option<DirectoryEntry>, DirectoryError>;
}

/// A directory that knows nothing, for deployments without one
#[derive(Debug, Clone, Copy, Default)]
pub struct NoDirectory;

#[async_trait]
impl Directory for NoDirectory {
    async fn lookup(
        &self,
        _short_id: &ShortId,
        _anonymous: bool,
    ) -> Result<Option<DirectoryEntry>, DirectoryError> {
        Ok(None)
    }
}
