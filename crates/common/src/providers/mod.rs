//! Traits for the external collaborators of the subscription system
//!
//! None of these are implemented here beyond trivial defaults: the daemon plugs
//! in HTTP-backed versions and the [`testkit`](crate::testkit) scripted ones.
//! Every trait is object safe so components hold them as `Arc<dyn _>`.

mod directory;
mod fetch;
mod prompt;
mod search;

pub use directory::{Directory, DirectoryEntry, DirectoryError, NoDirectory};
pub use fetch::{ContentFetcher, ContentInfo, FetchError, TransferProgress};
pub use prompt::{AutoUpgrade, UpgradePrompt};
pub use search::{
    DownloadError, ResultDownloader, SearchEngine, SearchError, SearchRequest,
};
