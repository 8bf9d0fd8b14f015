//! In-memory and scripted stand-ins for the external collaborators

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::watch;

use crate::content_id::ContentId;
use crate::envelope::ShortId;
use crate::providers::{
    ContentFetcher, ContentInfo, Directory, DirectoryEntry, DirectoryError, DownloadError,
    FetchError, ResultDownloader, SearchEngine, SearchError, SearchRequest, TransferProgress,
    UpgradePrompt,
};
use crate::results::ResultItem;
use crate::subscription::Subscription;

/// Content store every peer of a test network fetches from
#[derive(Debug, Clone, Default)]
pub struct MemoryFetcher {
    content: Arc<Mutex<HashMap<ContentId, Vec<u8>>>>,
}

impl MemoryFetcher {
    pub fn serve(&self, hash: ContentId, data: Vec<u8>) {
        self.content.lock().insert(hash, data);
    }
}

#[async_trait]
impl ContentFetcher for MemoryFetcher {
    async fn resolve(&self, hash: &ContentId, _timeout: Duration) -> Result<ContentInfo, FetchError> {
        self.content
            .lock()
            .get(hash)
            .map(|data| ContentInfo {
                size: data.len() as u64,
            })
            .ok_or_else(|| FetchError::NotFound(hash.clone()))
    }

    async fn download(
        &self,
        hash: &ContentId,
        progress: watch::Sender<TransferProgress>,
    ) -> Result<Vec<u8>, FetchError> {
        let data = self
            .content
            .lock()
            .get(hash)
            .cloned()
            .ok_or_else(|| FetchError::NotFound(hash.clone()))?;
        progress.send_replace(TransferProgress {
            bytes: data.len() as u64,
            seeds: 1,
        });
        Ok(data)
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemoryDirectory {
    entries: Arc<Mutex<HashMap<ShortId, DirectoryEntry>>>,
    delay: Arc<Mutex<Option<Duration>>>,
}

impl MemoryDirectory {
    pub fn list(&self, short_id: ShortId, entry: DirectoryEntry) {
        self.entries.lock().insert(short_id, entry);
    }

    /// Make every lookup take this long
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = Some(delay);
    }
}

#[async_trait]
impl Directory for MemoryDirectory {
    async fn lookup(
        &self,
        short_id: &ShortId,
        _anonymous: bool,
    ) -> Result<Option<DirectoryEntry>, DirectoryError> {
        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self.entries.lock().get(short_id).cloned())
    }
}

#[derive(Debug, Default)]
struct SearchScript {
    replies: HashMap<String, VecDeque<Result<Vec<ResultItem>, SearchError>>>,
    calls: HashMap<String, usize>,
    delay: Option<Duration>,
}

/// Search engine answering each subscription from a queue of canned replies
///
/// An empty queue answers with no rows.
#[derive(Debug, Clone, Default)]
pub struct ScriptedSearchEngine {
    script: Arc<Mutex<SearchScript>>,
}

impl ScriptedSearchEngine {
    pub fn push_items(&self, id: &str, items: Vec<ResultItem>) {
        self.push(id, Ok(items));
    }

    pub fn push_error(&self, id: &str, error: SearchError) {
        self.push(id, Err(error));
    }

    fn push(&self, id: &str, reply: Result<Vec<ResultItem>, SearchError>) {
        self.script
            .lock()
            .replies
            .entry(id.to_string())
            .or_default()
            .push_back(reply);
    }

    /// Make every search take this long
    pub fn set_delay(&self, delay: Duration) {
        self.script.lock().delay = Some(delay);
    }

    pub fn calls(&self, id: &str) -> usize {
        self.script.lock().calls.get(id).copied().unwrap_or(0)
    }
}

#[async_trait]
impl SearchEngine for ScriptedSearchEngine {
    async fn execute(&self, request: SearchRequest) -> Result<Vec<ResultItem>, SearchError> {
        let id = request.subscription_id;
        let delay = {
            let mut script = self.script.lock();
            *script.calls.entry(id.clone()).or_default() += 1;
            script.delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.script
            .lock()
            .replies
            .get_mut(&id)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| Ok(Vec::new()))
    }
}

#[derive(Debug, Clone)]
struct Served {
    hash: ContentId,
    /// Sending a referer breaks the download
    refuses_referer: bool,
}

#[derive(Debug, Default)]
struct DownloadScript {
    links: HashMap<String, Served>,
    calls: Vec<(String, Option<String>)>,
}

/// Result downloader serving a fixed set of links
#[derive(Debug, Clone, Default)]
pub struct ScriptedDownloader {
    script: Arc<Mutex<DownloadScript>>,
}

impl ScriptedDownloader {
    pub fn serve(&self, link: &str, hash: ContentId) {
        self.insert(link, hash, false);
    }

    /// Serve `link` only to requests without a referer
    pub fn serve_without_referer(&self, link: &str, hash: ContentId) {
        self.insert(link, hash, true);
    }

    fn insert(&self, link: &str, hash: ContentId, refuses_referer: bool) {
        self.script.lock().links.insert(
            link.to_string(),
            Served {
                hash,
                refuses_referer,
            },
        );
    }

    /// Every `(link, referer)` requested so far, in order
    pub fn calls(&self) -> Vec<(String, Option<String>)> {
        self.script.lock().calls.clone()
    }
}

#[async_trait]
impl ResultDownloader for ScriptedDownloader {
    async fn download(&self, link: &str, referer: Option<&str>) -> Result<ContentId, DownloadError> {
        let mut script = self.script.lock();
        script
            .calls
            .push((link.to_string(), referer.map(str::to_string)));
        match script.links.get(link) {
            Some(served) if served.refuses_referer && referer.is_some() => {
                Err(DownloadError::Decode("got an html page".to_string()))
            }
            Some(served) => Ok(served.hash.clone()),
            None => Err(DownloadError::Failed(format!("{} not found", link))),
        }
    }
}

/// Prompt with a fixed answer that counts how often it was asked
#[derive(Debug, Default)]
pub struct RecordingPrompt {
    decline: bool,
    asked: AtomicUsize,
}

impl RecordingPrompt {
    pub fn declining() -> Self {
        Self {
            decline: true,
            asked: AtomicUsize::new(0),
        }
    }

    pub fn asked(&self) -> usize {
        self.asked.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl UpgradePrompt for RecordingPrompt {
    async fn confirm(&self, _sub: &Subscription, _new_version: u32) -> bool {
        self.asked.fetch_add(1, Ordering::SeqCst);
        !self.decline
    }
}
