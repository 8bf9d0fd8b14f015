use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;

use super::{Dht, DhtError, DhtFlags, DhtValue, GetOutcome, GetRequest, KeyStats};

/// Largest value a [`MemoryDht`] accepts unless configured otherwise
pub const DEFAULT_MAX_VALUE_SIZE: usize = 512;

#[derive(Debug, Clone)]
struct StoredValue {
    originator: String,
    value: Vec<u8>,
    flags: DhtFlags,
}

#[derive(Debug, Default)]
struct MemoryDhtNetworkInner {
    /// key -> one value per originator, in insertion order
    values: HashMap<Vec<u8>, Vec<StoredValue>>,
    /// keys that report themselves as diversified
    diversified: HashSet<Vec<u8>>,
}

/// Shared storage that every [`MemoryDht`] node of one test network reads and writes
#[derive(Debug, Clone, Default)]
pub struct MemoryDhtNetwork {
    inner: Arc<RwLock<MemoryDhtNetworkInner>>,
}

fn lock_error<E: std::fmt::Display>(e: E) -> DhtError {
    DhtError::Unavailable(format!("failed to acquire lock: {}", e))
}

impl MemoryDhtNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// A node on this network identified by `node_id`
    pub fn node(&self, node_id: &str) -> MemoryDht {
        MemoryDht {
            network: self.clone(),
            node_id: node_id.to_string(),
            max_value_size: DEFAULT_MAX_VALUE_SIZE,
            anonymous: false,
            state: Arc::new(MemoryDhtState {
                sleeping: AtomicBool::new(false),
                ready: watch::channel(true).0,
            }),
        }
    }

    /// Make reads that allow it report `key` as diversified
    pub fn set_diversified(&self, key: &[u8], diversified: bool) {
        if let Ok(mut inner) = self.inner.write() {
            if diversified {
                inner.diversified.insert(key.to_vec());
            } else {
                inner.diversified.remove(key);
            }
        }
    }

    /// Number of values stored under `key`
    pub fn value_count(&self, key: &[u8]) -> usize {
        self.inner
            .read()
            .map(|inner| inner.values.get(key).map(Vec::len).unwrap_or(0))
            .unwrap_or(0)
    }

    /// Flags the value stored under `key` by `originator` was written with
    pub fn flags_of(&self, key: &[u8], originator: &str) -> Option<DhtFlags> {
        let inner = self.inner.read().ok()?;
        inner
            .values
            .get(key)?
            .iter()
            .find(|v| v.originator == originator)
            .map(|v| v.flags)
    }

    /// Every key stored on the network that starts with `prefix`
    pub fn keys_with_prefix(&self, prefix: &[u8]) -> Vec<Vec<u8>> {
        self.inner
            .read()
            .map(|inner| {
                inner
                    .values
                    .keys()
                    .filter(|k| k.starts_with(prefix))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[derive(Debug)]
struct MemoryDhtState {
    sleeping: AtomicBool,
    ready: watch::Sender<bool>,
}

/// In-memory [`Dht`] node
#[derive(Debug, Clone)]
pub struct MemoryDht {
    network: MemoryDhtNetwork,
    node_id: String,
    max_value_size: usize,
    anonymous: bool,
    state: Arc<MemoryDhtState>,
}

impl Default for MemoryDht {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryDht {
    /// A standalone node on a private network
    pub fn new() -> Self {
        MemoryDhtNetwork::new().node("local")
    }

    pub fn with_max_value_size(mut self, max: usize) -> Self {
        self.max_value_size = max;
        self
    }

    pub fn with_anonymous(mut self, anonymous: bool) -> Self {
        self.anonymous = anonymous;
        self
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn network(&self) -> &MemoryDhtNetwork {
        &self.network
    }

    pub fn set_sleeping(&self, sleeping: bool) {
        self.state.sleeping.store(sleeping, Ordering::Relaxed);
    }

    pub fn set_initialising(&self, initialising: bool) {
        self.state.ready.send_replace(!initialising);
    }
}

#[async_trait]
impl Dht for MemoryDht {
    async fn get(&self, key: &[u8], request: GetRequest) -> Result<GetOutcome, DhtError> {
        let inner = self.network.inner.read().map_err(lock_error)?;

        let limit = request.max_values.max(1);
        let values = inner
            .values
            .get(key)
            .map(|stored| {
                stored
                    .iter()
                    .take(limit)
                    .map(|v| DhtValue {
                        originator: v.originator.clone(),
                        value: v.value.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(GetOutcome {
            values,
            diversified: request.allow_diversify && inner.diversified.contains(key),
            timed_out: false,
        })
    }

    async fn put(&self, key: &[u8], value: Vec<u8>, flags: DhtFlags) -> Result<(), DhtError> {
        if value.len() > self.max_value_size {
            return Err(DhtError::ValueTooLarge {
                size: value.len(),
                max: self.max_value_size,
            });
        }

        let mut inner = self.network.inner.write().map_err(lock_error)?;
        let stored = inner.values.entry(key.to_vec()).or_default();
        let entry = StoredValue {
            originator: self.node_id.clone(),
            value,
            flags,
        };
        match stored.iter_mut().find(|v| v.originator == self.node_id) {
            Some(existing) => *existing = entry,
            None => stored.push(entry),
        }
        Ok(())
    }

    async fn key_stats(&self, key: &[u8], _timeout: Duration) -> Result<KeyStats, DhtError> {
        let inner = self.network.inner.read().map_err(lock_error)?;
        Ok(KeyStats {
            entries: inner.values.get(key).map(Vec::len).unwrap_or(0) as u64,
            diversified: inner.diversified.contains(key),
        })
    }

    fn max_value_size(&self) -> usize {
        self.max_value_size
    }

    fn is_initialising(&self) -> bool {
        !*self.state.ready.borrow()
    }

    async fn wait_ready(&self) {
        let mut rx = self.state.ready.subscribe();
        // the sender lives as long as self, so this only returns once ready
        let _ = rx.wait_for(|ready| *ready).await;
    }

    fn is_sleeping(&self) -> bool {
        self.state.sleeping.load(Ordering::Relaxed)
    }

    fn is_anonymous(&self) -> bool {
        self.anonymous
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn req(max: usize) -> GetRequest {
        GetRequest::new(max, Duration::from_secs(1))
    }

    #[tokio::test]
    async fn test_one_value_per_originator() {
        let network = MemoryDhtNetwork::new();
        let a = network.node("a");
        let b = network.node("b");

        a.put(b"k", b"1".to_vec(), DhtFlags::NONE).await.unwrap();
        a.put(b"k", b"2".to_vec(), DhtFlags::NONE).await.unwrap();
        b.put(b"k", b"3".to_vec(), DhtFlags::PRECIOUS).await.unwrap();

        let out = b.get(b"k", req(10)).await.unwrap();
        assert_eq!(out.values.len(), 2);
        assert_eq!(out.values[0].value, b"2".to_vec());
        assert_eq!(network.flags_of(b"k", "b"), Some(DhtFlags::PRECIOUS));
        assert_eq!(a.key_stats(b"k", Duration::ZERO).await.unwrap().entries, 2);
    }

    #[tokio::test]
    async fn test_oversized_value_rejected() {
        let dht = MemoryDht::new().with_max_value_size(8);
        let err = dht.put(b"k", vec![0; 9], DhtFlags::NONE).await.unwrap_err();
        assert!(matches!(err, DhtError::ValueTooLarge { size: 9, max: 8 }));
        assert_eq!(dht.network().value_count(b"k"), 0);
    }

    #[tokio::test]
    async fn test_limits_and_diversification() {
        let network = MemoryDhtNetwork::new();
        for i in 0..5 {
            network
                .node(&i.to_string())
                .put(b"k", vec![i], DhtFlags::NONE)
                .await
                .unwrap();
        }
        let dht = network.node("reader");
        assert_eq!(dht.get(b"k", req(3)).await.unwrap().values.len(), 3);

        network.set_diversified(b"k", true);
        assert!(!dht.get(b"k", req(3)).await.unwrap().diversified);
        assert!(dht.get(b"k", req(3).allow_diversify()).await.unwrap().diversified);
    }

    #[tokio::test]
    async fn test_wait_ready() {
        let dht = MemoryDht::new();
        dht.set_initialising(true);
        assert!(dht.is_initialising());

        let waiter = {
            let dht = dht.clone();
            tokio::spawn(async move { dht.wait_ready().await })
        };
        dht.set_initialising(false);
        waiter.await.unwrap();
        assert!(!dht.is_initialising());
    }

    #[test]
    fn test_flags() {
        let f = DhtFlags::PRECIOUS | DhtFlags::BRIDGED;
        assert!(f.contains(DhtFlags::PRECIOUS));
        assert!(!f.contains(DhtFlags::SINGLE_VALUE));
        assert!(f.contains(DhtFlags::NONE));
    }
}
