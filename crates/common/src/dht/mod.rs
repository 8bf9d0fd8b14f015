//! Key-value DHT contract
//!
//! Only the get/put surface of a DHT is used here; routing, replication and
//! transport belong to whatever implements [`Dht`]. [`MemoryDht`] implements it
//! over a process-local shared map for tests and single-process runs.

mod keys;
mod memory;

use std::fmt::Debug;
use std::ops::BitOr;
use std::time::Duration;

use async_trait::async_trait;

pub use keys::{association_key, presence_key, ASSOCIATION_KEY_PREFIX, PRESENCE_KEY_PREFIX};
pub use memory::{MemoryDht, MemoryDhtNetwork, DEFAULT_MAX_VALUE_SIZE};

/// Options attached to a read or write
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct DhtFlags(u8);

impl DhtFlags {
    pub const NONE: DhtFlags = DhtFlags(0);
    /// Each originator holds at most one value under the key
    pub const SINGLE_VALUE: DhtFlags = DhtFlags(1);
    /// Ask replicas to retain the value longer
    pub const PRECIOUS: DhtFlags = DhtFlags(1 << 1);
    /// Route through the anonymous network bridge
    pub const BRIDGED: DhtFlags = DhtFlags(1 << 2);
    /// Only report entry counts, not values
    pub const STATS: DhtFlags = DhtFlags(1 << 3);
    /// Do not tie the stored value to the writer's identity
    pub const ANON: DhtFlags = DhtFlags(1 << 4);

    pub fn contains(self, other: DhtFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn bits(self) -> u8 {
        self.0
    }
}

impl BitOr for DhtFlags {
    type Output = DhtFlags;

    fn bitor(self, rhs: DhtFlags) -> DhtFlags {
        DhtFlags(self.0 | rhs.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GetRequest {
    pub max_values: usize,
    pub timeout: Duration,
    pub flags: DhtFlags,
    /// Let the DHT stop early and report `diversified` for hot keys
    pub allow_diversify: bool,
}

impl GetRequest {
    pub fn new(max_values: usize, timeout: Duration) -> Self {
        Self {
            max_values,
            timeout,
            flags: DhtFlags::NONE,
            allow_diversify: false,
        }
    }

    pub fn with_flags(mut self, flags: DhtFlags) -> Self {
        self.flags = self.flags | flags;
        self
    }

    pub fn allow_diversify(mut self) -> Self {
        self.allow_diversify = true;
        self
    }
}

/// One value read from the DHT
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DhtValue {
    /// Opaque identity of the node that stored the value
    pub originator: String,
    pub value: Vec<u8>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GetOutcome {
    pub values: Vec<DhtValue>,
    /// The key's values are widely replicated or inconsistent
    pub diversified: bool,
    /// The read hit its timeout; `values` holds what arrived before it
    pub timed_out: bool,
}

/// Result of a stats-only read
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KeyStats {
    /// Largest entry count any responding replica reported
    pub entries: u64,
    pub diversified: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum DhtError {
    #[error("default error: {0}")]
    Default(#[from] anyhow::Error),
    #[error("value of {size} bytes exceeds the maximum of {max}")]
    ValueTooLarge { size: usize, max: usize },
    #[error("dht unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait Dht: Send + Sync + Debug + 'static {
    /// Read up to `request.max_values` values stored under `key`.
    ///
    /// A timeout is not an error: whatever arrived is returned with
    /// `timed_out` set.
    async fn get(&self, key: &[u8], request: GetRequest) -> Result<GetOutcome, DhtError>;

    /// Store `value` under `key`, replacing any value this node stored there before.
    ///
    /// Should fail with the following errors to be considered correct:
    /// * `Err(DhtError::ValueTooLarge)` - `value` exceeds [`Dht::max_value_size`]
    async fn put(&self, key: &[u8], value: Vec<u8>, flags: DhtFlags) -> Result<(), DhtError>;

    /// Stats-only read of `key`
    async fn key_stats(&self, key: &[u8], timeout: Duration) -> Result<KeyStats, DhtError>;

    fn max_value_size(&self) -> usize;

    /// Still bootstrapping; reads would come back empty
    fn is_initialising(&self) -> bool;

    /// Resolve once the DHT has finished bootstrapping
    async fn wait_ready(&self);

    /// The node considers itself idle and wants less traffic
    fn is_sleeping(&self) -> bool;

    /// Traffic goes over an anonymous network, which is slower
    fn is_anonymous(&self) -> bool;
}
