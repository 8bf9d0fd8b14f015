/**
 * Wall-clock helpers; timestamps are epoch milliseconds.
 */
pub mod clock;
/**
 * Deterministic DAG-CBOR encoding of envelopes
 *  and presence records.
 */
pub mod codec;
/**
 * Tunables of the registry, scheduler and
 *  discovery loops.
 */
pub mod config;
pub mod content_id;
/**
 * Cryptographic types and operations.
 *  - Ed25519 ownership keys and signatures
 *  - BLAKE3 content hashes, SHA-256 identities
 */
pub mod crypto;
/**
 * The DHT abstraction the gossip protocol runs on,
 *  its key layout, and an in-memory implementation.
 */
pub mod dht;
/**
 * Gossip of subscriptions over the DHT: association
 *  lookups and announcements, presence records,
 *  upgrade checks and popularity.
 */
pub mod discovery;
/**
 * Signed, versioned subscription documents.
 */
pub mod envelope;
/**
 * Broadcast of subscription lifecycle events.
 */
pub mod events;
pub mod jobs;
/**
 * Traits for the collaborators the subscription system
 *  talks to: search engines, downloaders, the content
 *  fetcher, the directory and the upgrade prompt.
 */
pub mod providers;
/**
 * The owned collection of every known subscription,
 *  persisted to disk.
 */
pub mod registry;
/**
 * Per-subscription result sets and the merge of
 *  freshly polled rows into them.
 */
pub mod results;
/**
 * Timer-driven polling of subscribed searches with
 *  failure backoff and per-host rate limits.
 */
pub mod scheduler;
pub mod storage;
/**
 * A subscription: an envelope plus local state,
 *  poll history and content associations.
 */
pub mod subscription;
/**
 * In-process multi-peer harness for tests.
 */
pub mod testkit;
/**
 * Helper for setting build version information
 *  at compile time.
 */
pub mod version;

pub mod prelude {
    pub use crate::config::{DiscoveryConfig, RegistryConfig, SchedulerConfig};
    pub use crate::content_id::ContentId;
    pub use crate::crypto::{PublicKey, SecretKey};
    pub use crate::dht::{Dht, MemoryDht};
    pub use crate::discovery::{Discovery, LookupError, LookupOutcome};
    pub use crate::envelope::{Envelope, EnvelopeError, ShortId};
    pub use crate::events::{ChangeReason, SubscriptionEvent};
    pub use crate::registry::{Registry, RegistryError};
    pub use crate::results::{ResultItem, SubscriptionResult};
    pub use crate::scheduler::{Scheduler, SchedulerError};
    pub use crate::subscription::{Query, Subscription, SubscriptionError};
    pub use crate::version::build_info;
}
