/// Lightweight harness for multi-peer tests
///
/// Every [`TestPeer`] of a [`TestNetwork`] gets its own registry in a
/// temporary directory, but all of them share one in-memory DHT, content
/// store, directory, search engine and result downloader, so gossip between
/// peers works in-process.
///
/// # Example
///
/// ```rust,ignore
/// use common::testkit::TestNetwork;
///
/// #[tokio::test]
/// async fn test_gossip() {
///     let network = TestNetwork::new();
///     let alice = network.peer("alice").await;
///     let bob = network.peer("bob").await;
///
///     let sub = alice.create_public("shows").await;
///     alice.discovery.publish_presence_for(&sub).await.unwrap();
///     network.serve_envelope(&sub);
///
///     let found = bob
///         .discovery
///         .lookup_subscription(&sub.short_id(), sub.version(), false)
///         .await
///         .unwrap();
///     assert!(found.is_some());
/// }
/// ```
mod network;
mod peer;
mod providers;

pub use network::{PeerOptions, TestNetwork};
pub use peer::{TestPeer, TEST_ENGINE};
pub use providers::{
    MemoryDirectory, MemoryFetcher, RecordingPrompt, ScriptedDownloader, ScriptedSearchEngine,
};
