//! Integration tests for polling a subscription into its result store

mod common;

use ::common::events::SubscriptionEvent;
use ::common::testkit::TestNetwork;

fn drain(events: &mut ::common::events::EventSubscriber) -> Vec<SubscriptionEvent> {
    std::iter::from_fn(|| events.try_recv()).collect()
}

#[tokio::test]
async fn test_first_scan_then_unchanged_then_merged() {
    let network = TestNetwork::new();
    let peer = network.peer("a").await;
    let sub = peer.create_polled("weekly", None, 120).await;
    let mut events = peer.registry.events().subscribe();

    // first poll: everything arrives already read
    network
        .search()
        .push_items(sub.id(), common::items(&["one", "two", "three"]));
    assert!(peer.scheduler.download(&sub, false).await.unwrap());
    let history = sub.history();
    assert_eq!((history.num_read, history.num_unread), (3, 0));
    let first_scan = history.last_scan;
    assert!(first_scan > 0);
    drain(&mut events);

    // second poll: same rows, nothing stored, only the scan time moves
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    network
        .search()
        .push_items(sub.id(), common::items(&["one", "two", "three"]));
    peer.scheduler.download(&sub, false).await.unwrap();
    assert!(sub.history().last_scan > first_scan);
    assert_eq!(sub.history().num_unread, 0);
    let seen = drain(&mut events);
    assert!(!seen
        .iter()
        .any(|e| matches!(e, SubscriptionEvent::ResultsChanged { .. })));
    assert!(seen.contains(&SubscriptionEvent::Downloaded {
        id: sub.id().to_string()
    }));

    // third poll: a row with a known name but new details merges in place
    let mut changed = common::item("two");
    changed.size = Some(4096);
    network.search().push_items(sub.id(), vec![changed]);
    peer.scheduler.download(&sub, false).await.unwrap();

    let results = peer.registry.results().results(&sub, false).await.unwrap();
    assert_eq!(results.len(), 3);
    let two = results.iter().find(|r| r.item.name == "two").unwrap();
    assert_eq!(two.item.size, Some(4096));
    assert!(two.read);
    assert_eq!(sub.history().num_unread, 0);
    assert!(drain(&mut events).contains(&SubscriptionEvent::ResultsChanged {
        id: sub.id().to_string(),
        new_unread: 0
    }));
}

#[tokio::test]
async fn test_new_results_after_first_scan_are_unread() {
    let network = TestNetwork::new();
    let peer = network.peer("a").await;
    let sub = peer.create_polled("daily", None, 60).await;

    network.search().push_items(sub.id(), common::items(&["old"]));
    peer.scheduler.download(&sub, false).await.unwrap();
    network
        .search()
        .push_items(sub.id(), common::items(&["old", "new"]));
    peer.scheduler.download(&sub, false).await.unwrap();

    let history = sub.history();
    assert_eq!((history.num_read, history.num_unread), (1, 1));
    assert!(history.last_new_result > 0);
}

#[tokio::test]
async fn test_auto_download_associates_content() {
    let network = TestNetwork::new();
    let peer = network.peer("a").await;
    let sub = peer.create_public("shows").await;
    sub.update_history(|h| h.auto_dl = true);
    let hash = ::common::content_id::ContentId::new(vec![3; 20]);
    network.downloader().serve(&common::link("ep2"), hash.clone());

    network
        .search()
        .push_items(sub.id(), vec![common::linked("ep1")]);
    peer.scheduler.download(&sub, false).await.unwrap();
    network
        .search()
        .push_items(sub.id(), vec![common::linked("ep1"), common::linked("ep2")]);
    peer.scheduler.download(&sub, false).await.unwrap();
    peer.wait_downloads_idle().await;

    // only the unread second result was fetched
    let calls = network.downloader().calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0, common::link("ep2"));
    assert!(sub.has_association(&hash));
    assert_eq!(sub.history().num_unread, 0);
}

#[tokio::test]
async fn test_started_peer_polls_due_subscription() {
    let network = TestNetwork::new();
    let mut peer = network.peer("a").await;
    let sub = peer.create_polled("due now", None, 60).await;
    network.search().push_items(sub.id(), common::items(&["x"]));

    peer.start().await;
    common::wait_until(|| sub.history().last_scan > 0).await;
    assert_eq!(network.search().calls(sub.id()), 1);
    assert_eq!(peer.scheduler.fails(sub.id()), 0);
    peer.stop().await;
}
