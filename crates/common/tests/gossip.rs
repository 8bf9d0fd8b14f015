//! Integration tests for subscription gossip between peers

mod common;

use ::common::content_id::ContentId;
use ::common::dht::{association_key, presence_key};
use ::common::discovery::{LookupEvent, LookupOutcome};
use ::common::jobs::Job;
use ::common::subscription::AddType;
use ::common::testkit::TestNetwork;

#[tokio::test]
async fn test_downloaded_content_leads_peer_to_subscription() {
    let network = TestNetwork::new();
    let alice = network.peer("alice").await;
    let bob = network.peer("bob").await;

    // alice downloads an episode of her public subscription
    let sub = alice.create_public("podcasts").await;
    sub.update_history(|h| h.auto_dl = true);
    let hash = ContentId::new(vec![42; 20]);
    network.downloader().serve(&common::link("ep1"), hash.clone());
    alice.scheduler.download(&sub, false).await.unwrap();
    network
        .search()
        .push_items(sub.id(), vec![common::linked("ep1")]);
    alice.scheduler.download(&sub, false).await.unwrap();
    alice.wait_downloads_idle().await;
    assert!(sub.has_association(&hash));

    // and announces both the association and the subscription itself
    alice.discovery.publish_associations();
    common::wait_until(|| network.dht().value_count(&association_key(&hash)) == 1).await;
    assert!(alice.discovery.publish_presence_for(&sub).await.unwrap());
    network.serve_envelope(&sub);

    // bob holds the same content and asks who else has it
    let handle = bob.discovery.lookup_associations(&hash);
    let found = match handle.next_event().await.unwrap() {
        LookupEvent::Found(found) => found,
        other => panic!("unexpected event {:?}", other),
    };
    assert_eq!(found.id(), sub.id());
    assert_eq!(found.name(), "podcasts");
    assert!(!found.is_mine());
    assert_eq!(found.add_type(), AddType::Lookup);
    assert!(matches!(
        handle.outcome().await,
        LookupOutcome::Complete { timed_out: false, .. }
    ));

    // subscribing makes bob a publisher of the same association
    found.set_subscribed(true);
    let theirs = bob.registry.get(sub.id()).unwrap();
    assert!(bob
        .discovery
        .publish_association(&theirs, &hash)
        .await
        .unwrap());
    assert_eq!(network.dht().value_count(&association_key(&hash)), 2);
}

#[tokio::test]
async fn test_announced_upgrade_reaches_subscriber() {
    let network = TestNetwork::new();
    let alice = network.peer("alice").await;
    let bob = network.peer("bob").await;

    let sub = alice.create_public("releases").await;
    let hash = ContentId::new(vec![9; 20]);
    alice.discovery.publish_association(&sub, &hash).await.unwrap();
    let theirs = bob.adopt(&sub);
    theirs.set_subscribed(true);

    // alice changes the subscription and announces the new version
    sub.set_name("releases (stable)").unwrap();
    assert_eq!(sub.version(), 2);
    alice.discovery.publish_association(&sub, &hash).await.unwrap();
    alice.discovery.publish_presence_for(&sub).await.unwrap();
    network.serve_envelope(&sub);
    assert_eq!(
        network
            .dht()
            .value_count(&presence_key(&sub.short_id(), 2)),
        1
    );

    // bob sees version 2 in the association and queues a check
    bob.discovery.lookup_associations(&hash).outcome().await;
    let jobs = bob.take_jobs();
    assert!(jobs.contains(&Job::CheckUpgrade {
        id: sub.id().to_string(),
        version: 2
    }));

    // the check verifies the presence record and applies the upgrade
    assert!(bob.discovery.check_upgrade(&theirs, 2).await.unwrap());
    assert_eq!(theirs.version(), 2);
    assert_eq!(theirs.name(), "releases (stable)");
    assert!(!theirs.is_mine());
    assert_eq!(bob.prompts(), 1);
}

#[tokio::test]
async fn test_started_peers_publish_in_background() {
    let network = TestNetwork::new();
    let mut alice = network.peer("alice").await;
    alice.start().await;

    let sub = alice.create_public("background").await;
    common::wait_until(|| sub.is_published()).await;
    common::wait_until(|| {
        network
            .dht()
            .value_count(&presence_key(&sub.short_id(), sub.version()))
            == 1
    })
    .await;

    let hash = ContentId::new(vec![5; 20]);
    sub.add_association(hash.clone());
    common::wait_until(|| network.dht().value_count(&association_key(&hash)) == 1).await;
    assert_eq!(sub.associations_remaining_for_publish(), 0);

    alice.stop().await;
}
