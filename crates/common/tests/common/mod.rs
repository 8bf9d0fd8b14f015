//! Shared test utilities for subscription integration tests
#![allow(dead_code)]

use std::time::Duration;

use common::results::ResultItem;

pub fn item(name: &str) -> ResultItem {
    ResultItem::new(name)
}

pub fn items(names: &[&str]) -> Vec<ResultItem> {
    names.iter().map(|n| item(n)).collect()
}

/// A row with a download link under the scripted tracker
pub fn linked(name: &str) -> ResultItem {
    let mut item = item(name);
    item.link = Some(link(name));
    item
}

pub fn link(name: &str) -> String {
    format!("https://tracker.example.com/{}", name)
}

/// Poll `condition` until it holds, failing the test after five seconds.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not met in time");
}
