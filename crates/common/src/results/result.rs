use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_with::{hex::Hex, serde_as};

use crate::clock::day_of;
use crate::content_id::ContentId;
use crate::crypto::sha256;

/// One row as a search engine returns it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultItem {
    pub name: String,
    /// Engine-assigned identifier, stable across renames when the engine has one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<ContentId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    /// Publish date (ms)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published: Option<i64>,
    #[serde(default)]
    pub seeds: u32,
    #[serde(default)]
    pub peers: u32,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub tags: BTreeSet<String>,
}

impl ResultItem {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            uid: None,
            link: None,
            hash: None,
            size: None,
            published: None,
            seeds: 0,
            peers: 0,
            tags: BTreeSet::new(),
        }
    }
}

/// Name-uniqueness key of a row
pub fn result_key1(engine: &str, name: &str) -> Vec<u8> {
    sha256(&[engine.as_bytes(), &[0], name.as_bytes()]).to_vec()
}

/// Rename-tolerant key of a row, when the engine supplies a uid
pub fn result_key2(engine: &str, uid: &str) -> Vec<u8> {
    sha256(&[engine.as_bytes(), &[0], uid.as_bytes()]).to_vec()
}

/// A stored result with its local read/delete state
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionResult {
    pub id: String,
    #[serde_as(as = "Hex")]
    pub key1: Vec<u8>,
    #[serde_as(as = "Option<Hex>")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key2: Option<Vec<u8>>,
    #[serde(default)]
    pub read: bool,
    #[serde(default)]
    pub deleted: bool,
    /// Day the result was deleted, or last seen in a fetch while deleted
    #[serde(default)]
    pub last_seen_day: i64,
    pub found_at: i64,
    pub item: ResultItem,
}

impl SubscriptionResult {
    pub fn from_item(engine: &str, item: ResultItem, now: i64) -> Self {
        let key1 = result_key1(engine, &item.name);
        let key2 = item.uid.as_deref().map(|uid| result_key2(engine, uid));
        Self {
            id: hex::encode(&key1),
            key1,
            key2,
            read: false,
            deleted: false,
            last_seen_day: 0,
            found_at: now,
            item,
        }
    }

    /// Merge a fresh fetch of the same result into this one.
    ///
    /// The identity keys and read state are kept. The oldest publish date wins
    /// and tags are unioned; everything else comes from the fresh copy. A
    /// tombstone only gets its last-seen day refreshed. Returns whether anything
    /// changed.
    pub fn update_from(&mut self, fresh: &SubscriptionResult, now: i64) -> bool {
        if self.deleted {
            let today = day_of(now);
            if self.last_seen_day != today {
                self.last_seen_day = today;
                return true;
            }
            return false;
        }

        let mut merged = fresh.item.clone();
        merged.published = match (self.item.published, fresh.item.published) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        merged.tags = self.item.tags.union(&fresh.item.tags).cloned().collect();

        let mut changed = false;
        if merged != self.item {
            self.item = merged;
            changed = true;
        }
        if self.key2.is_none() && fresh.key2.is_some() {
            self.key2 = fresh.key2.clone();
            changed = true;
        }
        changed
    }

    /// Soft delete, stamping the tombstone with today's day number
    pub fn delete(&mut self, now: i64) {
        self.deleted = true;
        self.last_seen_day = day_of(now);
    }
}
