use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::content_id::ContentId;

/// Most associations an entity remembers
pub const MAX_ASSOCIATIONS: usize = 256;
/// The newest associations are never evicted and are published first
pub const MIN_RECENT_ASSOC_TO_RETAIN: usize = 16;

/// A recorded belief that `hash` belongs to the subscription's results
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Association {
    pub hash: ContentId,
    /// When it was recorded (ms)
    pub when: i64,
    /// Announced to the DHT in this process lifetime
    #[serde(skip)]
    pub published: bool,
}

/// Append an association unless already present.
///
/// Over capacity, one entry chosen at random among the older ones (everything
/// but the newest [`MIN_RECENT_ASSOC_TO_RETAIN`]) is evicted.
pub(crate) fn add<R: Rng>(
    list: &mut Vec<Association>,
    hash: ContentId,
    when: i64,
    rng: &mut R,
) -> bool {
    if list.iter().any(|a| a.hash == hash) {
        return false;
    }
    list.push(Association {
        hash,
        when,
        published: false,
    });
    if list.len() > MAX_ASSOCIATIONS {
        let victim = rng.random_range(0..MAX_ASSOCIATIONS - MIN_RECENT_ASSOC_TO_RETAIN);
        list.remove(victim);
    }
    true
}

/// Pick the next unpublished association and mark it published.
///
/// Recent entries go first, newest to oldest; then the rest in random order.
pub(crate) fn take_for_publish<R: Rng>(
    list: &mut [Association],
    rng: &mut R,
) -> Option<Association> {
    let recent_start = list.len().saturating_sub(MIN_RECENT_ASSOC_TO_RETAIN);

    for assoc in list[recent_start..].iter_mut().rev() {
        if !assoc.published {
            assoc.published = true;
            return Some(assoc.clone());
        }
    }

    let mut older: Vec<usize> = (0..recent_start).collect();
    older.shuffle(rng);
    for i in older {
        if !list[i].published {
            list[i].published = true;
            return Some(list[i].clone());
        }
    }
    None
}
