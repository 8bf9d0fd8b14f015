use crate::content_id::ContentId;
use crate::envelope::ShortId;

pub const ASSOCIATION_KEY_PREFIX: &str = "subscription:assoc:";
pub const PRESENCE_KEY_PREFIX: &str = "subscription:publish:";

/// Key under which subscriptions associated with `hash` are announced
pub fn association_key(hash: &ContentId) -> Vec<u8> {
    format!("{}{}", ASSOCIATION_KEY_PREFIX, hash.to_hex()).into_bytes()
}

/// Key under which version `version` of a subscription advertises itself
pub fn presence_key(short_id: &ShortId, version: u32) -> Vec<u8> {
    format!("{}{}:{}", PRESENCE_KEY_PREFIX, short_id.to_id(), version).into_bytes()
}
