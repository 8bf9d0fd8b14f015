use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::crypto::{sha256, PublicKey};

use super::record::SingletonDescriptor;

/// Number of digest bytes kept in a short id
pub const SHORT_ID_SIZE: usize = 10;

/// Content-addressed identity of a subscription
///
/// The first [`SHORT_ID_SIZE`] bytes of SHA-256 over the owner's public key, or
/// over the singleton key for keyless subscriptions. Its hex form is the
/// subscription id used for lookups and file names.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ShortId([u8; SHORT_ID_SIZE]);

impl ShortId {
    pub fn from_bytes(bytes: [u8; SHORT_ID_SIZE]) -> Self {
        ShortId(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; SHORT_ID_SIZE] {
        &self.0
    }

    /// Stable textual id
    pub fn to_id(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_id(id: &str) -> Option<Self> {
        let mut buff = [0u8; SHORT_ID_SIZE];
        hex::decode_to_slice(id, &mut buff).ok()?;
        Some(ShortId(buff))
    }
}

impl TryFrom<&[u8]> for ShortId {
    type Error = anyhow::Error;
    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        let arr: [u8; SHORT_ID_SIZE] = bytes
            .try_into()
            .map_err(|_| anyhow::anyhow!("short id must be {} bytes", SHORT_ID_SIZE))?;
        Ok(ShortId(arr))
    }
}

impl fmt::Debug for ShortId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ShortId({})", self.to_id())
    }
}

impl fmt::Display for ShortId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_id())
    }
}

impl Serialize for ShortId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_id())
    }
}

impl<'de> Deserialize<'de> for ShortId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        ShortId::from_id(&s).ok_or_else(|| serde::de::Error::custom("invalid short id"))
    }
}

/// Derive the short id of a subscription.
///
/// Pure in its inputs: the singleton key wins when present, otherwise the public
/// key bytes are hashed.
pub fn derive_short_id(public_key: &PublicKey, singleton: Option<&SingletonDescriptor>) -> ShortId {
    match singleton {
        Some(s) => singleton_short_id(&s.key),
        None => truncate(sha256(&[&public_key.to_bytes()])),
    }
}

/// Short id every peer derives for a singleton with this key
pub fn singleton_short_id(key: &[u8]) -> ShortId {
    truncate(sha256(&[key]))
}

fn truncate(digest: [u8; 32]) -> ShortId {
    let mut out = [0u8; SHORT_ID_SIZE];
    out.copy_from_slice(&digest[..SHORT_ID_SIZE]);
    ShortId(out)
}
