use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Identifier of a piece of content a subscription produced
///
/// Opaque bytes chosen by the transfer layer (for example an info hash). Only
/// equality and the hex form matter here: the hex form is part of the DHT key
/// under which associations are announced.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContentId(Vec<u8>);

impl ContentId {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        ContentId(bytes.into())
    }

    pub fn from_hex(hex: &str) -> Result<Self, hex::FromHexError> {
        Ok(ContentId(hex::decode(hex)?))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl From<&[u8]> for ContentId {
    fn from(bytes: &[u8]) -> Self {
        ContentId(bytes.to_vec())
    }
}

impl fmt::Debug for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentId({})", self.to_hex())
    }
}

impl fmt::Display for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl Serialize for ContentId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for ContentId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        ContentId::from_hex(&s).map_err(serde::de::Error::custom)
    }
}
