use serde::{Deserialize, Serialize};
use serde_with::{serde_as, Bytes};

use crate::codec::{self, CodecError};

/// Highest envelope schema this build understands
pub const MAX_SCHEMA_VERSION: u32 = 2;
/// Schema assumed for documents written before the schema field existed
pub const LEGACY_SCHEMA_VERSION: u32 = 1;
/// Singleton names are truncated to this many characters
pub const MAX_SINGLETON_NAME_CHARS: usize = 64;
/// Poll interval assumed when a singleton does not carry one
pub const DEFAULT_CHECK_INTERVAL_MINS: u32 = 120;

fn is_false(b: &bool) -> bool {
    !*b
}

/// Identifies a keyless subscription, such as a bare feed url
///
/// The `key` bytes, not the (locally generated) signing key, determine the
/// subscription's short id, so every peer that subscribes to the same feed
/// ends up with the same identity.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SingletonDescriptor {
    #[serde_as(as = "Bytes")]
    pub key: Vec<u8>,
    pub name: String,
    #[serde(rename = "ci", default, skip_serializing_if = "Option::is_none")]
    pub check_interval_mins: Option<u32>,
    #[serde(rename = "a", default, skip_serializing_if = "is_false")]
    pub anonymous: bool,
}

impl SingletonDescriptor {
    pub fn new(
        key: impl Into<Vec<u8>>,
        name: &str,
        check_interval_mins: u32,
        anonymous: bool,
    ) -> Self {
        let name: String = name.chars().take(MAX_SINGLETON_NAME_CHARS).collect();
        let check_interval_mins = if check_interval_mins == DEFAULT_CHECK_INTERVAL_MINS {
            None
        } else {
            Some(check_interval_mins)
        };
        Self {
            key: key.into(),
            name,
            check_interval_mins,
            anonymous,
        }
    }

    pub fn check_interval_mins(&self) -> u32 {
        self.check_interval_mins
            .unwrap_or(DEFAULT_CHECK_INTERVAL_MINS)
    }
}

/// The signed portion of an envelope
///
/// The canonical encoding of this record is what gets hashed, and its length is
/// the `size` that goes into the signature.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvelopeDetails {
    pub name: String,
    #[serde_as(as = "Bytes")]
    pub public_key: Vec<u8>,
    pub version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema_version: Option<u32>,
    pub is_public: bool,
    #[serde(default)]
    pub is_anonymous: bool,
    #[serde_as(as = "Bytes")]
    pub payload: Vec<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub singleton: Option<SingletonDescriptor>,
}

impl EnvelopeDetails {
    pub fn schema_version(&self) -> u32 {
        self.schema_version.unwrap_or(LEGACY_SCHEMA_VERSION)
    }

    /// Canonical bytes used for hashing and sizing
    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        codec::encode(self)
    }
}

/// Migration for schema 1 documents.
///
/// Version 1 writers hashed the details before the schema field was added to the
/// record, so the hash input for such a document is the record without it.
pub fn migrate_v1_hash_input(details: &EnvelopeDetails) -> EnvelopeDetails {
    EnvelopeDetails {
        schema_version: None,
        ..details.clone()
    }
}

/// An envelope as stored and transferred: details plus hash, signature and size
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvelopeDocument {
    pub details: EnvelopeDetails,
    #[serde_as(as = "Bytes")]
    pub hash: Vec<u8>,
    #[serde_as(as = "Bytes")]
    pub sig: Vec<u8>,
    pub size: u32,
}

impl EnvelopeDocument {
    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        codec::encode(self)
    }

    pub fn decode(data: &[u8]) -> Result<Self, CodecError> {
        codec::decode(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn details() -> EnvelopeDetails {
        EnvelopeDetails {
            name: "linux isos".to_string(),
            public_key: vec![7; 32],
            version: 3,
            schema_version: Some(MAX_SCHEMA_VERSION),
            is_public: true,
            is_anonymous: false,
            payload: br#"{"engine":"web"}"#.to_vec(),
            singleton: None,
        }
    }

    #[test]
    fn test_encoding_is_deterministic() {
        assert_eq!(details().encode().unwrap(), details().encode().unwrap());
    }

    #[test]
    fn test_v1_migration_changes_hash_input() {
        let d = details();
        let legacy = migrate_v1_hash_input(&d);
        assert_eq!(legacy.schema_version, None);
        assert_eq!(legacy.schema_version(), LEGACY_SCHEMA_VERSION);
        assert_ne!(d.encode().unwrap(), legacy.encode().unwrap());
    }

    #[test]
    fn test_singleton_descriptor_trims_name_and_default_interval() {
        let long_name = "n".repeat(100);
        let s = SingletonDescriptor::new(b"https://example.com/feed".to_vec(), &long_name, 120, false);
        assert_eq!(s.name.chars().count(), MAX_SINGLETON_NAME_CHARS);
        assert_eq!(s.check_interval_mins, None);
        assert_eq!(s.check_interval_mins(), DEFAULT_CHECK_INTERVAL_MINS);

        let s = SingletonDescriptor::new(b"k".to_vec(), "feed", 30, true);
        assert_eq!(s.check_interval_mins, Some(30));
    }

    #[test]
    fn test_document_decodes() {
        let doc = EnvelopeDocument {
            details: details(),
            hash: vec![1; 32],
            sig: vec![2; 64],
            size: 10,
        };
        let bytes = doc.encode().unwrap();
        assert_eq!(EnvelopeDocument::decode(&bytes).unwrap(), doc);
    }
}
