//! Wire format of an association announcement
//!
//! ```text
//! | version (3 bytes, BE) | salt (1 byte) | short id (10 bytes) |
//! ```
//!
//! The salt is fixed per process so that two peers announcing the same
//! subscription at the same version still store distinct values.

use crate::envelope::{ShortId, SHORT_ID_SIZE};

/// Length of a record we write
pub const ASSOCIATION_RECORD_SIZE: usize = 4 + SHORT_ID_SIZE;

/// Versions above this are announced as this
pub const MAX_RECORD_VERSION: u32 = 0x00FF_FFFF;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssociationRecord {
    pub version: u32,
    pub salt: u8,
    /// Raw short id bytes; foreign records are not required to be well formed
    pub short_id: Vec<u8>,
}

impl AssociationRecord {
    pub fn new(short_id: &ShortId, version: u32, salt: u8) -> Self {
        Self {
            version: version.min(MAX_RECORD_VERSION),
            salt,
            short_id: short_id.as_bytes().to_vec(),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let version = self.version.min(MAX_RECORD_VERSION).to_be_bytes();
        let mut out = Vec::with_capacity(4 + self.short_id.len());
        out.extend_from_slice(&version[1..]);
        out.push(self.salt);
        out.extend_from_slice(&self.short_id);
        out
    }

    /// Anything longer than the header decodes; the rest is the short id.
    pub fn decode(value: &[u8]) -> Option<Self> {
        if value.len() <= 4 {
            return None;
        }
        let version = u32::from_be_bytes([0, value[0], value[1], value[2]]);
        Some(Self {
            version,
            salt: value[3],
            short_id: value[4..].to_vec(),
        })
    }

    /// The short id, if the record carries one of the expected size
    pub fn short_id(&self) -> Option<ShortId> {
        let bytes: [u8; SHORT_ID_SIZE] = self.short_id.as_slice().try_into().ok()?;
        Some(ShortId::from_bytes(bytes))
    }

    /// Two records announce the same thing when their short ids match exactly,
    /// whatever their version or salt.
    pub fn same_announcement(&self, other: &AssociationRecord) -> bool {
        self.short_id == other.short_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sid(b: u8) -> ShortId {
        ShortId::from_bytes([b; SHORT_ID_SIZE])
    }

    #[test]
    fn test_layout() {
        let record = AssociationRecord::new(&sid(7), 0x010203, 0xAA);
        let bytes = record.encode();
        assert_eq!(bytes.len(), ASSOCIATION_RECORD_SIZE);
        assert_eq!(&bytes[..4], &[1, 2, 3, 0xAA]);
        assert_eq!(&bytes[4..], &[7; SHORT_ID_SIZE]);

        let decoded = AssociationRecord::decode(&bytes).unwrap();
        assert_eq!(decoded, record);
        assert_eq!(decoded.short_id(), Some(sid(7)));
    }

    #[test]
    fn test_version_clamped() {
        let record = AssociationRecord::new(&sid(1), 0x0100_0000, 0);
        assert_eq!(record.version, MAX_RECORD_VERSION);
        let decoded = AssociationRecord::decode(&record.encode()).unwrap();
        assert_eq!(decoded.version, MAX_RECORD_VERSION);
    }

    #[test]
    fn test_short_and_odd_values() {
        assert!(AssociationRecord::decode(&[0, 0, 1, 0]).is_none());

        let odd = AssociationRecord::decode(&[0, 0, 1, 0, 9, 9]).unwrap();
        assert_eq!(odd.version, 1);
        assert_eq!(odd.short_id(), None);
    }

    #[test]
    fn test_same_announcement_ignores_version_and_salt() {
        let a = AssociationRecord::new(&sid(3), 1, 10);
        let b = AssociationRecord::new(&sid(3), 9, 200);
        let c = AssociationRecord::new(&sid(4), 1, 10);
        assert!(a.same_announcement(&b));
        assert!(!a.same_announcement(&c));
    }
}
