use sha2::{Digest, Sha256};

/// Size of a BLAKE3 content hash in bytes
pub const CONTENT_HASH_SIZE: usize = 32;

pub type ContentHash = [u8; CONTENT_HASH_SIZE];

/// Hash canonical envelope bytes.
pub fn content_hash(data: &[u8]) -> ContentHash {
    *blake3::hash(data).as_bytes()
}

/// SHA-256 over the concatenation of `parts`.
pub fn sha256(parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().into()
}
