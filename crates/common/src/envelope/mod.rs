//! Signed, versioned subscription documents
//!
//! An [`Envelope`] wraps the [`EnvelopeDetails`] of one subscription together
//! with the BLAKE3 hash of their canonical encoding, the encoded size, and an
//! Ed25519 signature over `hash || version || size`.
//!
//! Hash and signature are always recomputed together. A document received from
//! anywhere else is only trusted after [`Envelope::from_document`] has checked
//! the hash, the size and (when asked to) the signature.

mod identity;
mod record;

use std::path::{Path, PathBuf};

use crate::codec::CodecError;
use crate::crypto::{
    content_hash, ContentHash, KeyError, PublicKey, SecretKey, Signature, CONTENT_HASH_SIZE,
    SIGNATURE_SIZE,
};
use crate::storage;

pub use identity::{derive_short_id, singleton_short_id, ShortId, SHORT_ID_SIZE};
pub use record::{
    migrate_v1_hash_input, EnvelopeDetails, EnvelopeDocument, SingletonDescriptor,
    DEFAULT_CHECK_INTERVAL_MINS, LEGACY_SCHEMA_VERSION, MAX_SCHEMA_VERSION,
    MAX_SINGLETON_NAME_CHARS,
};

#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    #[error("default error: {0}")]
    Default(#[from] anyhow::Error),
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
    #[error("key error: {0}")]
    Key(#[from] KeyError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("envelope not found: {0}")]
    NotFound(PathBuf),
    #[error("content hash mismatch")]
    HashMismatch,
    #[error("signed size mismatch: document says {expected}, encoding is {actual}")]
    SizeMismatch { expected: u32, actual: usize },
    #[error("signature verification failed")]
    BadSignature,
    #[error("unsupported schema version {0}, max supported is {MAX_SCHEMA_VERSION}")]
    UnsupportedSchema(u32),
    #[error("private key required to re-sign the envelope")]
    NotOwner,
}

impl EnvelopeError {
    /// Whether the document itself failed an integrity check
    pub fn is_integrity(&self) -> bool {
        matches!(
            self,
            EnvelopeError::HashMismatch
                | EnvelopeError::SizeMismatch { .. }
                | EnvelopeError::BadSignature
        )
    }
}

/// Deterministic signing input: `hash || version (u32 BE) || size (u32 BE)`
pub fn canonicalize(hash: &[u8], version: u32, size: u32) -> Vec<u8> {
    let mut out = Vec::with_capacity(hash.len() + 8);
    out.extend_from_slice(hash);
    out.extend_from_slice(&version.to_be_bytes());
    out.extend_from_slice(&size.to_be_bytes());
    out
}

pub fn sign(key: &SecretKey, hash: &[u8], version: u32, size: u32) -> Signature {
    key.sign(&canonicalize(hash, version, size))
}

/// Check a signature over `hash || version || size`.
///
/// Never fails: any problem (malformed signature, wrong key, tampered input)
/// is logged and reported as `false`.
pub fn verify(public_key: &PublicKey, hash: &[u8], version: u32, size: u32, sig: &[u8]) -> bool {
    let sig: [u8; SIGNATURE_SIZE] = match sig.try_into() {
        Ok(sig) => sig,
        Err(_) => {
            tracing::debug!("signature has invalid length {}", sig.len());
            return false;
        }
    };
    let signature = Signature::from_bytes(&sig);
    match public_key.verify(&canonicalize(hash, version, size), &signature) {
        Ok(()) => true,
        Err(e) => {
            tracing::debug!(key = %public_key, version, size, "signature verification failed: {}", e);
            false
        }
    }
}

/// A subscription document with its integrity data
#[derive(Debug, Clone)]
pub struct Envelope {
    public_key: PublicKey,
    private_key: Option<SecretKey>,
    details: EnvelopeDetails,
    hash: ContentHash,
    sig: Vec<u8>,
    size: u32,
}

impl Envelope {
    /// Author a new envelope at version 1 with a freshly generated keypair.
    pub fn create(
        name: &str,
        is_public: bool,
        is_anonymous: bool,
        payload: Vec<u8>,
        singleton: Option<SingletonDescriptor>,
    ) -> Result<Self, EnvelopeError> {
        let private_key = SecretKey::generate()?;
        let public_key = private_key.public();
        let details = EnvelopeDetails {
            name: name.to_string(),
            public_key: public_key.to_bytes().to_vec(),
            version: 1,
            schema_version: Some(MAX_SCHEMA_VERSION),
            is_public,
            is_anonymous,
            payload,
            singleton,
        };
        let (hash, size) = Self::hash_details(&details)?;
        let sig = sign(&private_key, &hash, details.version, size);
        Ok(Self {
            public_key,
            private_key: Some(private_key),
            details,
            hash,
            sig: sig.to_bytes().to_vec(),
            size,
        })
    }

    fn hash_details(details: &EnvelopeDetails) -> Result<(ContentHash, u32), EnvelopeError> {
        let encoded = details.encode()?;
        let size = u32::try_from(encoded.len())
            .map_err(|_| anyhow::anyhow!("envelope details too large"))?;
        Ok((content_hash(&encoded), size))
    }

    /// Load a document, checking its integrity.
    ///
    /// The hash of the details is recomputed and must match. If it does not, the
    /// schema 1 hash input (details without the schema field) is tried once
    /// before giving up. The stored size must equal the length of whichever
    /// encoding matched, and with `verify` set the signature must check out
    /// against the embedded public key.
    pub fn from_document(doc: EnvelopeDocument, verify_sig: bool) -> Result<Self, EnvelopeError> {
        let schema = doc.details.schema_version();
        if schema > MAX_SCHEMA_VERSION {
            return Err(EnvelopeError::UnsupportedSchema(schema));
        }

        let public_key = PublicKey::try_from(doc.details.public_key.as_slice())?;

        let mut encoded = doc.details.encode()?;
        if content_hash(&encoded).as_slice() != doc.hash.as_slice() {
            if doc.details.schema_version.is_none() {
                return Err(EnvelopeError::HashMismatch);
            }
            let legacy = migrate_v1_hash_input(&doc.details).encode()?;
            if content_hash(&legacy).as_slice() != doc.hash.as_slice() {
                return Err(EnvelopeError::HashMismatch);
            }
            tracing::debug!("envelope matched schema 1 hash input");
            encoded = legacy;
        }

        if encoded.len() != doc.size as usize {
            return Err(EnvelopeError::SizeMismatch {
                expected: doc.size,
                actual: encoded.len(),
            });
        }

        let hash: ContentHash = doc
            .hash
            .as_slice()
            .try_into()
            .map_err(|_| anyhow::anyhow!("hash must be {} bytes", CONTENT_HASH_SIZE))?;

        if verify_sig && !verify(&public_key, &hash, doc.details.version, doc.size, &doc.sig) {
            return Err(EnvelopeError::BadSignature);
        }

        Ok(Self {
            public_key,
            private_key: None,
            details: doc.details,
            hash,
            sig: doc.sig,
            size: doc.size,
        })
    }

    pub fn to_document(&self) -> EnvelopeDocument {
        EnvelopeDocument {
            details: self.details.clone(),
            hash: self.hash.to_vec(),
            sig: self.sig.clone(),
            size: self.size,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, EnvelopeError> {
        Ok(self.to_document().encode()?)
    }

    pub fn decode(data: &[u8], verify_sig: bool) -> Result<Self, EnvelopeError> {
        Self::from_document(EnvelopeDocument::decode(data)?, verify_sig)
    }

    /// Attach the owner's private key.
    ///
    /// # Errors
    ///
    /// Fails if the key does not belong to this envelope's public key.
    pub fn with_private_key(mut self, key: SecretKey) -> Result<Self, EnvelopeError> {
        if key.public() != self.public_key {
            return Err(anyhow::anyhow!("private key does not match envelope public key").into());
        }
        self.private_key = Some(key);
        Ok(self)
    }

    /// Replace the details, re-signing if their hash changed.
    ///
    /// Leaves `self` untouched on error. Returns whether a new signature was made.
    ///
    /// # Errors
    ///
    /// * `NotOwner` - the hash changed but no private key is held
    pub fn rewrite(&mut self, details: EnvelopeDetails) -> Result<bool, EnvelopeError> {
        let (hash, size) = Self::hash_details(&details)?;
        if hash == self.hash && size == self.size {
            self.details = details;
            return Ok(false);
        }

        let key = self.private_key.as_ref().ok_or(EnvelopeError::NotOwner)?;
        let sig = sign(key, &hash, details.version, size);

        self.details = details;
        self.hash = hash;
        self.size = size;
        self.sig = sig.to_bytes().to_vec();
        Ok(true)
    }

    /// Check this envelope's own signature.
    pub fn verify(&self) -> bool {
        verify(
            &self.public_key,
            &self.hash,
            self.details.version,
            self.size,
            &self.sig,
        )
    }

    /// Write the encoded document to `path` through the backup-then-replace writer.
    pub async fn save(&self, path: &Path) -> Result<(), EnvelopeError> {
        let data = self.encode()?;
        storage::write_resilient(path, &data).await?;
        Ok(())
    }

    pub async fn load_file(path: &Path, verify_sig: bool) -> Result<Self, EnvelopeError> {
        let data = storage::read_resilient(path)
            .await?
            .ok_or_else(|| EnvelopeError::NotFound(path.to_path_buf()))?;
        Self::decode(&data, verify_sig)
    }

    pub fn short_id(&self) -> ShortId {
        derive_short_id(&self.public_key, self.details.singleton.as_ref())
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public_key
    }

    pub fn private_key(&self) -> Option<&SecretKey> {
        self.private_key.as_ref()
    }

    pub fn details(&self) -> &EnvelopeDetails {
        &self.details
    }

    pub fn name(&self) -> &str {
        &self.details.name
    }

    pub fn version(&self) -> u32 {
        self.details.version
    }

    pub fn schema_version(&self) -> u32 {
        self.details.schema_version()
    }

    pub fn is_public(&self) -> bool {
        self.details.is_public
    }

    pub fn is_anonymous(&self) -> bool {
        self.details.is_anonymous
    }

    pub fn payload(&self) -> &[u8] {
        &self.details.payload
    }

    pub fn singleton(&self) -> Option<&SingletonDescriptor> {
        self.details.singleton.as_ref()
    }

    pub fn hash(&self) -> &ContentHash {
        &self.hash
    }

    pub fn signature(&self) -> &[u8] {
        &self.sig
    }

    pub fn size(&self) -> u32 {
        self.size
    }
}
