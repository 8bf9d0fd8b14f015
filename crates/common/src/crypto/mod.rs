//! Cryptographic primitives for subscriptions
//!
//! - **Ownership**: every subscription envelope is signed by an Ed25519 keypair
//!   (`SecretKey`/`PublicKey`). Holding the secret key is what makes a subscription
//!   "mine" and is required to publish a new version.
//! - **Content hashing**: envelope details are hashed with BLAKE3 over their canonical
//!   DAG-CBOR encoding.
//! - **Identity**: short ids and result keys are SHA-256 digests, truncated where the
//!   wire format calls for it.

mod digest;
mod keys;

pub use digest::{content_hash, sha256, ContentHash, CONTENT_HASH_SIZE};
pub use ed25519_dalek::Signature;
pub use keys::{KeyError, PublicKey, SecretKey, PRIVATE_KEY_SIZE, PUBLIC_KEY_SIZE, SIGNATURE_SIZE};
