//! Canonical binary encoding
//!
//! Envelopes, presence records and exported documents are encoded as DAG-CBOR.
//! The encoding is deterministic for a given value, which is what lets a
//! recomputed hash be compared against a stored one.

use ipld_core::codec::Codec;
use serde::{de::DeserializeOwned, Serialize};
use serde_ipld_dagcbor::codec::DagCborCodec;

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("encode error: {0}")]
    Encode(String),
    #[error("decode error: {0}")]
    Decode(String),
}

pub fn encode<T>(value: &T) -> Result<Vec<u8>, CodecError>
where
    T: Serialize + DeserializeOwned,
{
    DagCborCodec::encode_to_vec(value).map_err(|e| CodecError::Encode(e.to_string()))
}

pub fn decode<T>(data: &[u8]) -> Result<T, CodecError>
where
    T: Serialize + DeserializeOwned,
{
    DagCborCodec::decode_from_slice(data).map_err(|e| CodecError::Decode(e.to_string()))
}
