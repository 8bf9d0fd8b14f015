//! Wire format of a presence record
//!
//! A presence record proves that a version of a subscription exists. For keyed
//! subscriptions it carries the envelope's hash, size and signature, which
//! anyone holding the public key can check. Singletons carry their descriptor.
//!
//! ```text
//! | format (1 byte) | body |
//! ```
//!
//! Format `0` is a raw DAG-CBOR body, format `1` a gzipped one. The gzipped
//! form is only written when it is smaller. Every body carries a per-process
//! random seed under `"!"` so two peers never store byte-identical values.

use std::io::{Read, Write};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, Bytes};

use crate::codec::{self, CodecError};
use crate::envelope::SingletonDescriptor;
use crate::subscription::PublicationDetails;

const FORMAT_RAW: u8 = 0;
const FORMAT_GZIP: u8 = 1;

/// Cap on the decompressed body of a foreign record
const MAX_BODY_SIZE: usize = 16 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum PresenceError {
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("empty record")]
    Empty,
    #[error("unknown record format {0}")]
    UnknownFormat(u8),
    #[error("record body exceeds {0} bytes")]
    TooLarge(usize),
    #[error("record carries neither a signature nor a descriptor")]
    Incomplete,
}

#[serde_as]
#[derive(Debug, Serialize, Deserialize)]
struct PresenceBody {
    v: u32,
    #[serde_as(as = "Option<Bytes>")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    h: Option<Vec<u8>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    z: Option<u32>,
    #[serde_as(as = "Option<Bytes>")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    s: Option<Vec<u8>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    x: Option<SingletonDescriptor>,
    #[serde(rename = "!", default)]
    seed: u32,
}

pub fn encode(details: &PublicationDetails, seed: u32) -> Result<Vec<u8>, PresenceError> {
    let body = match details {
        PublicationDetails::Signed {
            version,
            hash,
            size,
            sig,
        } => PresenceBody {
            v: *version,
            h: Some(hash.clone()),
            z: Some(*size),
            s: Some(sig.clone()),
            x: None,
            seed,
        },
        PublicationDetails::Singleton {
            version,
            descriptor,
        } => PresenceBody {
            v: *version,
            h: None,
            z: None,
            s: None,
            x: Some(descriptor.clone()),
            seed,
        },
    };
    let raw = codec::encode(&body)?;

    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&raw)?;
    let gzipped = encoder.finish()?;

    let (format, payload) = if gzipped.len() < raw.len() {
        (FORMAT_GZIP, gzipped)
    } else {
        (FORMAT_RAW, raw)
    };
    let mut out = Vec::with_capacity(payload.len() + 1);
    out.push(format);
    out.extend_from_slice(&payload);
    Ok(out)
}

pub fn decode(value: &[u8]) -> Result<PublicationDetails, PresenceError> {
    let (format, payload) = value.split_first().ok_or(PresenceError::Empty)?;
    let raw = match *format {
        FORMAT_RAW => payload.to_vec(),
        FORMAT_GZIP => {
            let mut out = Vec::new();
            GzDecoder::new(payload)
                .take(MAX_BODY_SIZE as u64 + 1)
                .read_to_end(&mut out)?;
            if out.len() > MAX_BODY_SIZE {
                return Err(PresenceError::TooLarge(MAX_BODY_SIZE));
            }
            out
        }
        other => return Err(PresenceError::UnknownFormat(other)),
    };

    let body: PresenceBody = codec::decode(&raw)?;
    if let Some(descriptor) = body.x {
        return Ok(PublicationDetails::Singleton {
            version: body.v,
            descriptor,
        });
    }
    match (body.h, body.z, body.s) {
        (Some(hash), Some(size), Some(sig)) => Ok(PublicationDetails::Signed {
            version: body.v,
            hash,
            size,
            sig,
        }),
        _ => Err(PresenceError::Incomplete),
    }
}
