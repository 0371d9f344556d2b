//! Keccak-256 digests signed by the committee.
//!
//! Every participant must arrive at the same 32 bytes for the same input, so all functions here
//! are pure. The only failure is malformed hex.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha3::{Digest as _, Keccak256};

use crate::error::{Result, SigningError};
use crate::types::{Message, MessageBatch};

/// The 32-byte value a round signs.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Digest([u8; 32]);

impl Digest {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Lower-case hex without a `0x` prefix, the form written to `hash.json`.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({})", self.to_hex())
    }
}

impl Serialize for Digest {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Digest {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        digest_verbatim(&s).map_err(serde::de::Error::custom)
    }
}

/// Decode hex the lenient way the bridge has always accepted it: surrounding whitespace and an
/// optional `0x` are ignored, case is ignored, and an odd digit count gets a leading zero.
pub fn parse_hex(value: &str) -> Result<Vec<u8>> {
    let trimmed = value.trim().to_lowercase();
    let digits = trimmed.strip_prefix("0x").unwrap_or(&trimmed);
    let decoded = if digits.len() % 2 == 1 {
        hex::decode(format!("0{}", digits))
    } else {
        hex::decode(digits)
    };
    decoded.map_err(|err| SigningError::Format(format!("{:?}: {}", value, err)))
}

/// Prepend zero bytes up to 32. Longer input is kept as is.
pub fn left_pad_32(bytes: &[u8]) -> Vec<u8> {
    if bytes.len() >= 32 {
        return bytes.to_vec();
    }
    let mut padded = vec![0u8; 32 - bytes.len()];
    padded.extend_from_slice(bytes);
    padded
}

pub fn keccak256(bytes: &[u8]) -> [u8; 32] {
    Keccak256::digest(bytes).into()
}

/// `0x`-prefixed Keccak-256 of a UTF-8 string, as used for chain name hashes.
pub fn keccak256_id(s: &str) -> String {
    format!("0x{}", hex::encode(keccak256(s.as_bytes())))
}

/// Chained digest over a batch:
/// `seed = H(H(chain) || pad32(start))`, then `acc = H(acc || pad32(sender) || pad32(dest) || data)`
/// for every message in order.
pub fn digest_messages(
    messages: &[Message],
    start_nonce: u64,
    origin_chain_name: &str,
) -> Result<Digest> {
    let mut buffer = keccak256(origin_chain_name.as_bytes()).to_vec();
    buffer.extend(left_pad_32(&nonce_bytes(start_nonce)));
    let mut acc = keccak256(&buffer);

    for message in messages {
        let mut buffer = acc.to_vec();
        buffer.extend(left_pad_32(&parse_hex(&message.sender)?));
        buffer.extend(left_pad_32(&parse_hex(&message.destination_contract)?));
        buffer.extend(parse_hex(&message.data)?);
        acc = keccak256(&buffer);
    }
    Ok(Digest(acc))
}

pub fn digest_batch(batch: &MessageBatch) -> Result<Digest> {
    digest_messages(&batch.messages, batch.start_nonce, &batch.origin_chain_name)
}

/// Digest of a raw 256-bit value. Short values are zero-filled on the right before hashing,
/// which is what nodes in the field compute.
pub fn digest_u256(value: &str) -> Result<Digest> {
    let mut bytes = parse_hex(value)?;
    bytes.reverse();
    let mut bytes = left_pad_32(&bytes);
    bytes.reverse();
    Ok(Digest(keccak256(&bytes)))
}

/// Accept an already computed hash. It must decode to exactly 32 bytes.
pub fn digest_verbatim(hash: &str) -> Result<Digest> {
    let bytes = parse_hex(hash)?;
    let bytes: [u8; 32] = bytes.try_into().map_err(|bytes: Vec<u8>| {
        SigningError::Format(format!("expected 32 byte hash, got {} bytes", bytes.len()))
    })?;
    Ok(Digest(bytes))
}

/// Round identifier derived from a timestamp string.
pub fn sequence_id(timestamp: &str) -> String {
    keccak256_id(timestamp)
}

fn nonce_bytes(nonce: u64) -> Vec<u8> {
    let bytes = nonce.to_be_bytes();
    let first = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len() - 1);
    bytes[first..].to_vec()
}
