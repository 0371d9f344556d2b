use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Result, SigningError};

/// One outgoing inter-chain message, all fields hex encoded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub sender: String,
    pub destination_contract: String,
    pub data: String,
}

/// Messages handed to a signing round, immutable once the round starts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageBatch {
    pub messages: Vec<Message>,
    pub origin_chain_name: String,
    /// Global index of the first message in the batch.
    pub start_nonce: u64,
}

impl MessageBatch {
    pub fn new(origin_chain_name: impl Into<String>, start_nonce: u64, messages: Vec<Message>) -> Self {
        Self {
            messages,
            origin_chain_name: origin_chain_name.into(),
            start_nonce,
        }
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    /// main-net to s-chain
    M2S,
    /// s-chain to main-net
    S2M,
    /// s-chain to s-chain
    S2S,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Direction::M2S => "M2S",
            Direction::S2M => "S2M",
            Direction::S2S => "S2S",
        };
        f.write_str(s)
    }
}

impl FromStr for Direction {
    type Err = SigningError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "M2S" => Ok(Direction::M2S),
            "S2M" => Ok(Direction::S2M),
            "S2S" => Ok(Direction::S2S),
            other => Err(SigningError::Config(format!("unknown direction {}", other))),
        }
    }
}

/// Decimal `{X, Y}` coordinates as exchanged with the BLS tools.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Point {
    #[serde(rename = "X")]
    pub x: String,
    #[serde(rename = "Y")]
    pub y: String,
}

/// One node's signature share over a digest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartialShare {
    /// Zero-based signer index of the node that produced the share.
    pub node_index: usize,
    pub signature: Point,
}

impl PartialShare {
    /// Parse the `"X:Y"` form returned by nodes and the key custodian.
    pub fn from_signature_share(node_index: usize, signature_share: &str) -> Result<Self> {
        let mut parts = signature_share.split(':');
        match (parts.next(), parts.next()) {
            (Some(x), Some(y)) if !x.is_empty() && !y.is_empty() => Ok(Self {
                node_index,
                signature: Point {
                    x: x.to_string(),
                    y: y.to_string(),
                },
            }),
            _ => Err(SigningError::MalformedResult(format!(
                "failed to split signatureShare={}",
                signature_share
            ))),
        }
    }

    /// Body of `sign-result<i>.json`.
    pub fn to_share_file(&self) -> ShareFile {
        ShareFile {
            index: self.node_index.to_string(),
            signature: self.signature.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShareFile {
    pub index: String,
    pub signature: Point,
}

/// Glued signature plus the hash-to-curve point it was produced over.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateSignature {
    pub signature: Point,
    /// Hex digest the shares were produced over.
    pub hash_src: String,
    pub hash_point: Point,
    pub hint: String,
}

/// `signResult` as returned by a node or by the key custodian.
///
/// Fields the agent does not interpret are kept in `extra` so a custodian reply can be passed
/// back unmodified.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignResult {
    #[serde(default)]
    pub signature_share: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl SignResult {
    pub fn with_share(signature_share: impl Into<String>) -> Self {
        Self {
            signature_share: signature_share.into(),
            status: Some(0),
            ..Default::default()
        }
    }

    /// A usable share: non-empty and reported with status 0.
    pub fn is_ok(&self) -> bool {
        !self.signature_share.is_empty() && self.status == Some(0)
    }

    /// The custodian's own error report, if any.
    pub fn reported_error(&self) -> Option<&str> {
        self.error_message.as_deref().filter(|msg| !msg.is_empty())
    }
}

/// How a successful round's aggregate was checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Verification {
    Verified,
    /// No aggregate verification capability was configured.
    Skipped,
}
