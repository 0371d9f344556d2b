//! JSON-RPC shapes exchanged between the coordinating agent and the nodes.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;
use crate::types::{Direction, Message, SignResult};

pub const METHOD_VERIFY_AND_SIGN: &str = "skale_imaVerifyAndSign";
pub const METHOD_SIGN_U256: &str = "skale_imaBSU256";
pub const METHOD_SIGN_READY_HASH: &str = "skale_imaSignReadyHash";
pub const METHOD_CUSTODIAN_SIGN: &str = "blsSignMessageHash";

/// Diagnostic block attached to every share request and echoed back by the responder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Qa {
    pub skaled_number: usize,
    pub sequence_id: String,
    pub ts: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifyAndSignParams {
    pub direction: Direction,
    #[serde(rename = "startMessageIdx")]
    pub start_message_idx: u64,
    #[serde(rename = "srcChainName")]
    pub src_chain_name: String,
    #[serde(rename = "dstChainName")]
    pub dst_chain_name: String,
    #[serde(rename = "srcChainID", default)]
    pub src_chain_id: String,
    #[serde(rename = "dstChainID", default)]
    pub dst_chain_id: String,
    pub messages: Vec<Message>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qa: Option<Qa>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignU256Params {
    pub value_to_sign: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qa: Option<Qa>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignReadyHashParams {
    pub message_hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qa: Option<Qa>,
}

/// What a round asks every node to sign.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShareRequest {
    VerifyAndSign(VerifyAndSignParams),
    U256(SignU256Params),
    ReadyHash(SignReadyHashParams),
}

impl ShareRequest {
    pub fn method(&self) -> &'static str {
        match self {
            ShareRequest::VerifyAndSign(_) => METHOD_VERIFY_AND_SIGN,
            ShareRequest::U256(_) => METHOD_SIGN_U256,
            ShareRequest::ReadyHash(_) => METHOD_SIGN_READY_HASH,
        }
    }

    /// Request parameters with `qa` filled in for one node.
    pub fn params_for(&self, qa: Qa) -> Result<Value> {
        let params = match self {
            ShareRequest::VerifyAndSign(params) => serde_json::to_value(VerifyAndSignParams {
                qa: Some(qa),
                ..params.clone()
            })?,
            ShareRequest::U256(params) => serde_json::to_value(SignU256Params {
                qa: Some(qa),
                ..params.clone()
            })?,
            ShareRequest::ReadyHash(params) => serde_json::to_value(SignReadyHashParams {
                qa: Some(qa),
                ..params.clone()
            })?,
        };
        Ok(params)
    }
}

/// `result` of a successful share request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignReply {
    pub sign_result: SignResult,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qa: Option<Qa>,
}

/// Parameters of the key custodian's `blsSignMessageHash`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustodianSignParams {
    pub key_share_name: String,
    pub message_hash: String,
    pub n: usize,
    pub t: usize,
    pub signer_index: usize,
}
