//! Cross-checking a batch against the source chain's message proxy before it is signed.
//!
//! A node signs only what the proxy contract on the source chain confirms it emitted. Messages
//! the proxy does not confirm are counted and logged, the batch itself is never rejected here.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::digest::keccak256_id;
use crate::error::Result;
use crate::round_log::RoundLog;
use crate::types::{Direction, Message};

/// Outgoing message as recorded by the proxy contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutgoingMessage {
    /// `0x`-prefixed Keccak-256 of the destination chain name.
    pub dst_chain_hash: String,
    pub msg_counter: u64,
    pub src_contract: String,
    pub dst_contract: String,
    pub data: String,
}

impl OutgoingMessage {
    pub fn new(dst_chain_name: &str, msg_counter: u64, message: &Message) -> Self {
        Self {
            dst_chain_hash: keccak256_id(dst_chain_name),
            msg_counter,
            src_contract: message.sender.clone(),
            dst_contract: message.destination_contract.clone(),
            data: message.data.clone(),
        }
    }
}

/// Read access to a chain's message proxy contract.
#[async_trait]
pub trait MessageProxy: Send + Sync {
    /// `verifyOutgoingMessageData` on the contract.
    async fn verify_outgoing_message_data(&self, message: &OutgoingMessage) -> Result<bool>;
}

/// Hands out a proxy for the chain messages of `direction` originate on.
pub trait MessageProxyProvider: Send + Sync {
    /// `source_url` is set for S2S, where the source chain is only known per request.
    fn message_proxy(
        &self,
        direction: Direction,
        source_url: Option<&str>,
    ) -> Option<Arc<dyn MessageProxy>>;
}

/// No contract access configured, every checked message counts as unconfirmed.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoMessageProxy;

impl MessageProxyProvider for NoMessageProxy {
    fn message_proxy(&self, _: Direction, _: Option<&str>) -> Option<Arc<dyn MessageProxy>> {
        None
    }
}

/// Whether messages of `direction` are checked against a proxy at all. Main-net originated
/// messages are not.
pub fn needs_validation(direction: Direction) -> bool {
    matches!(direction, Direction::S2M | Direction::S2S)
}

/// Check each message of a batch starting at `start_message_idx`. Returns how many were not
/// confirmed.
pub async fn check_outgoing_messages(
    log: &RoundLog,
    direction: Direction,
    messages: &[Message],
    start_message_idx: u64,
    dst_chain_name: &str,
    proxy: Option<&dyn MessageProxy>,
) -> usize {
    if !needs_validation(direction) {
        return 0;
    }
    log.debug(format!(
        "{} verification of {} message(s) via message proxy, destination chain {}",
        direction,
        messages.len(),
        dst_chain_name
    ));

    let mut bad = 0;
    for (offset, message) in messages.iter().enumerate() {
        let idx = start_message_idx + offset as u64;
        let outgoing = OutgoingMessage::new(dst_chain_name, idx, message);
        let confirmed = match proxy {
            Some(proxy) => match proxy.verify_outgoing_message_data(&outgoing).await {
                Ok(confirmed) => confirmed,
                Err(err) => {
                    log.error(format!("{} message #{} proxy call failed: {}", direction, idx, err));
                    false
                }
            },
            None => {
                log.error(format!(
                    "{} message #{} cannot be verified, no message proxy available",
                    direction, idx
                ));
                false
            }
        };
        if confirmed {
            log.trace(format!("{} message #{} verified", direction, idx));
        } else {
            bad += 1;
            log.error(format!(
                "{} message #{} with sender {} and destination {} is not confirmed by the message proxy",
                direction, idx, message.sender, message.destination_contract
            ));
        }
    }

    if bad > 0 {
        log.error(format!(
            "{} verification found {} bad message(s) out of {}",
            direction,
            bad,
            messages.len()
        ));
    } else {
        log.debug(format!("{} verification passed", direction));
    }
    bad
}
