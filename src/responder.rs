//! Participant side of a signing round.
//!
//! A node asked for its share recomputes the digest itself, re-checks the messages against the
//! source chain's message proxy and has the key custodian sign. Nothing is retried here.

use std::sync::Arc;

use crate::committee::{resolve_chain_url, CommitteeView, TopologyCache};
use crate::config::AgentConfig;
use crate::custodian::Custodian;
use crate::digest::{digest_messages, digest_u256, digest_verbatim, Digest};
use crate::error::Result;
use crate::orchestrator::{chain_access, S2sSignOptions};
use crate::protocol::{
    CustodianSignParams, Qa, SignReadyHashParams, SignReply, SignU256Params, VerifyAndSignParams,
};
use crate::proxy::{check_outgoing_messages, needs_validation, MessageProxyProvider};
use crate::round_log::{LogMode, RoundLog};
use crate::threshold_scheme::ThresholdScheme;
use crate::types::{Direction, PartialShare, SignResult};

pub struct Responder {
    config: AgentConfig,
    committee: Arc<CommitteeView>,
    scheme: Arc<dyn ThresholdScheme>,
    custodian: Arc<dyn Custodian>,
    topology: Arc<dyn TopologyCache>,
    proxies: Arc<dyn MessageProxyProvider>,
}

impl Responder {
    pub fn new(
        config: AgentConfig,
        committee: Arc<CommitteeView>,
        scheme: Arc<dyn ThresholdScheme>,
        custodian: Arc<dyn Custodian>,
        topology: Arc<dyn TopologyCache>,
        proxies: Arc<dyn MessageProxyProvider>,
    ) -> Self {
        Self {
            config,
            committee,
            scheme,
            custodian,
            topology,
            proxies,
        }
    }

    /// `skale_imaVerifyAndSign`
    pub async fn handle_verify_and_sign(&self, params: VerifyAndSignParams) -> Result<SignReply> {
        let log = self.call_log(params.qa.as_ref(), params.direction);
        let result = self.verify_and_sign(&params, &log).await;
        self.finish(&log, result, params.qa)
    }

    async fn verify_and_sign(&self, params: &VerifyAndSignParams, log: &RoundLog) -> Result<SignResult> {
        let direction = params.direction;
        log.debug(format!(
            "will verify {} message(s) starting at #{} from {} to {}",
            params.messages.len(),
            params.start_message_idx,
            params.src_chain_name,
            params.dst_chain_name
        ));
        let digest = digest_messages(
            &params.messages,
            params.start_message_idx,
            &params.src_chain_name,
        )?;
        log.debug(format!("composed message hash {}", digest));

        if needs_validation(direction) {
            let source_url = match direction {
                Direction::S2S => {
                    let url = resolve_chain_url(self.topology.as_ref(), &params.src_chain_name)?;
                    log.debug(format!("source chain {} reached at {}", params.src_chain_name, url));
                    Some(url)
                }
                _ => None,
            };
            let options = S2sSignOptions {
                src_chain_name: params.src_chain_name.clone(),
                dst_chain_name: params.dst_chain_name.clone(),
                src_chain_id: params.src_chain_id.clone(),
                dst_chain_id: params.dst_chain_id.clone(),
                source_url,
            };
            let access = chain_access(&self.config, direction, Some(&options))?;
            let proxy = self
                .proxies
                .message_proxy(direction, options.source_url.as_deref());
            check_outgoing_messages(
                log,
                direction,
                &params.messages,
                params.start_message_idx,
                &access.dst_chain_name,
                proxy.as_deref(),
            )
            .await;
        }

        self.custodian_sign(&digest, log).await
    }

    /// `skale_imaBSU256`
    pub async fn handle_bsu256(&self, params: SignU256Params) -> Result<SignReply> {
        let log = self.log("IMA u256 signer");
        let result = match digest_u256(&params.value_to_sign) {
            Ok(digest) => {
                log.debug(format!("will sign u256 value {} as {}", params.value_to_sign, digest));
                self.custodian_sign(&digest, &log).await
            }
            Err(err) => Err(err),
        };
        self.finish(&log, result, params.qa)
    }

    /// `skale_imaSignReadyHash`
    pub async fn handle_sign_ready_hash(&self, params: SignReadyHashParams) -> Result<SignReply> {
        let result = self.sign_ready_hash(&params.message_hash).await;
        Ok(SignReply {
            sign_result: result?,
            qa: params.qa,
        })
    }

    /// Have the custodian sign a hash computed elsewhere.
    pub async fn sign_ready_hash(&self, hash: &str) -> Result<SignResult> {
        let log = self.log("IMA ready hash signer");
        let result = match digest_verbatim(hash) {
            Ok(digest) => self.custodian_sign(&digest, &log).await,
            Err(err) => Err(err),
        };
        match &result {
            Ok(_) => log.debug("ready hash signed"),
            Err(err) => log.error(format!("ready hash signing failed: {}", err)),
        }
        log.finish(result.is_ok(), self.config.expose_round_details);
        result
    }

    /// Check one node's share of a hash computed elsewhere. Every failure reads as `false`.
    pub async fn verify_ready_hash(
        &self,
        hash: &str,
        node_index: usize,
        sign_result: &SignResult,
    ) -> bool {
        let log = self.log("IMA ready hash verifier");
        let verified = self
            .try_verify_ready_hash(hash, node_index, sign_result, &log)
            .await
            .unwrap_or_else(|err| {
                log.error(format!("share of node #{} not checked: {}", node_index, err));
                false
            });
        log.finish(verified, self.config.expose_round_details);
        verified
    }

    async fn try_verify_ready_hash(
        &self,
        hash: &str,
        node_index: usize,
        sign_result: &SignResult,
        log: &RoundLog,
    ) -> Result<bool> {
        let digest = digest_verbatim(hash)?;
        let share = PartialShare::from_signature_share(node_index, &sign_result.signature_share)?;
        let public_key = self.committee.public_key(node_index)?;
        Ok(self
            .scheme
            .verify_signature_share(
                self.committee.threshold(),
                self.committee.participants(),
                &share,
                &digest,
                public_key,
                log,
            )
            .await)
    }

    async fn custodian_sign(&self, digest: &Digest, log: &RoundLog) -> Result<SignResult> {
        let params = CustodianSignParams {
            key_share_name: self.custodian.key_share_name()?,
            message_hash: digest.to_hex(),
            n: self.committee.participants(),
            t: self.committee.threshold(),
            signer_index: self.config.this_node_index,
        };
        log.trace(format!(
            "will call key custodian with key {} as signer #{}",
            params.key_share_name, params.signer_index
        ));
        let result = self.custodian.sign_message_hash(&params).await?;
        log.debug(format!("key custodian sign result: {:?}", result));
        Ok(result)
    }

    fn log(&self, name: &str) -> RoundLog {
        let mode = if self.config.direct_round_log {
            LogMode::Direct
        } else {
            LogMode::Buffered
        };
        RoundLog::new(name, mode)
    }

    fn call_log(&self, qa: Option<&Qa>, direction: Direction) -> RoundLog {
        let log = self.log("IMA messages verifier/signer");
        match qa {
            Some(qa) => log.with_prefix(format!("{}/{}: ", direction, qa.sequence_id)),
            None => log.with_prefix(format!("{}: ", direction)),
        }
    }

    fn finish(&self, log: &RoundLog, result: Result<SignResult>, qa: Option<Qa>) -> Result<SignReply> {
        match &result {
            Ok(_) => log.debug("share produced"),
            Err(err) => log.error(format!("share not produced: {}", err)),
        }
        log.finish(result.is_ok(), self.config.expose_round_details);
        Ok(SignReply {
            sign_result: result?,
            qa,
        })
    }
}
