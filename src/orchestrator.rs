//! Coordinator side of a signing round.
//!
//! Each entry point digests its payload, gathers a quorum of shares over it and reports one
//! [`RoundReport`]. When signing is switched off, or there is no glue tool or committee, the
//! payload is handed straight back without an aggregate.

use std::sync::Arc;

use crate::committee::CommitteeView;
use crate::config::AgentConfig;
use crate::digest::{digest_batch, digest_u256, digest_verbatim, sequence_id, Digest};
use crate::error::{Result, SigningError};
use crate::gatherer::{Gatherer, RoundContext, ShareSource};
use crate::protocol::{ShareRequest, SignReadyHashParams, SignU256Params, VerifyAndSignParams};
use crate::proxy::{check_outgoing_messages, needs_validation, MessageProxyProvider};
use crate::round_log::{LogMode, RoundLog};
use crate::rpc::timestamp;
use crate::threshold_scheme::ThresholdScheme;
use crate::types::{AggregateSignature, Direction, MessageBatch, Verification};

/// Terminal outcome of one round, produced exactly once.
#[derive(Debug)]
pub struct RoundReport<P> {
    pub error: Option<SigningError>,
    pub payload: P,
    pub aggregate: Option<AggregateSignature>,
    /// `None` when no aggregate was produced.
    pub verification: Option<Verification>,
}

impl<P> RoundReport<P> {
    fn failed(error: SigningError, payload: P) -> Self {
        Self {
            error: Some(error),
            payload,
            aggregate: None,
            verification: None,
        }
    }

    fn unsigned(payload: P) -> Self {
        Self {
            error: None,
            payload,
            aggregate: None,
            verification: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    pub fn into_result(self) -> Result<(P, Option<AggregateSignature>)> {
        match self.error {
            Some(err) => Err(err),
            None => Ok((self.payload, self.aggregate)),
        }
    }

    /// Hand the outcome to a `(error, payload, aggregate)` callback.
    pub fn deliver<R>(
        self,
        callback: impl FnOnce(Option<SigningError>, P, Option<AggregateSignature>) -> R,
    ) -> R {
        callback(self.error, self.payload, self.aggregate)
    }
}

/// Chain parameters of an s-chain to s-chain transfer, known only per call.
#[derive(Debug, Clone, Default)]
pub struct S2sSignOptions {
    pub src_chain_name: String,
    pub dst_chain_name: String,
    pub src_chain_id: String,
    pub dst_chain_id: String,
    /// Endpoint of the source chain, for message proxy access.
    pub source_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainAccess {
    pub src_chain_name: String,
    pub dst_chain_name: String,
    pub src_chain_id: String,
    pub dst_chain_id: String,
}

/// Source and destination chains of `direction`.
pub fn chain_access(
    config: &AgentConfig,
    direction: Direction,
    s2s: Option<&S2sSignOptions>,
) -> Result<ChainAccess> {
    let (main_net, s_chain) = (&config.chains.main_net, &config.chains.s_chain);
    match direction {
        Direction::M2S => Ok(ChainAccess {
            src_chain_name: main_net.name.clone(),
            dst_chain_name: s_chain.name.clone(),
            src_chain_id: main_net.chain_id.clone(),
            dst_chain_id: s_chain.chain_id.clone(),
        }),
        Direction::S2M => Ok(ChainAccess {
            src_chain_name: s_chain.name.clone(),
            dst_chain_name: main_net.name.clone(),
            src_chain_id: s_chain.chain_id.clone(),
            dst_chain_id: main_net.chain_id.clone(),
        }),
        Direction::S2S => {
            let options = s2s.ok_or_else(|| {
                SigningError::Config("S2S signing requires source and destination chain".to_string())
            })?;
            Ok(ChainAccess {
                src_chain_name: options.src_chain_name.clone(),
                dst_chain_name: options.dst_chain_name.clone(),
                src_chain_id: options.src_chain_id.clone(),
                dst_chain_id: options.dst_chain_id.clone(),
            })
        }
    }
}

pub struct Orchestrator {
    config: AgentConfig,
    gatherer: Gatherer,
    source: Arc<dyn ShareSource>,
    proxies: Arc<dyn MessageProxyProvider>,
}

impl Orchestrator {
    pub fn new(
        config: AgentConfig,
        scheme: Arc<dyn ThresholdScheme>,
        source: Arc<dyn ShareSource>,
        proxies: Arc<dyn MessageProxyProvider>,
    ) -> Self {
        let gatherer = Gatherer::new(
            scheme,
            config.gather.clone(),
            config.require_aggregate_verification,
        );
        Self {
            config,
            gatherer,
            source,
            proxies,
        }
    }

    /// Sign an outgoing message batch of `direction`.
    pub async fn sign_messages(
        &self,
        committee: Option<Arc<CommitteeView>>,
        direction: Direction,
        batch: MessageBatch,
        loop_counter: u64,
        s2s: Option<&S2sSignOptions>,
    ) -> RoundReport<MessageBatch> {
        let sequence_id = sequence_id(&timestamp());
        let log = Arc::new(
            self.round_log(&sequence_id)
                .with_prefix(format!("{}/#{}/BLS: ", direction, loop_counter)),
        );
        log.debug(format!(
            "will sign {} message(s) starting at #{} from chain {}",
            batch.len(),
            batch.start_nonce,
            batch.origin_chain_name
        ));

        let access = match chain_access(&self.config, direction, s2s) {
            Ok(access) => access,
            Err(err) if !self.config.signing_enabled() => {
                log.warn(format!("messages left unvalidated: {}", err));
                log.info("BLS signing is disabled, payload passes unsigned");
                return self.report(&log, RoundReport::unsigned(batch));
            }
            Err(err) => return self.report(&log, RoundReport::failed(err, batch)),
        };

        if needs_validation(direction) {
            let source_url = s2s.and_then(|options| options.source_url.as_deref());
            let proxy = self.proxies.message_proxy(direction, source_url);
            check_outgoing_messages(
                &log,
                direction,
                &batch.messages,
                batch.start_nonce,
                &access.dst_chain_name,
                proxy.as_deref(),
            )
            .await;
        }

        let committee = match self.committee_if_enabled(committee, &log) {
            Some(committee) => committee,
            None => return self.report(&log, RoundReport::unsigned(batch)),
        };
        let digest = match digest_batch(&batch) {
            Ok(digest) => digest,
            Err(err) => return self.report(&log, RoundReport::failed(err, batch)),
        };
        if batch.origin_chain_name != access.src_chain_name {
            log.warn(format!(
                "batch originates on {} while {} source chain is {}",
                batch.origin_chain_name, direction, access.src_chain_name
            ));
        }
        // nodes rebuild the digest from srcChainName
        let request = ShareRequest::VerifyAndSign(VerifyAndSignParams {
            direction,
            start_message_idx: batch.start_nonce,
            src_chain_name: batch.origin_chain_name.clone(),
            dst_chain_name: access.dst_chain_name,
            src_chain_id: access.src_chain_id,
            dst_chain_id: access.dst_chain_id,
            messages: batch.messages.clone(),
            qa: None,
        });
        let report = self
            .run_round(committee, digest, sequence_id, loop_counter, request, batch, log.clone())
            .await;
        self.report(&log, report)
    }

    /// Sign a raw 256-bit value.
    pub async fn sign_u256(
        &self,
        committee: Option<Arc<CommitteeView>>,
        value: String,
    ) -> RoundReport<String> {
        let sequence_id = sequence_id(&timestamp());
        let log = Arc::new(self.round_log(&sequence_id).with_prefix("BLS u256: "));
        log.debug(format!("will sign u256 value {}", value));

        let committee = match self.committee_if_enabled(committee, &log) {
            Some(committee) => committee,
            None => return self.report(&log, RoundReport::unsigned(value)),
        };
        let digest = match digest_u256(&value) {
            Ok(digest) => digest,
            Err(err) => return self.report(&log, RoundReport::failed(err, value)),
        };
        let request = ShareRequest::U256(SignU256Params {
            value_to_sign: value.clone(),
            qa: None,
        });
        let report = self
            .run_round(committee, digest, sequence_id, 0, request, value, log.clone())
            .await;
        self.report(&log, report)
    }

    /// Sign a hash computed elsewhere.
    pub async fn sign_hash(
        &self,
        committee: Option<Arc<CommitteeView>>,
        hash: String,
    ) -> RoundReport<String> {
        let sequence_id = sequence_id(&timestamp());
        let log = Arc::new(self.round_log(&sequence_id).with_prefix("BLS ready hash: "));
        log.debug(format!("will sign ready hash {}", hash));

        let committee = match self.committee_if_enabled(committee, &log) {
            Some(committee) => committee,
            None => return self.report(&log, RoundReport::unsigned(hash)),
        };
        let digest = match digest_verbatim(&hash) {
            Ok(digest) => digest,
            Err(err) => return self.report(&log, RoundReport::failed(err, hash)),
        };
        let request = ShareRequest::ReadyHash(SignReadyHashParams {
            message_hash: digest.to_hex(),
            qa: None,
        });
        let report = self
            .run_round(committee, digest, sequence_id, 0, request, hash, log.clone())
            .await;
        self.report(&log, report)
    }

    fn round_log(&self, sequence_id: &str) -> RoundLog {
        let mode = if self.config.direct_round_log {
            LogMode::Direct
        } else {
            LogMode::Buffered
        };
        RoundLog::new(sequence_id, mode)
    }

    fn committee_if_enabled(
        &self,
        committee: Option<Arc<CommitteeView>>,
        log: &RoundLog,
    ) -> Option<Arc<CommitteeView>> {
        if !self.config.signing_enabled() {
            log.info("BLS signing is disabled, payload passes unsigned");
            return None;
        }
        if committee.is_none() {
            log.warn("no committee available, payload passes unsigned");
        }
        committee
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_round<P>(
        &self,
        committee: Arc<CommitteeView>,
        digest: Digest,
        sequence_id: String,
        loop_counter: u64,
        request: ShareRequest,
        payload: P,
        log: Arc<RoundLog>,
    ) -> RoundReport<P> {
        let context = Arc::new(RoundContext {
            sequence_id,
            loop_counter,
            request,
        });
        match self
            .gatherer
            .gather(committee, digest, self.source.clone(), context, log)
            .await
        {
            Ok(outcome) => RoundReport {
                error: None,
                payload,
                aggregate: Some(outcome.aggregate),
                verification: Some(outcome.verification),
            },
            Err(err) => RoundReport::failed(err, payload),
        }
    }

    fn report<P>(&self, log: &RoundLog, report: RoundReport<P>) -> RoundReport<P> {
        match &report.error {
            Some(err) => log.error(format!("signing round failed: {}", err)),
            None => log.debug("signing round complete"),
        }
        log.finish(report.is_success(), self.config.expose_round_details);
        report
    }
}
