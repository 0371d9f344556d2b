//! Quorum gathering.
//!
//! One task per committee node requests and verifies a share. A poll loop watches the shared
//! session and ends the round on the first of: quorum reached (glue and verify), every node
//! responded without quorum, or the poll-step ceiling. An independent wall-clock task races the
//! poll loop. Whichever finishes first fills the round's [`CompletionSlot`]; the other becomes a
//! no-op and both are cancelled. Once the poll loop has started gluing a quorum, the wall clock
//! no longer ends the round and the glue outcome is reported.
//!
//! Node requests are not cancelled when the round ends. Late shares land in the skipped bucket.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::Serialize;
use tokio::{sync::oneshot, time::sleep};

use crate::committee::{CommitteeNode, CommitteeView};
use crate::config::GatherConfig;
use crate::digest::Digest;
use crate::error::{Result, SigningError};
use crate::protocol::ShareRequest;
use crate::round_log::RoundLog;
use crate::threshold_scheme::ThresholdScheme;
use crate::types::{AggregateSignature, PartialShare, SignResult, Verification};

/// Identity and payload of one signing round, shared with every node request.
#[derive(Debug, Clone)]
pub struct RoundContext {
    pub sequence_id: String,
    pub loop_counter: u64,
    pub request: ShareRequest,
}

/// Asks one node for its share.
#[async_trait]
pub trait ShareSource: Send + Sync {
    async fn request_share(&self, node: &CommitteeNode, round: &RoundContext) -> Result<SignResult>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct GatheringTracker {
    pub received: usize,
    pub errors: usize,
    pub skipped: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arrival {
    Collected,
    /// Quorum was already reached.
    Skipped,
}

/// Mutable state of one round.
#[derive(Debug)]
pub struct GatheringSession {
    threshold: usize,
    nodes: usize,
    shares: Vec<PartialShare>,
    tracker: GatheringTracker,
    received_previous: usize,
    finishing: bool,
}

impl GatheringSession {
    pub fn new(threshold: usize, nodes: usize) -> Self {
        Self {
            threshold,
            nodes,
            shares: Vec::with_capacity(threshold),
            tracker: GatheringTracker::default(),
            received_previous: 0,
            finishing: false,
        }
    }

    pub fn quorum_reached(&self) -> bool {
        self.shares.len() >= self.threshold
    }

    pub fn all_responded(&self) -> bool {
        self.tracker.received >= self.nodes
    }

    /// Add a verified share. Never holds more than `threshold` shares.
    pub fn offer(&mut self, share: PartialShare) -> Arrival {
        self.tracker.received += 1;
        if self.quorum_reached() {
            self.tracker.skipped += 1;
            Arrival::Skipped
        } else {
            self.shares.push(share);
            Arrival::Collected
        }
    }

    /// Node answered after quorum, its share was never checked.
    pub fn record_skip(&mut self) {
        self.tracker.received += 1;
        self.tracker.skipped += 1;
    }

    pub fn record_error(&mut self) {
        self.tracker.received += 1;
        self.tracker.errors += 1;
    }

    /// Quorum is being glued, the round is decided.
    pub fn begin_finishing(&mut self) {
        self.finishing = true;
    }

    pub fn is_finishing(&self) -> bool {
        self.finishing
    }

    pub fn shares(&self) -> &[PartialShare] {
        &self.shares
    }

    pub fn tracker(&self) -> GatheringTracker {
        self.tracker
    }

    /// Tracker snapshot if anything arrived since the last call.
    fn take_progress(&mut self) -> Option<GatheringTracker> {
        if self.tracker.received == self.received_previous {
            return None;
        }
        self.received_previous = self.tracker.received;
        Some(self.tracker)
    }
}

/// Single-assignment result slot. The first `complete` wins, later ones are ignored.
#[derive(Debug)]
pub struct CompletionSlot<T> {
    sender: Mutex<Option<oneshot::Sender<T>>>,
}

impl<T> CompletionSlot<T> {
    pub fn new() -> (Self, oneshot::Receiver<T>) {
        let (sender, receiver) = oneshot::channel();
        (
            Self {
                sender: Mutex::new(Some(sender)),
            },
            receiver,
        )
    }

    /// Returns whether this call delivered the result.
    pub fn complete(&self, value: T) -> bool {
        match self.sender.lock().expect("got lock").take() {
            Some(sender) => {
                // receiver gone means nobody is waiting, still counts as the one completion
                let _ = sender.send(value);
                true
            }
            None => false,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.sender.lock().expect("got lock").is_none()
    }
}

#[derive(Debug, Clone)]
pub struct GatherOutcome {
    pub aggregate: AggregateSignature,
    pub verification: Verification,
    pub tracker: GatheringTracker,
}

pub struct Gatherer {
    scheme: Arc<dyn ThresholdScheme>,
    settings: GatherConfig,
    require_verification: bool,
}

/// Everything the node tasks and the poll loop share.
struct Round {
    scheme: Arc<dyn ThresholdScheme>,
    committee: Arc<CommitteeView>,
    digest: Digest,
    session: Mutex<GatheringSession>,
    log: Arc<RoundLog>,
    settings: GatherConfig,
    require_verification: bool,
    slot: CompletionSlot<Result<GatherOutcome>>,
}

impl Gatherer {
    pub fn new(
        scheme: Arc<dyn ThresholdScheme>,
        settings: GatherConfig,
        require_verification: bool,
    ) -> Self {
        Self {
            scheme,
            settings,
            require_verification,
        }
    }

    /// Collect `t` verified shares of `digest` from `committee` and glue them.
    pub async fn gather(
        &self,
        committee: Arc<CommitteeView>,
        digest: Digest,
        source: Arc<dyn ShareSource>,
        context: Arc<RoundContext>,
        log: Arc<RoundLog>,
    ) -> Result<GatherOutcome> {
        let (slot, done) = CompletionSlot::new();
        let round = Arc::new(Round {
            scheme: self.scheme.clone(),
            session: Mutex::new(GatheringSession::new(committee.threshold(), committee.len())),
            committee,
            digest,
            log,
            settings: self.settings.clone(),
            require_verification: self.require_verification,
            slot,
        });

        round.log.debug(format!(
            "will query {} node(s) for {} BLS share(s) of {}, sequence ID is {}",
            round.committee.len(),
            round.committee.threshold(),
            digest,
            context.sequence_id
        ));
        for node in round.committee.nodes().iter().cloned() {
            tokio::spawn(round.clone().collect_share(node, source.clone(), context.clone()));
        }

        let poller = tokio::spawn(round.clone().poll());
        let wall_clock = tokio::spawn(round.clone().wall_clock());
        let outcome = done.await.unwrap_or(Err(SigningError::Abandoned));
        poller.abort();
        wall_clock.abort();
        outcome
    }
}

impl Round {
    async fn collect_share(
        self: Arc<Self>,
        node: CommitteeNode,
        source: Arc<dyn ShareSource>,
        context: Arc<RoundContext>,
    ) {
        let node_desc = format!(
            "{} ({}/{}, ID {})",
            node.url,
            node.position,
            self.committee.len(),
            node.node_id
        );
        {
            let mut session = self.session.lock().expect("got lock");
            if session.quorum_reached() {
                session.record_skip();
                self.log.debug(format!("not querying node {}, quorum already reached", node_desc));
                return;
            }
        }

        let reply = match source.request_share(&node, &context).await {
            Ok(reply) => reply,
            Err(err) => {
                self.log.warn(format!("JSON RPC call to node {} failed: {}", node_desc, err));
                self.session.lock().expect("got lock").record_error();
                return;
            }
        };
        self.log.trace(format!("node {} sign result: {:?}", node_desc, reply));

        let checked = self.check_reply(&node, reply).await;
        let mut session = self.session.lock().expect("got lock");
        match checked {
            Ok(Some(share)) => match session.offer(share) {
                Arrival::Collected => self.log.debug(format!(
                    "got verified BLS share from node {} with index {}",
                    node_desc, node.signer_index
                )),
                Arrival::Skipped => self.log.info(format!(
                    "ignoring share of node #{}, {} share(s) already gathered",
                    node.signer_index,
                    self.committee.threshold()
                )),
            },
            Ok(None) => {
                session.record_skip();
                self.log.info(format!(
                    "ignoring sign result of node #{}, quorum already reached",
                    node.signer_index
                ));
            }
            Err(err @ SigningError::Verification(_)) => {
                session.record_error();
                self.log.error(format!("node {} partial signature fail: {}", node_desc, err));
            }
            Err(err) => {
                session.record_error();
                self.log.warn(format!("node {} signature fail: {}", node_desc, err));
            }
        }
    }

    /// Validate a node's reply and verify its share. `None` when quorum was reached meanwhile.
    async fn check_reply(&self, node: &CommitteeNode, reply: SignResult) -> Result<Option<PartialShare>> {
        if !reply.is_ok() {
            return Err(SigningError::MalformedResult(format!(
                "node reported wallet error: {}",
                reply.reported_error().unwrap_or("no signature share")
            )));
        }
        let quorum = self.session.lock().expect("got lock").quorum_reached();
        if quorum {
            return Ok(None);
        }
        let share = PartialShare::from_signature_share(node.signer_index, &reply.signature_share)?;
        let public_key = self.committee.public_key(node.signer_index)?;
        let verified = self
            .scheme
            .verify_signature_share(
                self.committee.threshold(),
                self.committee.participants(),
                &share,
                &self.digest,
                public_key,
                &self.log,
            )
            .await;
        if verified {
            Ok(Some(share))
        } else {
            Err(SigningError::Verification(format!(
                "share of node #{} does not match its public key",
                node.signer_index
            )))
        }
    }

    async fn poll(self: Arc<Self>) {
        let nodes = self.committee.len();
        for _ in 0..self.settings.max_steps {
            sleep(self.settings.poll_period()).await;
            let (quorum, all_responded, shares, tracker) = {
                let mut session = self.session.lock().expect("got lock");
                if let Some(progress) = session.take_progress() {
                    self.log.debug(format!(
                        "BLS signature gathering progress updated, {} of {} node(s) answered, {} share(s) of needed {}, {} error(s)",
                        progress.received,
                        nodes,
                        session.shares().len(),
                        self.committee.threshold(),
                        progress.errors
                    ));
                }
                if session.quorum_reached() {
                    session.begin_finishing();
                }
                (
                    session.quorum_reached(),
                    session.all_responded(),
                    session.shares().to_vec(),
                    session.tracker(),
                )
            };

            if quorum {
                let result = self.finish(shares).await.map(|(aggregate, verification)| {
                    GatherOutcome {
                        aggregate,
                        verification,
                        tracker,
                    }
                });
                self.slot.complete(result);
                return;
            }
            if all_responded {
                self.slot.complete(Err(SigningError::InsufficientQuorum {
                    errors: tracker.errors,
                    nodes,
                }));
                return;
            }
        }
        let tracker = self.session.lock().expect("got lock").tracker();
        self.slot.complete(Err(SigningError::Timeout {
            errors: tracker.errors,
            nodes,
        }));
    }

    async fn wall_clock(self: Arc<Self>) {
        sleep(self.settings.wall_clock()).await;
        let tracker = {
            let session = self.session.lock().expect("got lock");
            if session.is_finishing() {
                self.log.warn("wall clock limit passed while gluing, waiting for the glue result");
                return;
            }
            session.tracker()
        };
        if self.slot.complete(Err(SigningError::WallClock {
            limit_ms: self.settings.wall_clock_ms,
            errors: tracker.errors,
            nodes: self.committee.len(),
        })) {
            self.log.error("BLS signing round hit its wall clock limit");
        }
    }

    async fn finish(&self, shares: Vec<PartialShare>) -> Result<(AggregateSignature, Verification)> {
        let t = self.committee.threshold();
        let n = self.committee.participants();
        let aggregate = self
            .scheme
            .combine_signature_shares(t, n, &self.digest, &shares, &self.log)
            .await
            .map_err(|err| {
                self.log.error(format!("BLS glue failed, no glue result arrived: {}", err));
                err
            })?;
        self.log.info(format!("got BLS glue result {:?}", aggregate.signature));

        if !self.scheme.can_verify_aggregate() {
            if self.require_verification {
                self.log.error("aggregate cannot be verified, no verify tool configured");
                return Err(SigningError::VerificationSkipped);
            }
            self.log.warn("aggregate left unverified, no verify tool configured");
            return Ok((aggregate, Verification::Skipped));
        }

        let common_key = self.committee.common_public_key().ok_or_else(|| {
            self.log.error("no BLS common public key");
            SigningError::Verification("no BLS common public key".to_string())
        })?;
        if self
            .scheme
            .verify_aggregate(t, n, &aggregate, &self.digest, common_key, &self.log)
            .await
        {
            self.log.info("got successful summary BLS verification result");
            Ok((aggregate, Verification::Verified))
        } else {
            self.log.error("BLS verification failed");
            Err(SigningError::Verification("aggregate signature rejected".to_string()))
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::committee::{tests::network, CommonPublicKey, PublicKeyShare};
    use crate::protocol::SignReadyHashParams;
    use crate::types::Point;
    use proptest::prelude::*;
    use std::collections::{HashMap, HashSet};
    use std::time::Duration;

    #[derive(Default)]
    pub(crate) struct FakeScheme {
        pub(crate) bad_shares: HashSet<usize>,
        pub(crate) can_verify: bool,
        pub(crate) reject_aggregate: bool,
        pub(crate) glue_delay_ms: u64,
        pub(crate) glued: Mutex<Vec<Vec<usize>>>,
    }

    #[async_trait]
    impl ThresholdScheme for FakeScheme {
        async fn verify_signature_share(
            &self,
            _t: usize,
            _n: usize,
            share: &PartialShare,
            _digest: &Digest,
            _public_key: &PublicKeyShare,
            _log: &RoundLog,
        ) -> bool {
            !self.bad_shares.contains(&share.node_index)
        }

        async fn combine_signature_shares(
            &self,
            _t: usize,
            _n: usize,
            digest: &Digest,
            shares: &[PartialShare],
            _log: &RoundLog,
        ) -> Result<AggregateSignature> {
            sleep(Duration::from_millis(self.glue_delay_ms)).await;
            self.glued
                .lock()
                .unwrap()
                .push(shares.iter().map(|s| s.node_index).collect());
            Ok(AggregateSignature {
                signature: Point {
                    x: "1".into(),
                    y: "2".into(),
                },
                hash_src: digest.to_hex(),
                hash_point: Point {
                    x: "3".into(),
                    y: "4".into(),
                },
                hint: "0".into(),
            })
        }

        fn can_verify_aggregate(&self) -> bool {
            self.can_verify
        }

        async fn verify_aggregate(
            &self,
            _t: usize,
            _n: usize,
            _aggregate: &AggregateSignature,
            _digest: &Digest,
            _common_public_key: &CommonPublicKey,
            _log: &RoundLog,
        ) -> bool {
            !self.reject_aggregate
        }
    }

    #[derive(Clone, Copy)]
    pub(crate) enum Reply {
        Share(u64),
        Fail,
        Hang,
    }

    pub(crate) struct FakeNodes(pub(crate) HashMap<usize, Reply>);

    #[async_trait]
    impl ShareSource for FakeNodes {
        async fn request_share(&self, node: &CommitteeNode, _round: &RoundContext) -> Result<SignResult> {
            match self.0.get(&node.position).copied().unwrap_or(Reply::Hang) {
                Reply::Share(delay_ms) => {
                    sleep(Duration::from_millis(delay_ms)).await;
                    Ok(SignResult::with_share(format!("{}1:{}2", node.position, node.position)))
                }
                Reply::Fail => Err(SigningError::Transport("connection refused".into())),
                Reply::Hang => std::future::pending().await,
            }
        }
    }

    fn settings(poll_period_ms: u64, max_steps: usize, wall_clock_ms: u64) -> GatherConfig {
        GatherConfig {
            poll_period_ms,
            max_steps,
            wall_clock_ms,
        }
    }

    async fn run(
        t: i64,
        replies: Vec<Reply>,
        scheme: Arc<FakeScheme>,
        settings: GatherConfig,
        strict: bool,
    ) -> Result<GatherOutcome> {
        let count = replies.len();
        let committee = Arc::new(
            CommitteeView::from_network_info(&network(t, count as i64, count), false, None).unwrap(),
        );
        let source = Arc::new(FakeNodes(replies.into_iter().enumerate().collect()));
        let digest = crate::digest::digest_messages(&[], 0, "S1").unwrap();
        let context = Arc::new(RoundContext {
            sequence_id: "0x01".into(),
            loop_counter: 0,
            request: ShareRequest::ReadyHash(SignReadyHashParams {
                message_hash: digest.to_hex(),
                qa: None,
            }),
        });
        Gatherer::new(scheme, settings, strict)
            .gather(committee, digest, source, context, Arc::new(RoundLog::buffered("test")))
            .await
    }

    #[tokio::test]
    async fn glues_exactly_threshold_shares() {
        let scheme = Arc::new(FakeScheme {
            can_verify: true,
            ..Default::default()
        });
        let outcome = run(2, vec![Reply::Share(0); 4], scheme.clone(), settings(50, 100, 5_000), false)
            .await
            .unwrap();

        assert_eq!(outcome.verification, Verification::Verified);
        assert_eq!(outcome.tracker.received, 4);
        assert_eq!(outcome.tracker.skipped, 2);
        assert_eq!(outcome.tracker.errors, 0);
        let glued = scheme.glued.lock().unwrap();
        assert_eq!(glued.len(), 1);
        assert_eq!(glued[0].len(), 2);
    }

    #[tokio::test]
    async fn failed_share_verification_counts_as_error() {
        let scheme = Arc::new(FakeScheme {
            bad_shares: [0].into_iter().collect(),
            can_verify: true,
            ..Default::default()
        });
        let replies = vec![Reply::Share(0), Reply::Share(20), Reply::Share(20), Reply::Fail];
        let outcome = run(2, replies, scheme.clone(), settings(100, 100, 5_000), false)
            .await
            .unwrap();

        assert_eq!(outcome.tracker.errors, 2);
        assert!(!scheme.glued.lock().unwrap()[0].contains(&0));
    }

    #[tokio::test]
    async fn all_failed_ends_before_timeout() {
        let scheme = Arc::new(FakeScheme::default());
        let replies = vec![Reply::Share(0), Reply::Share(0), Reply::Fail, Reply::Fail];
        let err = run(3, replies, scheme.clone(), settings(10, 10_000, 60_000), false)
            .await
            .unwrap_err();

        assert!(matches!(err, SigningError::InsufficientQuorum { errors: 2, nodes: 4 }));
        assert!(scheme.glued.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn poll_ceiling_times_out() {
        let err = run(2, vec![Reply::Hang; 3], Arc::default(), settings(5, 4, 60_000), false)
            .await
            .unwrap_err();
        assert!(matches!(err, SigningError::Timeout { errors: 0, nodes: 3 }));
        assert_eq!(err.to_string(), "signature error(3), got 0 errors(s) for 3 node(s)");
    }

    #[tokio::test]
    async fn wall_clock_wins_over_slow_polling() {
        let replies = vec![Reply::Fail, Reply::Hang, Reply::Hang];
        let err = run(2, replies, Arc::default(), settings(10, 1_000_000, 50), false)
            .await
            .unwrap_err();
        assert!(matches!(err, SigningError::WallClock { errors: 1, nodes: 3, .. }));
        assert!(err.is_timeout());
    }

    #[tokio::test]
    async fn wall_clock_does_not_discard_glue_in_progress() {
        let scheme = Arc::new(FakeScheme {
            can_verify: true,
            glue_delay_ms: 200,
            ..Default::default()
        });
        let outcome = run(1, vec![Reply::Share(0)], scheme.clone(), settings(10, 100, 60), false)
            .await
            .unwrap();
        assert_eq!(outcome.verification, Verification::Verified);
        assert_eq!(scheme.glued.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn unverifiable_aggregate_follows_strictness() {
        let replies = vec![Reply::Share(0); 2];
        let outcome = run(2, replies.clone(), Arc::default(), settings(10, 100, 5_000), false)
            .await
            .unwrap();
        assert_eq!(outcome.verification, Verification::Skipped);

        let err = run(2, replies, Arc::default(), settings(10, 100, 5_000), true)
            .await
            .unwrap_err();
        assert!(matches!(err, SigningError::VerificationSkipped));
    }

    #[tokio::test]
    async fn rejected_aggregate_fails_round() {
        let scheme = Arc::new(FakeScheme {
            can_verify: true,
            reject_aggregate: true,
            ..Default::default()
        });
        let err = run(1, vec![Reply::Share(0)], scheme, settings(10, 100, 5_000), false)
            .await
            .unwrap_err();
        assert!(matches!(err, SigningError::Verification(_)));
    }

    #[test]
    fn slot_completes_once() {
        let (slot, mut receiver) = CompletionSlot::new();
        assert!(!slot.is_completed());
        assert!(slot.complete(1));
        assert!(!slot.complete(2));
        assert!(slot.is_completed());
        assert_eq!(receiver.try_recv().unwrap(), 1);
    }

    fn share(index: usize) -> PartialShare {
        PartialShare {
            node_index: index,
            signature: Point {
                x: "1".into(),
                y: "1".into(),
            },
        }
    }

    proptest! {
        #[test]
        fn session_accounting(
            (n, t, arrivals) in (1usize..8).prop_flat_map(|n| {
                (Just(n), 1usize..=n, proptest::collection::vec(any::<bool>(), n))
            })
        ) {
            let mut session = GatheringSession::new(t, n);
            for (index, good) in arrivals.iter().enumerate() {
                if *good {
                    session.offer(share(index));
                } else {
                    session.record_error();
                }
            }
            let tracker = session.tracker();
            let good = arrivals.iter().filter(|g| **g).count();

            prop_assert!(session.shares().len() <= t);
            prop_assert_eq!(session.shares().len() + tracker.skipped + tracker.errors, tracker.received);
            prop_assert!(session.all_responded());
            prop_assert_eq!(session.quorum_reached(), good >= t);
            prop_assert_eq!(tracker.skipped, good.saturating_sub(t));
        }
    }
}
