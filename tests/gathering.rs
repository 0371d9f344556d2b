mod common;

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use common::{batch, network, CannedNodes, FakeTools, NodeReply};
use ima_bls::aggregator::Aggregator;
use ima_bls::committee::CommitteeView;
use ima_bls::config::AgentConfig;
use ima_bls::digest::digest_batch;
use ima_bls::error::SigningError;
use ima_bls::orchestrator::Orchestrator;
use ima_bls::proxy::NoMessageProxy;
use ima_bls::types::{Direction, Verification};

fn committee(t: i64, n: i64) -> Option<Arc<CommitteeView>> {
    Some(Arc::new(
        CommitteeView::from_network_info(&network(t, n, n as usize), false, None).unwrap(),
    ))
}

fn orchestrator(config: AgentConfig, nodes: CannedNodes) -> Orchestrator {
    Orchestrator::new(
        config.clone(),
        Arc::new(Aggregator::from_config(&config)),
        Arc::new(nodes),
        Arc::new(NoMessageProxy),
    )
}

#[tokio::test]
async fn two_of_four_batch_is_glued_and_verified() {
    let tools = FakeTools::new(true);
    let nodes = CannedNodes::all(4, NodeReply::Share);
    let report = orchestrator(tools.config(), nodes)
        .sign_messages(committee(2, 4), Direction::M2S, batch(), 1, None)
        .await;

    let digest = digest_batch(&batch()).unwrap();
    assert!(report.is_success(), "{:?}", report.error);
    assert_eq!(report.verification, Some(Verification::Verified));
    assert_eq!(report.payload, batch());

    let aggregate = report.aggregate.unwrap();
    assert_eq!(aggregate.signature.x, "111");
    assert_eq!(aggregate.hash_src, digest.to_hex());
    assert_eq!(aggregate.hash_point.x, "5");
    assert_eq!(aggregate.hint, "3");

    // exactly t shares glued, each verified on its own first
    assert_eq!(tools.log("glue"), vec!["2"]);
    assert!(tools.log("verify-share").len() >= 2);
    let checked = tools.log("verify-aggregate");
    assert_eq!(checked.len(), 1);
    assert!(checked[0].contains(&digest.to_hex()));
}

#[tokio::test]
async fn unreachable_majority_fails_without_timeout() {
    let tools = FakeTools::new(true);
    let mut config = tools.config();
    config.gather.max_steps = 100_000;
    let nodes = CannedNodes::all(4, NodeReply::Unreachable);

    let started = Instant::now();
    let report = orchestrator(config, nodes)
        .sign_messages(committee(3, 4), Direction::M2S, batch(), 1, None)
        .await;

    let err = report.error.unwrap();
    assert!(matches!(err, SigningError::InsufficientQuorum { errors: 4, nodes: 4 }));
    assert!(!err.is_timeout());
    assert_eq!(err.to_string(), "signature error(2), got 4 errors(s) for 4 node(s)");
    assert!(started.elapsed() < Duration::from_secs(10));
    assert!(tools.log("glue").is_empty());
}

#[tokio::test]
async fn missing_verify_tool_rejects_every_share() {
    let tools = FakeTools::new(false);
    let report = orchestrator(tools.config(), CannedNodes::all(4, NodeReply::Share))
        .sign_messages(committee(2, 4), Direction::M2S, batch(), 1, None)
        .await;

    assert!(matches!(
        report.error,
        Some(SigningError::InsufficientQuorum { errors: 4, nodes: 4 })
    ));
    assert!(report.aggregate.is_none());
    assert!(tools.log("glue").is_empty());
}

#[tokio::test]
async fn unverified_shares_when_allowed_depend_on_strictness() {
    let tools = FakeTools::new(false);
    let nodes = || CannedNodes::all(3, NodeReply::Share);
    let mut lenient = tools.config();
    lenient.accept_unverified_shares = true;

    let report = orchestrator(lenient.clone(), nodes())
        .sign_u256(committee(2, 3), "0x1234".to_string())
        .await;
    assert!(report.is_success(), "{:?}", report.error);
    assert_eq!(report.verification, Some(Verification::Skipped));

    let mut strict = lenient;
    strict.require_aggregate_verification = true;
    let report = orchestrator(strict, nodes())
        .sign_u256(committee(2, 3), "0x1234".to_string())
        .await;
    assert!(matches!(report.error, Some(SigningError::VerificationSkipped)));
}

#[tokio::test]
async fn one_bad_node_is_tolerated() {
    let tools = FakeTools::new(true);
    let mut nodes = CannedNodes::all(4, NodeReply::Share);
    nodes.0.insert(0, NodeReply::Unreachable);

    let report = orchestrator(tools.config(), nodes)
        .sign_hash(committee(3, 4), format!("0x{}", "11".repeat(32)))
        .await;
    assert!(report.is_success(), "{:?}", report.error);
    assert_eq!(tools.log("glue"), vec!["3"]);
    assert!(!tools.log("verify-share").contains(&"0".to_string()));
}

#[tokio::test]
async fn rejected_share_counts_as_error() {
    let tools = FakeTools::new(true);
    tools.reject_share_of(0);

    let report = orchestrator(tools.config(), CannedNodes::all(4, NodeReply::Share))
        .sign_messages(committee(4, 4), Direction::M2S, batch(), 1, None)
        .await;
    assert!(matches!(
        report.error,
        Some(SigningError::InsufficientQuorum { errors: 1, nodes: 4 })
    ));
    assert!(!tools.log("verify-share").contains(&"0".to_string()));
    assert!(tools.log("glue").is_empty());
    assert_eq!(tools.leftover_scratch(), 0);
}
