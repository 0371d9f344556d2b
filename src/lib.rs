//! IMA BLS: threshold BLS attestation for inter-chain message batches
//!
//! ## Description
//!
//! Before a batch of outgoing messages is relayed to its destination chain, a quorum of the
//! source chain's validator nodes must attest to it. Each node independently rebuilds the batch
//! digest, checks the messages against the source chain's message proxy, and has its remote key
//! custodian produce a BLS signature share. Any `t` of the `n` shares glue into one signature
//! verifiable against the chain's common public key.
//!
//! This crate contains both halves of that exchange: the coordinator that gathers and glues
//! shares ([`orchestrator`], [`gatherer`]) and the participant that produces one on request
//! ([`responder`]).
//!
//! ## Gathering Summary
//!
//! The coordinator asks every committee node for a share concurrently. Each reply is verified
//! against the node's public key share before it counts. Once `t` verified shares are in, they
//! are glued, the digest's hash-to-curve point is attached and the aggregate is checked against
//! the common public key. Shares arriving after that are skipped. A round fails when every node
//! answered without reaching quorum, when the poll-step ceiling passes, or when the outer wall
//! clock runs out, whichever comes first. Exactly one outcome is reported per round.
//!
//! ## Usage Notes
//!
//! Curve arithmetic is not done here. Glue, hash-to-curve and verification are external
//! executables driven through JSON files in a throwaway scratch directory, see [`aggregator`].
//!
//! Without a verification tool every share is rejected, so no round can reach quorum. Setting
//! `accept_unverified_shares` lets shares through unchecked; aggregates are then reported as
//! [`types::Verification::Skipped`], or fail the round when `require_aggregate_verification` is
//! set.

pub mod aggregator;
pub mod committee;
pub mod config;
pub mod custodian;
pub mod digest;
pub mod error;
pub mod gatherer;
pub mod logging;
pub mod orchestrator;
pub mod protocol;
pub mod proxy;
pub mod responder;
pub mod round_log;
pub mod rpc;
pub mod threshold_scheme;
pub mod types;
