use async_trait::async_trait;

use crate::committee::{CommonPublicKey, PublicKeyShare};
use crate::digest::Digest;
use crate::error::Result;
use crate::round_log::RoundLog;
use crate::types::{AggregateSignature, PartialShare};

/// The cryptographic half of a round: share checks, combination and aggregate checks.
///
/// The gatherer only decides *when* to call these; curve arithmetic lives behind this trait.
#[async_trait]
pub trait ThresholdScheme: Send + Sync {
    async fn verify_signature_share(
        &self,
        t: usize,
        n: usize,
        share: &PartialShare,
        digest: &Digest,
        public_key: &PublicKeyShare,
        log: &RoundLog,
    ) -> bool;

    async fn combine_signature_shares(
        &self,
        t: usize,
        n: usize,
        digest: &Digest,
        shares: &[PartialShare],
        log: &RoundLog,
    ) -> Result<AggregateSignature>;

    /// Whether `verify_aggregate` can do anything.
    fn can_verify_aggregate(&self) -> bool;

    async fn verify_aggregate(
        &self,
        t: usize,
        n: usize,
        aggregate: &AggregateSignature,
        digest: &Digest,
        common_public_key: &CommonPublicKey,
        log: &RoundLog,
    ) -> bool;
}
