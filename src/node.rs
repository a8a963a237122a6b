//! Verifier node transport and the in-process reference verifier.

use crate::{
    challenge::Challenge,
    error::NodeError,
    keys::{signing_key_from_seed, VerifierRegistry},
    seal::{Seal, Vote},
    work::WorkHash,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ed25519_dalek::{SigningKey, VerifyingKey};
use std::sync::Arc;
use tracing::debug;

/// `evaluate(Challenge) -> Seal` over an authenticated channel.
#[async_trait]
pub trait VerifierNode: Send + Sync {
    /// Identifier under which the node's key is provisioned.
    fn node_id(&self) -> &str;

    /// Evaluates the challenge and returns the node's signed vote.
    async fn evaluate(&self, challenge: &Challenge) -> Result<Seal, NodeError>;
}

/// Read view of which works already hold an active proof.
pub trait CertificationIndex: Send + Sync {
    /// Returns true if `work_hash` has an active proof at `now`.
    fn is_certified(&self, work_hash: &WorkHash, now: DateTime<Utc>) -> bool;
}

/// Verifier that checks challenges locally and signs with its own key.
///
/// A challenge is accepted when its score is finite and within
/// `[min_score, 100]`, its commitment is well formed, and the work is not
/// already certified according to the node's index.
pub struct LocalVerifier {
    node_id: String,
    signing: SigningKey,
    index: Option<Arc<dyn CertificationIndex>>,
    min_score: f64,
}

impl LocalVerifier {
    /// Creates a verifier without duplicate detection.
    pub fn new(node_id: impl Into<String>, signing: SigningKey) -> Self {
        Self {
            node_id: node_id.into(),
            signing,
            index: None,
            min_score: 0.0,
        }
    }

    /// Consults `index` for duplicate detection.
    pub fn with_index(mut self, index: Arc<dyn CertificationIndex>) -> Self {
        self.index = Some(index);
        self
    }

    /// Rejects challenges scoring below `min_score`.
    pub fn with_min_score(mut self, min_score: f64) -> Self {
        self.min_score = min_score;
        self
    }

    /// Public key to provision in the registry.
    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing.verifying_key()
    }

    /// Decides the vote for `challenge` at `now`.
    pub fn judge(&self, challenge: &Challenge, now: DateTime<Utc>) -> Vote {
        let score = challenge.entropy_score;
        if !score.is_finite() || score < self.min_score || score > 100.0 {
            debug!(node = %self.node_id, score, "score outside sanity bounds");
            return Vote::Reject;
        }
        if !challenge.commitment.is_well_formed() {
            debug!(node = %self.node_id, "commitment malformed");
            return Vote::Reject;
        }
        if let Some(index) = &self.index {
            if index.is_certified(&challenge.work_hash, now) {
                debug!(node = %self.node_id, work_hash = %challenge.work_hash, "work already certified");
                return Vote::Reject;
            }
        }
        Vote::Accept
    }
}

#[async_trait]
impl VerifierNode for LocalVerifier {
    fn node_id(&self) -> &str {
        &self.node_id
    }

    async fn evaluate(&self, challenge: &Challenge) -> Result<Seal, NodeError> {
        let now = Utc::now();
        let vote = self.judge(challenge, now);
        Ok(Seal::sign(
            self.node_id.clone(),
            challenge.challenge_hash(),
            vote,
            &self.signing,
            now,
        ))
    }
}

/// Seed-derived set of [`LocalVerifier`]s and their registry.
pub struct LocalCluster {
    /// Nodes in id order.
    pub nodes: Vec<Arc<dyn VerifierNode>>,
    /// Public keys of every node.
    pub registry: VerifierRegistry,
}

/// Builds `count` verifiers named `{seed_prefix}-{i}` whose keys derive from
/// their names, each consulting `index` and rejecting scores below `min_score`.
pub fn local_cluster(
    seed_prefix: &str,
    count: usize,
    index: Option<Arc<dyn CertificationIndex>>,
    min_score: f64,
) -> LocalCluster {
    let mut registry = VerifierRegistry::new();
    let nodes = (0..count)
        .map(|idx| {
            let node_id = format!("{seed_prefix}-{idx}");
            let mut verifier = LocalVerifier::new(node_id.clone(), signing_key_from_seed(&node_id))
                .with_min_score(min_score);
            if let Some(index) = &index {
                verifier = verifier.with_index(index.clone());
            }
            registry.insert(node_id, verifier.verifying_key());
            Arc::new(verifier) as Arc<dyn VerifierNode>
        })
        .collect();
    LocalCluster { nodes, registry }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{binder::Commitment, work::hash_content};
    use std::collections::HashSet;

    struct FixedIndex(HashSet<WorkHash>);

    impl CertificationIndex for FixedIndex {
        fn is_certified(&self, work_hash: &WorkHash, _now: DateTime<Utc>) -> bool {
            self.0.contains(work_hash)
        }
    }

    fn challenge(score: f64) -> Challenge {
        let now = Utc::now();
        Challenge::new(
            hash_content(b"essay", "dana", now),
            Commitment::new(vec![3; 32], vec![4; 32]),
            "dana",
            score,
            now,
        )
    }

    #[tokio::test]
    async fn accepts_sane_challenge_with_valid_signature() {
        let verifier = LocalVerifier::new("node-0", signing_key_from_seed("node-0"));
        let ch = challenge(64.0);
        let seal = verifier.evaluate(&ch).await.unwrap();
        assert_eq!(seal.vote, Vote::Accept);
        assert_eq!(seal.challenge_hash, ch.challenge_hash());
        assert!(seal.verify(&verifier.verifying_key()).is_ok());
    }

    #[test]
    fn rejects_out_of_bounds_and_malformed() {
        let verifier =
            LocalVerifier::new("node-0", signing_key_from_seed("node-0")).with_min_score(10.0);
        let now = Utc::now();
        assert_eq!(verifier.judge(&challenge(5.0), now), Vote::Reject);
        assert_eq!(verifier.judge(&challenge(101.0), now), Vote::Reject);
        assert_eq!(verifier.judge(&challenge(f64::NAN), now), Vote::Reject);
        let mut malformed = challenge(50.0);
        malformed.commitment.session_id = "forged".into();
        assert_eq!(verifier.judge(&malformed, now), Vote::Reject);
        assert_eq!(verifier.judge(&challenge(50.0), now), Vote::Accept);
    }

    #[test]
    fn rejects_already_certified_work() {
        let ch = challenge(50.0);
        let index = Arc::new(FixedIndex(HashSet::from([ch.work_hash.clone()])));
        let verifier = LocalVerifier::new("node-0", signing_key_from_seed("node-0")).with_index(index);
        assert_eq!(verifier.judge(&ch, Utc::now()), Vote::Reject);
    }

    #[tokio::test]
    async fn local_cluster_keys_match_registry() {
        let cluster = local_cluster("seal", 3, None, 0.0);
        assert_eq!(cluster.registry.len(), 3);
        let ch = challenge(40.0);
        for node in &cluster.nodes {
            let seal = node.evaluate(&ch).await.unwrap();
            let key = cluster.registry.get(node.node_id()).unwrap();
            assert!(seal.verify(key).is_ok());
        }
        assert_eq!(cluster.nodes[2].node_id(), "seal-2");
    }
}
