//! Seals: a verifier node's signed vote on a challenge.

use crate::{
    challenge::ChallengeHash,
    keys::{sign_payload_base64, verify_signature_base64, KeyError},
};
use chrono::{DateTime, Utc};
use ed25519_dalek::{SigningKey, VerifyingKey};
use serde::{Deserialize, Serialize};

const SEAL_DOMAIN: &[u8] = b"ORIGINSEAL_SEAL_V1";

/// A node's verdict on a challenge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Vote {
    /// The challenge is valid and the work is not yet certified.
    Accept,
    /// The challenge failed the node's checks.
    Reject,
}

impl Vote {
    fn tag(self) -> u8 {
        match self {
            Self::Accept => 1,
            Self::Reject => 0,
        }
    }
}

/// Signed vote on one challenge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Seal {
    /// Claimed signer.
    pub node_id: String,
    /// Challenge the vote refers to.
    pub challenge_hash: ChallengeHash,
    /// The verdict.
    pub vote: Vote,
    /// Base64 ed25519 signature over [`seal_payload`].
    pub signature: String,
    /// When the node signed.
    pub timestamp: DateTime<Utc>,
}

/// Canonical bytes a node signs.
pub fn seal_payload(
    node_id: &str,
    challenge_hash: &ChallengeHash,
    vote: Vote,
    timestamp: DateTime<Utc>,
) -> Vec<u8> {
    let mut payload = Vec::with_capacity(SEAL_DOMAIN.len() + node_id.len() + 32 + 21);
    payload.extend_from_slice(SEAL_DOMAIN);
    payload.extend_from_slice(&(node_id.len() as u64).to_be_bytes());
    payload.extend_from_slice(node_id.as_bytes());
    payload.extend_from_slice(challenge_hash.as_bytes());
    payload.push(vote.tag());
    payload.extend_from_slice(&timestamp.timestamp().to_be_bytes());
    payload.extend_from_slice(&timestamp.timestamp_subsec_nanos().to_be_bytes());
    payload
}

impl Seal {
    /// Signs a vote with the node's key.
    pub fn sign(
        node_id: impl Into<String>,
        challenge_hash: ChallengeHash,
        vote: Vote,
        signing: &SigningKey,
        timestamp: DateTime<Utc>,
    ) -> Self {
        let node_id = node_id.into();
        let payload = seal_payload(&node_id, &challenge_hash, vote, timestamp);
        Self {
            signature: sign_payload_base64(signing, &payload),
            node_id,
            challenge_hash,
            vote,
            timestamp,
        }
    }

    /// Checks the signature against the node's provisioned key.
    pub fn verify(&self, key: &VerifyingKey) -> Result<(), KeyError> {
        let payload = seal_payload(&self.node_id, &self.challenge_hash, self.vote, self.timestamp);
        verify_signature_base64(key, &payload, &self.signature)
    }

    /// Returns true for accept votes.
    pub fn is_accept(&self) -> bool {
        self.vote == Vote::Accept
    }
}
