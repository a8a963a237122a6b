//! Consensus challenges: the claim verifier nodes vote on.

use crate::{binder::Commitment, work::WorkHash};
use blake2::digest::{consts::U32, Digest};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

type Blake2b256 = blake2::Blake2b<U32>;

const CHALLENGE_DOMAIN: &[u8] = b"ORIGINSEAL_CHALLENGE_V1";

/// BLAKE2b-256 digest identifying a challenge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChallengeHash(#[serde(with = "hex::serde")] pub [u8; 32]);

impl ChallengeHash {
    /// Hex encoding of the digest.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Raw digest bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for ChallengeHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Immutable claim submitted to verifier nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Challenge {
    /// Work being certified.
    pub work_hash: WorkHash,
    /// Commitment bound to the work and its fingerprint.
    pub commitment: Commitment,
    /// Creator of the work.
    pub creator_id: String,
    /// Origin score in `[0, 100]`.
    pub entropy_score: f64,
    /// When the challenge was built.
    pub submitted_at: DateTime<Utc>,
}

impl Challenge {
    /// Builds a challenge.
    pub fn new(
        work_hash: WorkHash,
        commitment: Commitment,
        creator_id: impl Into<String>,
        entropy_score: f64,
        submitted_at: DateTime<Utc>,
    ) -> Self {
        Self {
            work_hash,
            commitment,
            creator_id: creator_id.into(),
            entropy_score,
            submitted_at,
        }
    }

    /// Computes the challenge hash every seal must reference.
    pub fn challenge_hash(&self) -> ChallengeHash {
        challenge_hash(
            &self.work_hash,
            &self.commitment,
            &self.creator_id,
            self.entropy_score,
            self.submitted_at,
        )
    }
}

fn mix_bytes(hasher: &mut Blake2b256, bytes: &[u8]) {
    hasher.update((bytes.len() as u64).to_be_bytes());
    hasher.update(bytes);
}

/// Hashes the challenge fields with length prefixes.
///
/// The score enters as its exact IEEE-754 bits and the timestamp as seconds
/// plus sub-second nanoseconds, so any edit to either changes the hash.
pub fn challenge_hash(
    work_hash: &WorkHash,
    commitment: &Commitment,
    creator_id: &str,
    entropy_score: f64,
    submitted_at: DateTime<Utc>,
) -> ChallengeHash {
    let mut hasher = Blake2b256::new();
    hasher.update(CHALLENGE_DOMAIN);
    mix_bytes(&mut hasher, work_hash.as_str().as_bytes());
    mix_bytes(&mut hasher, &commitment.bytes);
    mix_bytes(&mut hasher, &commitment.nonce);
    mix_bytes(&mut hasher, commitment.session_id.as_bytes());
    mix_bytes(&mut hasher, creator_id.as_bytes());
    hasher.update(entropy_score.to_bits().to_be_bytes());
    hasher.update(submitted_at.timestamp().to_be_bytes());
    hasher.update(submitted_at.timestamp_subsec_nanos().to_be_bytes());
    let mut out = [0u8; 32];
    out.copy_from_slice(&hasher.finalize());
    ChallengeHash(out)
}
