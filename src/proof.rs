//! The issued originality proof and its stable wire format.

use crate::{
    anchor::AnchorId,
    binder::Commitment,
    challenge::{challenge_hash, Challenge, ChallengeHash},
    error::ProofCheckError,
    keys::VerifierRegistry,
    seal::Seal,
    work::{Work, WorkHash},
};
use blake2::digest::{consts::U32, Digest};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

type Blake2b256 = blake2::Blake2b<U32>;

/// Schema identifier embedded in every serialised proof.
pub const SCHEMA_PROOF: &str = "originseal.proof.v1";

const VERIFICATION_DOMAIN: &[u8] = b"ORIGINSEAL_VERIFICATION_ID";

/// Quorum-backed proof that a work was certified original.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationProof {
    /// Schema identifier (`originseal.proof.v1`).
    pub schema: String,
    /// Unique id of this proof (hex BLAKE2b-256).
    pub verification_id: String,
    /// Certified work.
    pub work_hash: WorkHash,
    /// Creator named in the challenge.
    pub creator_id: String,
    /// Origin score in `[0, 100]`.
    pub origin_score: f64,
    /// Commitment the seals vouch for.
    pub commitment: Commitment,
    /// Challenge the seals were signed over.
    pub challenge_hash: ChallengeHash,
    /// When the challenge was submitted to the verifiers.
    pub submitted_at: DateTime<Utc>,
    /// Accept seals that formed the quorum.
    pub seals: Vec<Seal>,
    /// Anchor id returned by the anchoring service.
    pub anchor_id: AnchorId,
    /// Issuance time.
    pub issued_at: DateTime<Utc>,
    /// End of validity.
    pub expires_at: DateTime<Utc>,
}

impl VerificationProof {
    /// Assembles a proof from a certified challenge.
    pub fn issue(
        work: &Work,
        challenge: &Challenge,
        seals: Vec<Seal>,
        anchor_id: AnchorId,
        issued_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        let challenge_hash = challenge.challenge_hash();
        Self {
            schema: SCHEMA_PROOF.to_string(),
            verification_id: verification_id(
                work,
                &challenge_hash,
                &anchor_id,
                issued_at,
                expires_at,
            ),
            work_hash: challenge.work_hash.clone(),
            creator_id: challenge.creator_id.clone(),
            origin_score: challenge.entropy_score,
            commitment: challenge.commitment.clone(),
            challenge_hash,
            submitted_at: challenge.submitted_at,
            seals,
            anchor_id,
            issued_at,
            expires_at,
        }
    }

    /// Returns true once `now` has reached `expires_at`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// Recomputes the challenge hash from the proof's own fields.
    pub fn recompute_challenge_hash(&self) -> ChallengeHash {
        challenge_hash(
            &self.work_hash,
            &self.commitment,
            &self.creator_id,
            self.origin_score,
            self.submitted_at,
        )
    }

    /// Recomputes the verification id from the proof's own fields.
    pub fn recompute_verification_id(&self) -> String {
        derive_id(
            &self.work_hash,
            &self.challenge_hash,
            &self.anchor_id,
            self.issued_at,
            self.expires_at,
        )
    }

    /// Checks the proof without re-running consensus: the challenge hash
    /// must match the proof contents, the verification id must match the
    /// anchor id and validity window, and at least `quorum_threshold`
    /// distinct provisioned nodes must have signed an accept seal over it.
    ///
    /// Seals are signed before anchoring, so `issued_at`, `expires_at` and
    /// `anchor_id` are tied to the challenge only through the unkeyed
    /// verification id.  That catches edits to a single field, not a holder
    /// who rewrites the window and rederives the id; treat the ledger
    /// record as the authority on whether a proof is still in force.
    ///
    /// Returns the number of valid seals.
    pub fn audit(
        &self,
        registry: &VerifierRegistry,
        quorum_threshold: usize,
    ) -> Result<usize, ProofCheckError> {
        if self.schema != SCHEMA_PROOF {
            return Err(ProofCheckError::Schema(self.schema.clone()));
        }
        if self.recompute_challenge_hash() != self.challenge_hash {
            return Err(ProofCheckError::ChallengeMismatch);
        }
        if self.recompute_verification_id() != self.verification_id {
            return Err(ProofCheckError::IdentityMismatch);
        }
        let mut signers = HashSet::new();
        for seal in &self.seals {
            if !seal.is_accept() || seal.challenge_hash != self.challenge_hash {
                continue;
            }
            let Some(key) = registry.get(&seal.node_id) else {
                continue;
            };
            if seal.verify(key).is_ok() {
                signers.insert(seal.node_id.as_str());
            }
        }
        if signers.len() < quorum_threshold {
            return Err(ProofCheckError::InsufficientSeals {
                valid: signers.len(),
                required: quorum_threshold,
            });
        }
        Ok(signers.len())
    }

    /// Serialises the proof to JSON text.
    pub fn to_json_string(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Deserialises a proof from JSON text.
    pub fn from_json_str(input: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(input)
    }
}

/// Derives the verification id from the certified work, the challenge the
/// seals signed, the anchor id and the validity window.
pub fn verification_id(
    work: &Work,
    challenge_hash: &ChallengeHash,
    anchor_id: &AnchorId,
    issued_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
) -> String {
    derive_id(&work.content_hash, challenge_hash, anchor_id, issued_at, expires_at)
}

fn derive_id(
    work_hash: &WorkHash,
    challenge_hash: &ChallengeHash,
    anchor_id: &AnchorId,
    issued_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
) -> String {
    let mut hasher = Blake2b256::new();
    hasher.update(VERIFICATION_DOMAIN);
    hasher.update((work_hash.as_str().len() as u64).to_be_bytes());
    hasher.update(work_hash.as_str().as_bytes());
    hasher.update(challenge_hash.as_bytes());
    hasher.update((anchor_id.0.len() as u64).to_be_bytes());
    hasher.update(anchor_id.0.as_bytes());
    for instant in [issued_at, expires_at] {
        hasher.update(instant.timestamp().to_be_bytes());
        hasher.update(instant.timestamp_subsec_nanos().to_be_bytes());
    }
    hex::encode(hasher.finalize())
}
