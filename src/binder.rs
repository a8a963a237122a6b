//! Commitment binding.
//!
//! [`CommitmentBinder::bind`] validates the fingerprint, draws a fresh
//! 32-byte nonce, and asks the external [`ZkProver`] for the commitment.
//! The nonce and a session id derived from it travel with the commitment so
//! that every verifier node (and the challenge hash) pins the exact same
//! commitment without re-deriving it.

use crate::{
    error::{BindingError, ProofGenError},
    work::{Fingerprint, WorkHash},
};
use async_trait::async_trait;
use blake2::digest::{consts::U32, Digest};
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use std::{sync::Arc, time::Duration};
use tracing::debug;

type Blake2b256 = blake2::Blake2b<U32>;

const SESSION_DOMAIN: &[u8] = b"ORIGINSEAL_SESSION";
const COMMIT_DOMAIN: &[u8] = b"ORIGINSEAL_COMMIT";

/// Length of the hiding nonce attached to every commitment.
pub const NONCE_LEN: usize = 32;

/// External `prove(work_hash, fingerprint, nonce) -> commitment` oracle.
#[async_trait]
pub trait ZkProver: Send + Sync {
    /// Produces the opaque commitment bytes.
    async fn prove(
        &self,
        work_hash: &WorkHash,
        fingerprint: &Fingerprint,
        nonce: &[u8],
    ) -> Result<Vec<u8>, ProofGenError>;
}

/// Opaque commitment plus the metadata needed to compare it across nodes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commitment {
    /// Commitment bytes returned by the prover.
    #[serde(with = "hex::serde")]
    pub bytes: Vec<u8>,
    /// Hiding nonce supplied to the prover.
    #[serde(with = "hex::serde")]
    pub nonce: Vec<u8>,
    /// Session id derived from the nonce.
    pub session_id: String,
}

impl Commitment {
    /// Wraps prover output with its nonce and derived session id.
    pub fn new(bytes: Vec<u8>, nonce: Vec<u8>) -> Self {
        let session_id = session_id_for(&nonce);
        Self {
            bytes,
            nonce,
            session_id,
        }
    }

    /// Returns true when the nonce has the expected length, the bytes are
    /// non-empty, and the session id matches the nonce.
    pub fn is_well_formed(&self) -> bool {
        !self.bytes.is_empty()
            && self.nonce.len() == NONCE_LEN
            && self.session_id == session_id_for(&self.nonce)
    }

    /// Hex encoding of the commitment bytes.
    pub fn to_hex(&self) -> String {
        hex::encode(&self.bytes)
    }
}

/// Session id tagging a commitment: first 16 bytes of a domain-separated
/// BLAKE2b-256 digest of the nonce, hex-encoded.
pub fn session_id_for(nonce: &[u8]) -> String {
    let mut hasher = Blake2b256::new();
    hasher.update(SESSION_DOMAIN);
    hasher.update(nonce);
    hex::encode(&hasher.finalize()[..16])
}

/// Reference prover: a hiding hash commitment
/// `BLAKE2b-256(domain || work_hash || fingerprint || nonce)`.
///
/// It stands in for a real circuit where none is wired up and rejects
/// fingerprints with non-finite components.
#[derive(Debug, Clone, Copy, Default)]
pub struct HashCommitProver;

#[async_trait]
impl ZkProver for HashCommitProver {
    async fn prove(
        &self,
        work_hash: &WorkHash,
        fingerprint: &Fingerprint,
        nonce: &[u8],
    ) -> Result<Vec<u8>, ProofGenError> {
        if fingerprint.values().iter().any(|v| !v.is_finite()) {
            return Err(ProofGenError::Rejected(
                "fingerprint has non-finite components".to_string(),
            ));
        }
        let mut hasher = Blake2b256::new();
        hasher.update(COMMIT_DOMAIN);
        hasher.update(work_hash.as_str().as_bytes());
        hasher.update(fingerprint.digest());
        hasher.update(nonce);
        Ok(hasher.finalize().to_vec())
    }
}

/// Stateless wrapper around the prover enforcing fingerprint shape and a deadline.
#[derive(Clone)]
pub struct CommitmentBinder {
    prover: Arc<dyn ZkProver>,
    dimension: usize,
    timeout: Duration,
}

impl CommitmentBinder {
    /// Creates a binder for fingerprints of `dimension` components.
    pub fn new(prover: Arc<dyn ZkProver>, dimension: usize, timeout: Duration) -> Self {
        Self {
            prover,
            dimension,
            timeout,
        }
    }

    /// Binds `work_hash` and `fingerprint` into a fresh commitment.
    pub async fn bind(
        &self,
        work_hash: &WorkHash,
        fingerprint: &Fingerprint,
    ) -> Result<Commitment, BindingError> {
        if fingerprint.dimension() != self.dimension {
            return Err(BindingError::DimensionMismatch {
                expected: self.dimension,
                found: fingerprint.dimension(),
            });
        }
        if let Some(index) = fingerprint.values().iter().position(|v| !v.is_finite()) {
            return Err(BindingError::NonFinite { index });
        }
        let mut nonce = vec![0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);
        let bytes = tokio::time::timeout(
            self.timeout,
            self.prover.prove(work_hash, fingerprint, &nonce),
        )
        .await
        .map_err(|_| BindingError::Timeout(self.timeout))??;
        let commitment = Commitment::new(bytes, nonce);
        debug!(
            work_hash = %work_hash,
            session = %commitment.session_id,
            "commitment bound"
        );
        Ok(commitment)
    }
}
