//! Error taxonomy for the issuance pipeline.
//!
//! Collaborator failures (extraction, binding, anchoring) keep their own
//! types and are surfaced unchanged through [`VerificationError`].  The
//! duplicate outcome is modelled separately so callers can tell "already
//! verified" apart from infrastructure trouble.

use std::time::Duration;
use thiserror::Error;

/// Failure reported by a fingerprint extractor.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExtractionError {
    #[error("content is empty")]
    /// Nothing to fingerprint.
    Empty,
    #[error("malformed content: {0}")]
    /// Content could not be decoded by the extractor.
    Malformed(String),
}

/// Failure reported by the external zero-knowledge prover.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProofGenError {
    #[error("prover rejected input: {0}")]
    /// The prover refused the (work hash, fingerprint) pair.
    Rejected(String),
    #[error("prover unavailable: {0}")]
    /// The prover could not be reached.
    Unavailable(String),
}

/// Commitment construction failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BindingError {
    #[error("fingerprint has {found} dimensions, expected {expected}")]
    /// Fingerprint length does not match the configured dimension.
    DimensionMismatch {
        /// Configured fingerprint dimension.
        expected: usize,
        /// Dimension of the submitted fingerprint.
        found: usize,
    },
    #[error("fingerprint component {index} is not finite")]
    /// A fingerprint component was NaN or infinite.
    NonFinite {
        /// Offending component index.
        index: usize,
    },
    #[error(transparent)]
    /// The prover itself failed.
    Prover(#[from] ProofGenError),
    #[error("prover timed out after {0:?}")]
    /// The prover did not answer within the binding deadline.
    Timeout(Duration),
}

/// Quorum could not be established for a challenge.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConsensusError {
    #[error(
        "quorum timeout: {accepts} accepts, {rejects} rejects from {responded} responses (required {required})"
    )]
    /// Neither threshold was reached before `T_consensus` elapsed.
    QuorumTimeout {
        /// Valid accept seals collected.
        accepts: usize,
        /// Valid reject seals collected.
        rejects: usize,
        /// Nodes that answered at all (valid or not).
        responded: usize,
        /// Accept seals that were required.
        required: usize,
    },
    #[error("quorum rejected: {rejects} reject seals reached the limit of {limit}")]
    /// Enough valid reject seals arrived to make quorum unreachable.
    QuorumRejected {
        /// Valid reject seals collected.
        rejects: usize,
        /// Reject count that makes success impossible.
        limit: usize,
    },
    #[error("invalid quorum parameters: threshold {threshold} of {total} nodes")]
    /// `quorum_threshold` was zero or exceeded `total_nodes`.
    InvalidQuorum {
        /// Requested quorum threshold.
        threshold: usize,
        /// Requested node count.
        total: usize,
    },
    #[error("round needs {requested} nodes but only {available} are configured")]
    /// The engine knows fewer verifier nodes than the round requires.
    InsufficientNodes {
        /// Requested node count.
        requested: usize,
        /// Nodes known to the engine.
        available: usize,
    },
}

/// Transport-level failure while asking a verifier node for its seal.
///
/// The consensus engine treats these as abstentions.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NodeError {
    #[error("node unreachable: {0}")]
    /// The node could not be contacted.
    Unreachable(String),
    #[error("malformed node response: {0}")]
    /// The node answered with something that is not a seal.
    Malformed(String),
}

/// Failure reported by the anchoring service.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AnchorError {
    #[error("anchor service unavailable: {0}")]
    /// The anchoring medium could not be reached.
    Unavailable(String),
    #[error("anchor rejected: {0}")]
    /// The anchoring medium refused the record.
    Rejected(String),
    #[error("anchoring timed out after {0:?}")]
    /// The anchoring call exceeded its deadline.
    Timeout(Duration),
    #[error("anchor journal corrupt at record {index}: {reason}")]
    /// An existing journal failed to parse or its chain does not verify.
    CorruptJournal {
        /// Position of the first bad record.
        index: u64,
        /// What was wrong with it.
        reason: String,
    },
}

/// An active proof already exists for the work.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("work {work_hash} already has active proof {verification_id}")]
pub struct DuplicateError {
    /// Work hash that is already certified.
    pub work_hash: String,
    /// Verification id of the active proof.
    pub verification_id: String,
}

/// Ledger queries and persistence failures.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("no active proof for work {0}")]
    /// Lookup found no active proof.
    NotFound(String),
    #[error("no proof with verification id {0}")]
    /// Revocation target is unknown.
    RevocationNotFound(String),
    #[error("ledger I/O error: {0}")]
    /// Snapshot read or write failed.
    Io(#[from] std::io::Error),
    #[error("ledger codec error: {0}")]
    /// Snapshot JSON could not be encoded or decoded.
    Codec(#[from] serde_json::Error),
    #[error("unexpected ledger schema: {0}")]
    /// Snapshot carried an unknown schema tag.
    Schema(String),
}

/// Offline audit of an issued proof failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProofCheckError {
    #[error("unexpected proof schema: {0}")]
    /// The proof carried an unknown schema tag.
    Schema(String),
    #[error("challenge hash does not match the proof contents")]
    /// The recomputed challenge hash differs from the recorded one.
    ChallengeMismatch,
    #[error("verification id does not match the proof's anchor or validity window")]
    /// The recomputed verification id differs from the recorded one.
    IdentityMismatch,
    #[error("only {valid} valid accept seals, {required} required")]
    /// Not enough seals survived verification.
    InsufficientSeals {
        /// Distinct accept seals that verified.
        valid: usize,
        /// Seals required by the caller.
        required: usize,
    },
}

/// Configuration could not be loaded or is inconsistent.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config I/O error: {0}")]
    /// Reading the config file failed.
    Io(#[from] std::io::Error),
    #[error("config parse error: {0}")]
    /// The config file is not valid JSON for [`crate::SealConfig`].
    Parse(#[from] serde_json::Error),
    #[error("invalid value for {name}: {value}")]
    /// An environment override could not be parsed.
    Env {
        /// Environment variable name.
        name: &'static str,
        /// Raw value that failed to parse.
        value: String,
    },
    #[error("invalid config: {0}")]
    /// Values are individually valid but inconsistent.
    Invalid(String),
}

/// Everything `verify_originality` can report.
#[derive(Debug, Error)]
pub enum VerificationError {
    #[error(transparent)]
    /// Fingerprint extraction failed.
    Extraction(#[from] ExtractionError),
    #[error(transparent)]
    /// Commitment binding failed.
    Binding(#[from] BindingError),
    #[error(transparent)]
    /// Verifier nodes did not certify the challenge.
    Consensus(#[from] ConsensusError),
    #[error(transparent)]
    /// Anchoring failed.
    Anchor(#[from] AnchorError),
    #[error(transparent)]
    /// The work is already verified.
    Duplicate(#[from] DuplicateError),
    #[error("verification cancelled by caller")]
    /// The caller's cancellation signal fired.
    Cancelled,
    #[error("verification exceeded deadline of {0:?}")]
    /// The request-level deadline elapsed.
    DeadlineExceeded(Duration),
}

impl VerificationError {
    /// Returns true for the expected "already verified" outcome.
    pub fn is_duplicate(&self) -> bool {
        matches!(self, Self::Duplicate(_))
    }

    /// Returns true when the failure stems from a collaborator or the
    /// verifier network rather than from the submission itself.
    pub fn is_infrastructure(&self) -> bool {
        match self {
            Self::Binding(BindingError::Prover(ProofGenError::Unavailable(_)))
            | Self::Binding(BindingError::Timeout(_))
            | Self::Anchor(_)
            | Self::DeadlineExceeded(_) => true,
            Self::Consensus(err) => matches!(
                err,
                ConsensusError::QuorumTimeout { .. } | ConsensusError::InsufficientNodes { .. }
            ),
            _ => false,
        }
    }
}
