#![deny(missing_docs)]

//! # origin_seal
//!
//! **origin_seal** issues verifiable proofs that a digital work is original.
//! A proof combines a content fingerprint, a hiding commitment to that
//! fingerprint, and signed agreement from a quorum of pre-provisioned
//! verifier nodes.  Every proof carries a validity window and a unique
//! identifier, so downstream consumers can check authenticity offline
//! without re-running verification.
//!
//! ## Pipeline
//!
//! * **Commitment binding**: the [`binder`](binder/index.html) module wraps a
//!   work hash and fingerprint into a [`Commitment`] through an external
//!   [`ZkProver`], tagging it with a nonce and session id.
//! * **Quorum consensus**: the [`consensus`](consensus/index.html) module
//!   broadcasts a [`Challenge`] to the verifier set, counts only correctly
//!   signed, matching [`Seal`]s, and decides success, rejection or timeout.
//! * **Proof ledger**: the [`ledger`](ledger/index.html) module enforces at
//!   most one active proof per work, with expiry and revocation.
//! * **Orchestration**: [`ProofOrchestrator`] sequences score, bind,
//!   consensus, anchor and register into one issuance flow.
//!
//! Reference collaborators ([`HistogramExtractor`], [`FingerprintSignals`],
//! [`HashCommitProver`], [`HashChainAnchor`], [`LocalVerifier`]) make the
//! whole flow runnable in process.
//!
//! ## Usage
//!
//! ```rust
//! use origin_seal::{
//!     local_cluster, CertificationIndex, ConsensusEngine, HashChainAnchor, HashCommitProver,
//!     ProofLedger, ProofOrchestrator, SealConfig, Work, WorkMetadata,
//! };
//! use std::sync::Arc;
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let config = SealConfig::default();
//! let ledger = Arc::new(ProofLedger::new());
//! let index: Arc<dyn CertificationIndex> = ledger.clone();
//! let cluster = local_cluster("node", config.total_nodes, Some(index), 0.0);
//! let engine = ConsensusEngine::new(
//!     cluster.nodes,
//!     Arc::new(cluster.registry.clone()),
//!     config.consensus_timeout(),
//! );
//! let orchestrator = ProofOrchestrator::new(
//!     config,
//!     Arc::new(HashCommitProver),
//!     Arc::new(engine),
//!     Arc::new(HashChainAnchor::new()),
//!     ledger,
//! );
//!
//! let content = b"an entirely original haiku";
//! let work = Work::ingest("haiku-1", "alice", chrono::Utc::now(), WorkMetadata::default(), content);
//! let proof = orchestrator.certify_content(&work, content).await.unwrap();
//! assert_eq!(proof.audit(&cluster.registry, 3).unwrap(), 3);
//! assert!(orchestrator.certify_content(&work, content).await.unwrap_err().is_duplicate());
//! # });
//! ```

pub mod anchor;
pub mod binder;
pub mod challenge;
pub mod config;
pub mod consensus;
pub mod error;
pub mod extract;
pub mod keys;
pub mod ledger;
pub mod node;
pub mod orchestrator;
pub mod proof;
pub mod scoring;
pub mod seal;
pub mod work;

pub use anchor::{AnchorId, AnchorRecord, AnchorService, HashChainAnchor};
pub use binder::{Commitment, CommitmentBinder, HashCommitProver, ZkProver};
pub use challenge::{Challenge, ChallengeHash};
pub use config::SealConfig;
pub use consensus::{ConsensusEngine, QuorumParams};
pub use error::{
    AnchorError, BindingError, ConfigError, ConsensusError, DuplicateError, ExtractionError,
    LedgerError, NodeError, ProofCheckError, ProofGenError, VerificationError,
};
pub use extract::{FingerprintExtractor, HistogramExtractor};
pub use keys::{KeyError, KeySource, RegistryError, VerifierRegistry};
pub use ledger::{LedgerRecord, ProofLedger, ProofStatus};
pub use node::{local_cluster, CertificationIndex, LocalCluster, LocalVerifier, VerifierNode};
pub use orchestrator::ProofOrchestrator;
pub use proof::{VerificationProof, SCHEMA_PROOF};
pub use scoring::{entropy_score, FingerprintSignals, OriginScorer, SignalSet, WeightedScorer};
pub use seal::{Seal, Vote};
pub use work::{Fingerprint, Work, WorkHash, WorkMetadata};
