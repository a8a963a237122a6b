//! Issuance pipeline: score, bind, reach consensus, anchor, register.
//!
//! The ledger is the only durable side effect and [`ProofLedger::register`]
//! is the single commit point: a failure or cancellation anywhere before it
//! leaves no trace in the ledger.

use crate::{
    anchor::AnchorService,
    binder::{CommitmentBinder, ZkProver},
    challenge::Challenge,
    config::SealConfig,
    consensus::ConsensusEngine,
    error::{AnchorError, DuplicateError, LedgerError, VerificationError},
    extract::{FingerprintExtractor, HistogramExtractor},
    ledger::ProofLedger,
    proof::VerificationProof,
    scoring::{clamp_score, FingerprintSignals, OriginScorer, WeightedScorer},
    work::{Fingerprint, Work, WorkHash},
};
use chrono::{DateTime, Months, Utc};
use std::{future::Future, sync::Arc};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

/// Sequences the issuance flow and exposes the public API.
pub struct ProofOrchestrator {
    config: SealConfig,
    scorer: Arc<dyn OriginScorer>,
    extractor: Arc<dyn FingerprintExtractor>,
    binder: CommitmentBinder,
    consensus: Arc<ConsensusEngine>,
    anchor: Arc<dyn AnchorService>,
    ledger: Arc<ProofLedger>,
}

impl ProofOrchestrator {
    /// Wires the pipeline with the fingerprint-statistics scorer and a
    /// histogram extractor sized to `config.fingerprint_dimension`.
    pub fn new(
        config: SealConfig,
        prover: Arc<dyn ZkProver>,
        consensus: Arc<ConsensusEngine>,
        anchor: Arc<dyn AnchorService>,
        ledger: Arc<ProofLedger>,
    ) -> Self {
        let binder = CommitmentBinder::new(
            prover,
            config.fingerprint_dimension,
            config.binding_timeout(),
        );
        Self {
            scorer: Arc::new(WeightedScorer::new(FingerprintSignals)),
            extractor: Arc::new(HistogramExtractor::new(config.fingerprint_dimension)),
            binder,
            consensus,
            anchor,
            ledger,
            config,
        }
    }

    /// Replaces the scoring function.
    pub fn with_scorer(mut self, scorer: Arc<dyn OriginScorer>) -> Self {
        self.scorer = scorer;
        self
    }

    /// Replaces the fingerprint extractor used by [`certify_content`](Self::certify_content).
    pub fn with_extractor(mut self, extractor: Arc<dyn FingerprintExtractor>) -> Self {
        self.extractor = extractor;
        self
    }

    /// Active configuration.
    pub fn config(&self) -> &SealConfig {
        &self.config
    }

    /// Shared proof ledger.
    pub fn ledger(&self) -> &Arc<ProofLedger> {
        &self.ledger
    }

    /// Issues a proof for `work`, honouring the configured request deadline.
    pub async fn verify_originality(
        &self,
        work: &Work,
        fingerprint: &Fingerprint,
    ) -> Result<VerificationProof, VerificationError> {
        match self.config.request_timeout() {
            Some(limit) => tokio::time::timeout(limit, self.issue(work, fingerprint))
                .await
                .map_err(|_| {
                    warn!(work_hash = %work.content_hash, ?limit, "verification deadline exceeded");
                    VerificationError::DeadlineExceeded(limit)
                })?,
            None => self.issue(work, fingerprint).await,
        }
    }

    /// [`verify_originality`](Self::verify_originality) that aborts as soon
    /// as `cancel` resolves.  Aborting drops the pending node calls and
    /// external requests; nothing is registered.
    pub async fn verify_originality_until<C>(
        &self,
        work: &Work,
        fingerprint: &Fingerprint,
        cancel: C,
    ) -> Result<VerificationProof, VerificationError>
    where
        C: Future<Output = ()>,
    {
        tokio::select! {
            biased;
            _ = cancel => {
                warn!(work_hash = %work.content_hash, "verification cancelled");
                Err(VerificationError::Cancelled)
            }
            result = self.verify_originality(work, fingerprint) => result,
        }
    }

    /// Extracts the fingerprint from raw `content` and verifies the work.
    pub async fn certify_content(
        &self,
        work: &Work,
        content: &[u8],
    ) -> Result<VerificationProof, VerificationError> {
        let fingerprint = self.extractor.extract(content)?;
        self.verify_originality(work, &fingerprint).await
    }

    #[instrument(
        name = "verify_originality",
        skip_all,
        fields(work = %work.id, work_hash = %work.content_hash)
    )]
    async fn issue(
        &self,
        work: &Work,
        fingerprint: &Fingerprint,
    ) -> Result<VerificationProof, VerificationError> {
        self.ensure_uncertified(&work.content_hash)?;

        let score = clamp_score(self.scorer.score(fingerprint, &work.metadata));
        debug!(score, "origin score computed");

        let commitment = self.binder.bind(&work.content_hash, fingerprint).await?;
        let challenge = Challenge::new(
            work.content_hash.clone(),
            commitment,
            work.creator.clone(),
            score,
            Utc::now(),
        );

        let seals = match self
            .consensus
            .reach_consensus(&challenge, self.config.quorum())
            .await
        {
            Ok(seals) => seals,
            Err(err) => {
                // Verifiers reject works certified by a concurrent request.
                self.ensure_uncertified(&work.content_hash)?;
                return Err(err.into());
            }
        };

        let anchor_timeout = self.config.anchor_timeout();
        let anchor_id = tokio::time::timeout(
            anchor_timeout,
            self.anchor.anchor(&challenge.work_hash, &challenge.commitment),
        )
        .await
        .map_err(|_| AnchorError::Timeout(anchor_timeout))??;

        let issued_at = Utc::now();
        let proof = VerificationProof::issue(
            work,
            &challenge,
            seals,
            anchor_id,
            issued_at,
            self.expiry_for(issued_at),
        );
        let proof = self.ledger.register(&work.content_hash, proof)?;
        info!(
            verification_id = %proof.verification_id,
            seals = proof.seals.len(),
            anchor = %proof.anchor_id,
            score = proof.origin_score,
            "originality proof issued"
        );
        Ok(proof)
    }

    fn ensure_uncertified(&self, work_hash: &WorkHash) -> Result<(), DuplicateError> {
        match self.ledger.lookup(work_hash) {
            Ok(existing) => {
                debug!(existing = %existing.verification_id, "work already certified");
                Err(DuplicateError {
                    work_hash: work_hash.to_string(),
                    verification_id: existing.verification_id,
                })
            }
            Err(_) => Ok(()),
        }
    }

    fn expiry_for(&self, issued_at: DateTime<Utc>) -> DateTime<Utc> {
        issued_at
            .checked_add_months(Months::new(self.config.proof_validity_months))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Active proof for `work_hash`.
    pub fn lookup(&self, work_hash: &WorkHash) -> Result<VerificationProof, LedgerError> {
        self.ledger.lookup(work_hash)
    }

    /// Revokes the proof with `verification_id`.
    pub fn revoke(
        &self,
        verification_id: &str,
        reason: &str,
    ) -> Result<VerificationProof, LedgerError> {
        self.ledger.revoke(verification_id, reason)
    }

    /// Marks proofs expired as of `now`.
    pub fn expire_sweep(&self, now: DateTime<Utc>) -> usize {
        self.ledger.expire_sweep(now)
    }

    /// Starts the periodic expiry sweep at the configured interval.
    pub fn spawn_sweeper(&self) -> JoinHandle<()> {
        self.ledger.clone().spawn_sweeper(self.config.sweep_interval())
    }
}
