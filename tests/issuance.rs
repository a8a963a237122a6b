use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use ed25519_dalek::SigningKey;
use origin_seal::{
    keys::signing_key_from_seed, local_cluster, AnchorId, CertificationIndex, Challenge,
    ChallengeHash, Commitment, ConsensusEngine, ConsensusError, Fingerprint,
    FingerprintExtractor, HashChainAnchor, HashCommitProver, HistogramExtractor, LedgerError,
    NodeError, ProofLedger, ProofOrchestrator, ProofStatus, Seal, SealConfig, VerificationError,
    VerificationProof, VerifierNode, VerifierRegistry, Vote, Work, WorkMetadata,
};
use std::{sync::Arc, time::Duration};
use tokio::time::Instant;

#[derive(Clone, Copy)]
enum Script {
    Accept,
    Reject,
    Silent,
    BadSignature,
    WrongChallenge,
}

struct ScriptedNode {
    id: String,
    key: SigningKey,
    script: Script,
}

#[async_trait]
impl VerifierNode for ScriptedNode {
    fn node_id(&self) -> &str {
        &self.id
    }

    async fn evaluate(&self, challenge: &Challenge) -> Result<Seal, NodeError> {
        let hash = challenge.challenge_hash();
        let now = Utc::now();
        match self.script {
            Script::Accept => Ok(Seal::sign(self.id.clone(), hash, Vote::Accept, &self.key, now)),
            Script::Reject => Ok(Seal::sign(self.id.clone(), hash, Vote::Reject, &self.key, now)),
            Script::Silent => std::future::pending().await,
            Script::BadSignature => {
                let mut seal = Seal::sign(self.id.clone(), hash, Vote::Accept, &self.key, now);
                let other = SigningKey::from_bytes(&[9u8; 32]);
                seal.signature = Seal::sign(self.id.clone(), hash, Vote::Accept, &other, now).signature;
                Ok(seal)
            }
            Script::WrongChallenge => Ok(Seal::sign(
                self.id.clone(),
                ChallengeHash([0xAB; 32]),
                Vote::Accept,
                &self.key,
                now,
            )),
        }
    }
}

struct Harness {
    orchestrator: ProofOrchestrator,
    engine: Arc<ConsensusEngine>,
    registry: VerifierRegistry,
}

fn harness(scripts: &[Script]) -> Harness {
    let mut registry = VerifierRegistry::new();
    let nodes: Vec<Arc<dyn VerifierNode>> = scripts
        .iter()
        .enumerate()
        .map(|(idx, script)| {
            let id = format!("verifier-{idx}");
            let key = signing_key_from_seed(&id);
            registry.insert(id.clone(), key.verifying_key());
            Arc::new(ScriptedNode {
                id,
                key,
                script: *script,
            }) as Arc<dyn VerifierNode>
        })
        .collect();
    build(nodes, registry, SealConfig::default())
}

fn build(
    nodes: Vec<Arc<dyn VerifierNode>>,
    registry: VerifierRegistry,
    config: SealConfig,
) -> Harness {
    let engine = Arc::new(ConsensusEngine::new(
        nodes,
        Arc::new(registry.clone()),
        config.consensus_timeout(),
    ));
    let orchestrator = ProofOrchestrator::new(
        config,
        Arc::new(HashCommitProver),
        engine.clone(),
        Arc::new(HashChainAnchor::new()),
        Arc::new(ProofLedger::new()),
    );
    Harness {
        orchestrator,
        engine,
        registry,
    }
}

fn submission(content: &[u8]) -> (Work, Fingerprint) {
    let work = Work::ingest(
        "W1",
        "creator-1",
        Utc::now(),
        WorkMetadata {
            title: "Field notes".into(),
            ..WorkMetadata::default()
        },
        content,
    );
    let fingerprint = HistogramExtractor::new(64).extract(content).unwrap();
    (work, fingerprint)
}

#[tokio::test(start_paused = true)]
async fn three_accepts_and_two_silent_nodes_issue_a_proof() {
    use Script::*;
    let h = harness(&[Accept, Silent, Accept, Silent, Accept]);
    let (work, fp) = submission(b"three of five is enough");
    let proof = h.orchestrator.verify_originality(&work, &fp).await.unwrap();

    assert_eq!(proof.seals.len(), 3);
    assert!(proof.seals.iter().all(|seal| seal.vote == Vote::Accept));
    assert_eq!(proof.audit(&h.registry, 3), Ok(3));
    assert_eq!(h.orchestrator.lookup(&work.content_hash).unwrap(), proof);
    assert_eq!(h.engine.in_flight(), 0);
}

#[tokio::test(start_paused = true)]
async fn issued_proof_survives_the_wire_format() {
    use Script::*;
    let h = harness(&[Accept, Accept, Accept, Accept, Accept]);
    let (work, fp) = submission(b"serialised and back");
    let proof = h.orchestrator.verify_originality(&work, &fp).await.unwrap();

    let json = proof.to_json_string().unwrap();
    let parsed = VerificationProof::from_json_str(&json).unwrap();
    assert_eq!(parsed, proof);
    assert_eq!(parsed.verification_id, proof.verification_id);
    assert_eq!(parsed.anchor_id, proof.anchor_id);
    assert_eq!(parsed.audit(&h.registry, 3), Ok(3));
}

#[tokio::test(start_paused = true)]
async fn three_rejects_fail_fast() {
    use Script::*;
    let h = harness(&[Reject, Silent, Reject, Silent, Reject]);
    let (work, fp) = submission(b"not original");
    let started = Instant::now();
    let err = h.orchestrator.verify_originality(&work, &fp).await.unwrap_err();

    assert!(matches!(
        err,
        VerificationError::Consensus(ConsensusError::QuorumRejected { rejects: 3, limit: 3 })
    ));
    assert!(started.elapsed() < h.orchestrator.config().consensus_timeout());
    assert!(h.orchestrator.ledger().is_empty());
}

#[tokio::test(start_paused = true)]
async fn garbage_seals_do_not_move_the_outcome() {
    use Script::*;
    let h = harness(&[BadSignature, Accept, WrongChallenge, Accept, Accept]);
    let (work, fp) = submission(b"adversarial neighbours");
    let proof = h.orchestrator.verify_originality(&work, &fp).await.unwrap();
    let signers: Vec<_> = proof.seals.iter().map(|s| s.node_id.as_str()).collect();
    assert_eq!(signers.len(), 3);
    assert!(!signers.contains(&"verifier-0"));
    assert!(!signers.contains(&"verifier-2"));

    let h = harness(&[BadSignature, Accept, WrongChallenge, Accept, Silent]);
    let (work, fp) = submission(b"two honest votes only");
    let err = h.orchestrator.verify_originality(&work, &fp).await.unwrap_err();
    match err {
        VerificationError::Consensus(ConsensusError::QuorumTimeout {
            accepts, rejects, ..
        }) => {
            assert_eq!(accepts, 2);
            assert_eq!(rejects, 0);
        }
        other => panic!("unexpected outcome: {other}"),
    }
    assert!(h.orchestrator.ledger().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_duplicate_submission_yields_one_proof() {
    let ledger = Arc::new(ProofLedger::new());
    let index: Arc<dyn CertificationIndex> = ledger.clone();
    let config = SealConfig::default();
    let cluster = local_cluster("race", config.total_nodes, Some(index), 0.0);
    let engine = Arc::new(ConsensusEngine::new(
        cluster.nodes,
        Arc::new(cluster.registry),
        config.consensus_timeout(),
    ));
    let orchestrator = Arc::new(ProofOrchestrator::new(
        config,
        Arc::new(HashCommitProver),
        engine,
        Arc::new(HashChainAnchor::new()),
        ledger.clone(),
    ));
    let (work, fp) = submission(b"submitted twice at once");

    let tasks: Vec<_> = (0..2)
        .map(|_| {
            let orchestrator = orchestrator.clone();
            let work = work.clone();
            let fp = fp.clone();
            tokio::spawn(async move { orchestrator.verify_originality(&work, &fp).await })
        })
        .collect();
    let mut proofs = 0;
    let mut duplicates = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(_) => proofs += 1,
            Err(err) if err.is_duplicate() => duplicates += 1,
            Err(err) => panic!("unexpected error: {err}"),
        }
    }
    assert_eq!((proofs, duplicates), (1, 1));
    let history = ledger.history(&work.content_hash);
    assert_eq!(history.len(), 1);
    assert!(history[0].is_active());
}

#[tokio::test(start_paused = true)]
async fn expired_proof_is_replaced_by_fresh_verification() {
    use Script::*;
    let h = harness(&[Accept, Accept, Accept, Accept, Accept]);
    let (work, fp) = submission(b"certified long ago");

    let issued = Utc::now() - ChronoDuration::days(800);
    let stale_challenge = Challenge::new(
        work.content_hash.clone(),
        Commitment::new(vec![1; 32], vec![2; 32]),
        work.creator.clone(),
        70.0,
        issued,
    );
    let stale = VerificationProof::issue(
        &work,
        &stale_challenge,
        Vec::new(),
        AnchorId("00".repeat(32)),
        issued,
        issued + ChronoDuration::days(365),
    );
    let ledger = h.orchestrator.ledger();
    ledger.register_at(&work.content_hash, stale, issued).unwrap();

    assert!(matches!(
        h.orchestrator.lookup(&work.content_hash),
        Err(LedgerError::NotFound(_))
    ));
    let fresh = h.orchestrator.verify_originality(&work, &fp).await.unwrap();
    assert!(fresh.expires_at > Utc::now());

    let history = ledger.history(&work.content_hash);
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].status, ProofStatus::Expired);
    assert_eq!(history[1].proof, fresh);
}

#[tokio::test(start_paused = true)]
async fn cancellation_discards_the_round() {
    use Script::*;
    let h = harness(&[Accept, Accept, Silent, Silent, Silent]);
    let (work, fp) = submission(b"caller gives up");
    let err = h
        .orchestrator
        .verify_originality_until(&work, &fp, tokio::time::sleep(Duration::from_millis(100)))
        .await
        .unwrap_err();

    assert!(matches!(err, VerificationError::Cancelled));
    assert_eq!(h.engine.in_flight(), 0);
    assert!(h.orchestrator.ledger().is_empty());
}
