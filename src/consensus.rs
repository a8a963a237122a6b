//! Quorum consensus over a fixed, pre-provisioned verifier set.
//!
//! A round broadcasts the challenge to the selected nodes concurrently and
//! folds their seals into a tally as they arrive:
//!
//! 1. **Broadcast**: every selected node receives the challenge at once.
//! 2. **Collect**: responses are consumed until the round deadline
//!    (`T_consensus`).  Silent nodes abstain; transport errors abstain.
//! 3. **Decide**: once `quorum_threshold` valid accept seals are counted the
//!    round succeeds with exactly those seals.  Once
//!    `total_nodes - quorum_threshold + 1` valid reject seals are counted
//!    quorum is unreachable and the round fails immediately.
//! 4. Anything else ends in [`ConsensusError::QuorumTimeout`].
//!
//! A seal only counts when its challenge hash matches, it names a node
//! selected for the round, its signature verifies against that node's
//! provisioned key, and that node has not already been counted.  A
//! misbehaving node therefore influences the outcome by at most its own vote.
//!
//! Concurrent callers presenting the same challenge share one in-flight
//! round keyed by challenge hash.  Rounds are held weakly: when every caller
//! has dropped its future the round (and its partial tally) is gone, and a
//! retry starts from scratch.

use crate::{
    challenge::{Challenge, ChallengeHash},
    error::ConsensusError,
    keys::VerifierRegistry,
    node::VerifierNode,
    seal::{Seal, Vote},
};
use futures::{
    future::{BoxFuture, FutureExt, Shared, WeakShared},
    stream::{FuturesUnordered, StreamExt},
};
use parking_lot::Mutex;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
    time::Duration,
};
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

/// Default accept seals required per round.
pub const DEFAULT_QUORUM_THRESHOLD: usize = 3;
/// Default nodes consulted per round.
pub const DEFAULT_TOTAL_NODES: usize = 5;

type RoundOutcome = Result<Vec<Seal>, ConsensusError>;
type RoundFuture = BoxFuture<'static, RoundOutcome>;

/// Quorum rule for one round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuorumParams {
    /// Accept seals required for success.
    pub quorum_threshold: usize,
    /// Nodes consulted.
    pub total_nodes: usize,
}

impl Default for QuorumParams {
    fn default() -> Self {
        Self {
            quorum_threshold: DEFAULT_QUORUM_THRESHOLD,
            total_nodes: DEFAULT_TOTAL_NODES,
        }
    }
}

impl QuorumParams {
    /// Creates a quorum rule.
    pub fn new(quorum_threshold: usize, total_nodes: usize) -> Self {
        Self {
            quorum_threshold,
            total_nodes,
        }
    }

    /// Requires `0 < quorum_threshold <= total_nodes`.
    pub fn validate(&self) -> Result<(), ConsensusError> {
        if self.quorum_threshold == 0 || self.quorum_threshold > self.total_nodes {
            return Err(ConsensusError::InvalidQuorum {
                threshold: self.quorum_threshold,
                total: self.total_nodes,
            });
        }
        Ok(())
    }

    /// Reject seals that make quorum unreachable.
    pub fn reject_limit(&self) -> usize {
        self.total_nodes - self.quorum_threshold + 1
    }
}

/// Running count of valid seals for one round.
struct SealTally {
    challenge_hash: ChallengeHash,
    params: QuorumParams,
    counted: HashSet<String>,
    accepts: Vec<Seal>,
    rejects: usize,
    responded: usize,
}

impl SealTally {
    fn new(challenge_hash: ChallengeHash, params: QuorumParams) -> Self {
        Self {
            challenge_hash,
            params,
            counted: HashSet::new(),
            accepts: Vec::new(),
            rejects: 0,
            responded: 0,
        }
    }

    /// Folds one seal in; returns the round outcome once it is decided.
    fn record(
        &mut self,
        responder: &str,
        seal: Seal,
        registry: &VerifierRegistry,
        selected: &HashSet<String>,
    ) -> Option<RoundOutcome> {
        if seal.challenge_hash != self.challenge_hash {
            warn!(responder, claimed = %seal.node_id, "seal references another challenge; discarded");
            return None;
        }
        if !selected.contains(&seal.node_id) {
            warn!(responder, claimed = %seal.node_id, "seal from node outside this round; discarded");
            return None;
        }
        let Some(key) = registry.get(&seal.node_id) else {
            warn!(responder, claimed = %seal.node_id, "seal from unprovisioned node; discarded");
            return None;
        };
        if let Err(err) = seal.verify(key) {
            warn!(responder, claimed = %seal.node_id, error = %err, "seal signature invalid; discarded");
            return None;
        }
        if !self.counted.insert(seal.node_id.clone()) {
            debug!(responder, claimed = %seal.node_id, "node already counted; discarded");
            return None;
        }
        match seal.vote {
            Vote::Accept => {
                self.accepts.push(seal);
                if self.accepts.len() >= self.params.quorum_threshold {
                    return Some(Ok(std::mem::take(&mut self.accepts)));
                }
            }
            Vote::Reject => {
                self.rejects += 1;
                let limit = self.params.reject_limit();
                if self.rejects >= limit {
                    return Some(Err(ConsensusError::QuorumRejected {
                        rejects: self.rejects,
                        limit,
                    }));
                }
            }
        }
        None
    }

    fn timed_out(&self) -> ConsensusError {
        ConsensusError::QuorumTimeout {
            accepts: self.accepts.len(),
            rejects: self.rejects,
            responded: self.responded,
            required: self.params.quorum_threshold,
        }
    }
}

/// Coordinates verifier nodes into quorum decisions.
pub struct ConsensusEngine {
    nodes: Vec<Arc<dyn VerifierNode>>,
    registry: Arc<VerifierRegistry>,
    round_timeout: Duration,
    rounds: Mutex<HashMap<ChallengeHash, WeakShared<RoundFuture>>>,
}

impl ConsensusEngine {
    /// Creates an engine over `nodes`, verifying seals against `registry`.
    pub fn new(
        nodes: Vec<Arc<dyn VerifierNode>>,
        registry: Arc<VerifierRegistry>,
        round_timeout: Duration,
    ) -> Self {
        Self {
            nodes,
            registry,
            round_timeout,
            rounds: Mutex::new(HashMap::new()),
        }
    }

    /// Number of verifier nodes the engine can select from.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Provisioned verifier keys.
    pub fn registry(&self) -> &Arc<VerifierRegistry> {
        &self.registry
    }

    /// Rounds still in flight.
    pub fn in_flight(&self) -> usize {
        self.purge_finished();
        self.rounds.lock().len()
    }

    /// Runs (or joins) the round for `challenge` and returns the counted
    /// accept seals.
    ///
    /// A caller joining an in-flight round for the same challenge shares that
    /// round's outcome, including the parameters it was started with.
    #[instrument(
        skip_all,
        fields(
            challenge = %challenge.challenge_hash(),
            threshold = params.quorum_threshold,
            total = params.total_nodes
        )
    )]
    pub async fn reach_consensus(
        &self,
        challenge: &Challenge,
        params: QuorumParams,
    ) -> Result<Vec<Seal>, ConsensusError> {
        params.validate()?;
        if params.total_nodes > self.nodes.len() {
            return Err(ConsensusError::InsufficientNodes {
                requested: params.total_nodes,
                available: self.nodes.len(),
            });
        }
        let hash = challenge.challenge_hash();
        let round = self.join_or_start(hash, challenge, params);
        let outcome = round.await;
        self.purge_finished();
        match &outcome {
            Ok(seals) => info!(seals = seals.len(), "quorum reached"),
            Err(err) => info!(error = %err, "quorum not reached"),
        }
        outcome
    }

    fn join_or_start(
        &self,
        hash: ChallengeHash,
        challenge: &Challenge,
        params: QuorumParams,
    ) -> Shared<RoundFuture> {
        let mut rounds = self.rounds.lock();
        if let Some(existing) = rounds.get(&hash).and_then(|weak| weak.upgrade()) {
            debug!("joining in-flight round");
            return existing;
        }
        let selected = self.select_nodes(params.total_nodes);
        let round = run_round(
            selected,
            self.registry.clone(),
            Arc::new(challenge.clone()),
            hash,
            params,
            self.round_timeout,
        )
        .boxed()
        .shared();
        if let Some(weak) = round.downgrade() {
            rounds.insert(hash, weak);
        }
        round
    }

    fn select_nodes(&self, total: usize) -> Vec<Arc<dyn VerifierNode>> {
        if total >= self.nodes.len() {
            return self.nodes.clone();
        }
        self.nodes
            .choose_multiple(&mut rand::thread_rng(), total)
            .cloned()
            .collect()
    }

    fn purge_finished(&self) {
        self.rounds
            .lock()
            .retain(|_, weak| weak.upgrade().is_some_and(|round| round.peek().is_none()));
    }
}

async fn run_round(
    nodes: Vec<Arc<dyn VerifierNode>>,
    registry: Arc<VerifierRegistry>,
    challenge: Arc<Challenge>,
    hash: ChallengeHash,
    params: QuorumParams,
    round_timeout: Duration,
) -> RoundOutcome {
    let deadline = Instant::now() + round_timeout;
    let selected: HashSet<String> = nodes.iter().map(|n| n.node_id().to_string()).collect();
    let mut pending: FuturesUnordered<_> = nodes
        .into_iter()
        .map(|node| {
            let challenge = challenge.clone();
            async move {
                let response = node.evaluate(&challenge).await;
                (node.node_id().to_string(), response)
            }
        })
        .collect();
    debug!(nodes = pending.len(), "challenge broadcast");

    let mut tally = SealTally::new(hash, params);
    loop {
        match tokio::time::timeout_at(deadline, pending.next()).await {
            Ok(Some((node_id, Ok(seal)))) => {
                tally.responded += 1;
                if let Some(outcome) = tally.record(&node_id, seal, &registry, &selected) {
                    return outcome;
                }
            }
            Ok(Some((node_id, Err(err)))) => {
                tally.responded += 1;
                warn!(node = %node_id, error = %err, "node failed; counted as abstention");
            }
            Ok(None) => break,
            Err(_) => {
                debug!(outstanding = pending.len(), "round deadline reached");
                break;
            }
        }
    }
    Err(tally.timed_out())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        binder::Commitment, error::NodeError, keys::signing_key_from_seed, work::hash_content,
    };
    use async_trait::async_trait;
    use chrono::Utc;
    use ed25519_dalek::SigningKey;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const ROUND: Duration = Duration::from_secs(5);

    #[derive(Clone)]
    enum Behavior {
        Vote(Vote),
        Delayed(Vote, Duration),
        Silent,
        Fail,
        BadSignature,
        WrongChallenge,
        Impersonate(String),
        Forward(String, SigningKey),
    }

    struct ScriptedNode {
        id: String,
        key: SigningKey,
        behavior: Behavior,
        calls: AtomicUsize,
    }

    impl ScriptedNode {
        fn new(id: &str, behavior: Behavior) -> Arc<Self> {
            Arc::new(Self {
                id: id.to_string(),
                key: signing_key_from_seed(id),
                behavior,
                calls: AtomicUsize::new(0),
            })
        }

        fn seal(&self, hash: ChallengeHash, vote: Vote) -> Seal {
            Seal::sign(self.id.clone(), hash, vote, &self.key, Utc::now())
        }
    }

    #[async_trait]
    impl VerifierNode for ScriptedNode {
        fn node_id(&self) -> &str {
            &self.id
        }

        async fn evaluate(&self, challenge: &Challenge) -> Result<Seal, NodeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let hash = challenge.challenge_hash();
            match &self.behavior {
                Behavior::Vote(vote) => Ok(self.seal(hash, *vote)),
                Behavior::Delayed(vote, delay) => {
                    tokio::time::sleep(*delay).await;
                    Ok(self.seal(hash, *vote))
                }
                Behavior::Silent => std::future::pending().await,
                Behavior::Fail => Err(NodeError::Unreachable("link down".into())),
                Behavior::BadSignature => {
                    let mut seal = self.seal(hash, Vote::Accept);
                    seal.signature = self.seal(ChallengeHash([0; 32]), Vote::Accept).signature;
                    Ok(seal)
                }
                Behavior::WrongChallenge => Ok(self.seal(ChallengeHash([7; 32]), Vote::Accept)),
                Behavior::Impersonate(victim) => {
                    Ok(Seal::sign(victim.clone(), hash, Vote::Accept, &self.key, Utc::now()))
                }
                Behavior::Forward(as_id, key) => {
                    Ok(Seal::sign(as_id.clone(), hash, Vote::Accept, key, Utc::now()))
                }
            }
        }
    }

    fn engine(nodes: &[Arc<ScriptedNode>]) -> ConsensusEngine {
        let mut registry = VerifierRegistry::new();
        for node in nodes {
            registry.insert(node.id.clone(), node.key.verifying_key());
        }
        let nodes = nodes
            .iter()
            .map(|n| n.clone() as Arc<dyn VerifierNode>)
            .collect();
        ConsensusEngine::new(nodes, Arc::new(registry), ROUND)
    }

    fn challenge() -> Challenge {
        let now = Utc::now();
        Challenge::new(
            hash_content(b"painting", "erin", now),
            Commitment::new(vec![1; 32], vec![2; 32]),
            "erin",
            81.0,
            now,
        )
    }

    fn ids(prefix: &str, n: usize) -> Vec<String> {
        (0..n).map(|i| format!("{prefix}-{i}")).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn three_accepts_two_silent_reaches_quorum() {
        let names = ids("node", 5);
        let nodes = vec![
            ScriptedNode::new(&names[0], Behavior::Vote(Vote::Accept)),
            ScriptedNode::new(&names[1], Behavior::Silent),
            ScriptedNode::new(&names[2], Behavior::Vote(Vote::Accept)),
            ScriptedNode::new(&names[3], Behavior::Silent),
            ScriptedNode::new(&names[4], Behavior::Delayed(Vote::Accept, Duration::from_secs(1))),
        ];
        let engine = engine(&nodes);
        let ch = challenge();
        let seals = engine
            .reach_consensus(&ch, QuorumParams::default())
            .await
            .unwrap();
        assert_eq!(seals.len(), 3);
        assert!(seals.iter().all(|s| s.is_accept()));
        assert!(seals.iter().all(|s| s.challenge_hash == ch.challenge_hash()));
        let distinct: HashSet<_> = seals.iter().map(|s| s.node_id.clone()).collect();
        assert_eq!(distinct.len(), 3);
        assert_eq!(engine.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn success_returns_exactly_threshold_seals() {
        let nodes: Vec<_> = ids("node", 5)
            .iter()
            .map(|id| ScriptedNode::new(id, Behavior::Vote(Vote::Accept)))
            .collect();
        let engine = engine(&nodes);
        let seals = engine
            .reach_consensus(&challenge(), QuorumParams::default())
            .await
            .unwrap();
        assert_eq!(seals.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn reject_majority_fails_before_deadline() {
        let names = ids("node", 5);
        let nodes = vec![
            ScriptedNode::new(&names[0], Behavior::Vote(Vote::Reject)),
            ScriptedNode::new(&names[1], Behavior::Vote(Vote::Reject)),
            ScriptedNode::new(&names[2], Behavior::Delayed(Vote::Reject, Duration::from_millis(10))),
            ScriptedNode::new(&names[3], Behavior::Silent),
            ScriptedNode::new(&names[4], Behavior::Silent),
        ];
        let engine = engine(&nodes);
        let started = Instant::now();
        let result = engine
            .reach_consensus(&challenge(), QuorumParams::default())
            .await;
        assert_eq!(
            result,
            Err(ConsensusError::QuorumRejected {
                rejects: 3,
                limit: 3
            })
        );
        assert!(started.elapsed() < ROUND);
    }

    #[tokio::test(start_paused = true)]
    async fn insufficient_responses_time_out() {
        let names = ids("node", 5);
        let nodes = vec![
            ScriptedNode::new(&names[0], Behavior::Vote(Vote::Accept)),
            ScriptedNode::new(&names[1], Behavior::Vote(Vote::Accept)),
            ScriptedNode::new(&names[2], Behavior::Vote(Vote::Reject)),
            ScriptedNode::new(&names[3], Behavior::Fail),
            ScriptedNode::new(&names[4], Behavior::Silent),
        ];
        let engine = engine(&nodes);
        let started = Instant::now();
        let result = engine
            .reach_consensus(&challenge(), QuorumParams::default())
            .await;
        assert_eq!(
            result,
            Err(ConsensusError::QuorumTimeout {
                accepts: 2,
                rejects: 1,
                responded: 4,
                required: 3
            })
        );
        assert!(started.elapsed() >= ROUND);
    }

    #[tokio::test(start_paused = true)]
    async fn garbage_seals_never_count() {
        let names = ids("node", 5);
        let nodes = vec![
            ScriptedNode::new(&names[0], Behavior::Vote(Vote::Accept)),
            ScriptedNode::new(&names[1], Behavior::Vote(Vote::Accept)),
            ScriptedNode::new(&names[2], Behavior::BadSignature),
            ScriptedNode::new(&names[3], Behavior::WrongChallenge),
            ScriptedNode::new(&names[4], Behavior::Impersonate(names[0].clone())),
        ];
        let engine = engine(&nodes);
        let result = engine
            .reach_consensus(&challenge(), QuorumParams::default())
            .await;
        assert_eq!(
            result,
            Err(ConsensusError::QuorumTimeout {
                accepts: 2,
                rejects: 0,
                responded: 5,
                required: 3
            })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn garbage_does_not_block_honest_quorum() {
        let names = ids("node", 5);
        let nodes = vec![
            ScriptedNode::new(&names[0], Behavior::BadSignature),
            ScriptedNode::new(&names[1], Behavior::Vote(Vote::Accept)),
            ScriptedNode::new(&names[2], Behavior::WrongChallenge),
            ScriptedNode::new(&names[3], Behavior::Vote(Vote::Accept)),
            ScriptedNode::new(&names[4], Behavior::Vote(Vote::Accept)),
        ];
        let engine = engine(&nodes);
        let seals = engine
            .reach_consensus(&challenge(), QuorumParams::default())
            .await
            .unwrap();
        let counted: HashSet<_> = seals.iter().map(|s| s.node_id.as_str()).collect();
        assert_eq!(counted, HashSet::from(["node-1", "node-3", "node-4"]));
    }

    #[tokio::test(start_paused = true)]
    async fn replayed_seal_counts_once() {
        let names = ids("node", 3);
        let honest = ScriptedNode::new(&names[0], Behavior::Vote(Vote::Accept));
        let nodes = vec![
            honest.clone(),
            ScriptedNode::new(
                &names[1],
                Behavior::Forward(names[0].clone(), honest.key.clone()),
            ),
            ScriptedNode::new(&names[2], Behavior::Vote(Vote::Accept)),
        ];
        let engine = engine(&nodes);
        let result = engine
            .reach_consensus(&challenge(), QuorumParams::new(3, 3))
            .await;
        assert!(matches!(
            result,
            Err(ConsensusError::QuorumTimeout { accepts: 2, .. })
        ));
    }

    #[tokio::test]
    async fn invalid_parameters_are_rejected() {
        let nodes: Vec<_> = ids("node", 2)
            .iter()
            .map(|id| ScriptedNode::new(id, Behavior::Vote(Vote::Accept)))
            .collect();
        let engine = engine(&nodes);
        let ch = challenge();
        assert_eq!(
            engine.reach_consensus(&ch, QuorumParams::new(3, 2)).await,
            Err(ConsensusError::InvalidQuorum {
                threshold: 3,
                total: 2
            })
        );
        assert_eq!(
            engine.reach_consensus(&ch, QuorumParams::new(0, 2)).await,
            Err(ConsensusError::InvalidQuorum {
                threshold: 0,
                total: 2
            })
        );
        assert_eq!(
            engine.reach_consensus(&ch, QuorumParams::new(2, 4)).await,
            Err(ConsensusError::InsufficientNodes {
                requested: 4,
                available: 2
            })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_callers_share_one_round() {
        let nodes: Vec<_> = ids("node", 5)
            .iter()
            .map(|id| ScriptedNode::new(id, Behavior::Delayed(Vote::Accept, Duration::from_millis(50))))
            .collect();
        let engine = engine(&nodes);
        let ch = challenge();
        let (a, b) = tokio::join!(
            engine.reach_consensus(&ch, QuorumParams::default()),
            engine.reach_consensus(&ch, QuorumParams::default())
        );
        let (a, b) = (a.unwrap(), b.unwrap());
        assert_eq!(a, b);
        for node in &nodes {
            assert_eq!(node.calls.load(Ordering::SeqCst), 1);
        }
        assert_eq!(engine.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_round_is_discarded() {
        let nodes: Vec<_> = ids("node", 5)
            .iter()
            .map(|id| ScriptedNode::new(id, Behavior::Delayed(Vote::Accept, Duration::from_secs(1))))
            .collect();
        let engine = engine(&nodes);
        let ch = challenge();
        let cancelled = tokio::time::timeout(
            Duration::from_millis(100),
            engine.reach_consensus(&ch, QuorumParams::default()),
        )
        .await;
        assert!(cancelled.is_err());
        assert_eq!(engine.in_flight(), 0);

        let seals = engine
            .reach_consensus(&ch, QuorumParams::default())
            .await
            .unwrap();
        assert_eq!(seals.len(), 3);
        for node in &nodes {
            assert_eq!(node.calls.load(Ordering::SeqCst), 2);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn subset_selection_consults_total_nodes() {
        let nodes: Vec<_> = ids("node", 7)
            .iter()
            .map(|id| ScriptedNode::new(id, Behavior::Silent))
            .collect();
        let engine = engine(&nodes);
        let result = engine
            .reach_consensus(&challenge(), QuorumParams::new(2, 3))
            .await;
        assert!(matches!(result, Err(ConsensusError::QuorumTimeout { .. })));
        let consulted: usize = nodes.iter().map(|n| n.calls.load(Ordering::SeqCst)).sum();
        assert_eq!(consulted, 3);
    }
}
