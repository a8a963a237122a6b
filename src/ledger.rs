//! Proof ledger: the authority on whether a work is already certified.
//!
//! Each work hash owns a slot guarded by its own mutex, so registration,
//! revocation and expiry for one work serialise while unrelated works
//! proceed independently.  The outer map lock is held only long enough to
//! find or create a slot, and the verification id index is sharded so
//! registrations of unrelated works rarely touch the same shard.  History is never deleted: expired and revoked
//! proofs stay in their slot with an inactive status.

use crate::{
    error::{DuplicateError, LedgerError},
    node::CertificationIndex,
    proof::VerificationProof,
    work::WorkHash,
};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    fs,
    path::Path,
    sync::Arc,
    time::Duration,
};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Schema identifier for ledger snapshots.
pub const SCHEMA_LEDGER: &str = "originseal.ledger.v1";

const ID_SHARDS: usize = 16;

type IdShard = RwLock<HashMap<String, WorkHash>>;

fn shard_index(verification_id: &str) -> usize {
    verification_id
        .bytes()
        .fold(0usize, |acc, byte| acc.wrapping_mul(31).wrapping_add(byte as usize))
        % ID_SHARDS
}

/// Lifecycle state of a recorded proof.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ProofStatus {
    /// Valid and counted for uniqueness.
    Active,
    /// Passed its `expires_at`.
    Expired,
    /// Withdrawn outside the expiry path.
    Revoked {
        /// Why the proof was revoked.
        reason: String,
        /// When the revocation happened.
        revoked_at: DateTime<Utc>,
    },
}

/// A proof and its current status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerRecord {
    /// The issued proof.
    pub proof: VerificationProof,
    /// Current status.
    pub status: ProofStatus,
}

impl LedgerRecord {
    /// Returns true for active records.
    pub fn is_active(&self) -> bool {
        self.status == ProofStatus::Active
    }
}

#[derive(Debug, Default)]
struct WorkSlot {
    records: Vec<LedgerRecord>,
}

impl WorkSlot {
    /// Marks active records whose validity ended; returns how many changed.
    fn refresh(&mut self, now: DateTime<Utc>) -> usize {
        let mut expired = 0;
        for record in &mut self.records {
            if record.is_active() && record.proof.is_expired(now) {
                record.status = ProofStatus::Expired;
                expired += 1;
            }
        }
        expired
    }

    fn active(&self) -> Option<&LedgerRecord> {
        self.records.iter().find(|record| record.is_active())
    }
}

/// Serialised ledger contents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    /// Schema identifier (`originseal.ledger.v1`).
    pub schema: String,
    /// Every record, ordered by issuance.
    pub records: Vec<LedgerRecord>,
}

/// Issued proofs keyed by work hash.
#[derive(Debug)]
pub struct ProofLedger {
    slots: RwLock<HashMap<WorkHash, Arc<Mutex<WorkSlot>>>>,
    ids: Vec<IdShard>,
}

impl Default for ProofLedger {
    fn default() -> Self {
        Self {
            slots: RwLock::new(HashMap::new()),
            ids: (0..ID_SHARDS).map(|_| RwLock::new(HashMap::new())).collect(),
        }
    }
}

impl ProofLedger {
    /// Creates an empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    fn id_shard(&self, verification_id: &str) -> &IdShard {
        &self.ids[shard_index(verification_id)]
    }

    fn slot_for(&self, work_hash: &WorkHash) -> Arc<Mutex<WorkSlot>> {
        if let Some(slot) = self.slots.read().get(work_hash) {
            return slot.clone();
        }
        self.slots
            .write()
            .entry(work_hash.clone())
            .or_default()
            .clone()
    }

    fn existing_slot(&self, work_hash: &WorkHash) -> Option<Arc<Mutex<WorkSlot>>> {
        self.slots.read().get(work_hash).cloned()
    }

    /// Records `proof` as the active proof for `work_hash`.
    pub fn register(
        &self,
        work_hash: &WorkHash,
        proof: VerificationProof,
    ) -> Result<VerificationProof, DuplicateError> {
        self.register_at(work_hash, proof, Utc::now())
    }

    /// [`register`](Self::register) evaluated at `now`.
    ///
    /// The duplicate check and the insertion happen under the work's slot
    /// lock, so of several concurrent registrations exactly one succeeds.
    pub fn register_at(
        &self,
        work_hash: &WorkHash,
        proof: VerificationProof,
        now: DateTime<Utc>,
    ) -> Result<VerificationProof, DuplicateError> {
        let slot = self.slot_for(work_hash);
        let mut slot = slot.lock();
        slot.refresh(now);
        if let Some(active) = slot.active() {
            debug!(work_hash = %work_hash, existing = %active.proof.verification_id, "duplicate registration");
            return Err(DuplicateError {
                work_hash: work_hash.to_string(),
                verification_id: active.proof.verification_id.clone(),
            });
        }
        let status = if proof.is_expired(now) {
            ProofStatus::Expired
        } else {
            ProofStatus::Active
        };
        slot.records.push(LedgerRecord {
            proof: proof.clone(),
            status,
        });
        self.id_shard(&proof.verification_id)
            .write()
            .insert(proof.verification_id.clone(), work_hash.clone());
        info!(
            work_hash = %work_hash,
            verification_id = %proof.verification_id,
            expires_at = %proof.expires_at,
            "proof registered"
        );
        Ok(proof)
    }

    /// Returns the active proof for `work_hash`.
    pub fn lookup(&self, work_hash: &WorkHash) -> Result<VerificationProof, LedgerError> {
        self.lookup_at(work_hash, Utc::now())
    }

    /// [`lookup`](Self::lookup) evaluated at `now`; expires stale proofs on the way.
    pub fn lookup_at(
        &self,
        work_hash: &WorkHash,
        now: DateTime<Utc>,
    ) -> Result<VerificationProof, LedgerError> {
        let not_found = || LedgerError::NotFound(work_hash.to_string());
        let slot = self.existing_slot(work_hash).ok_or_else(not_found)?;
        let mut slot = slot.lock();
        slot.refresh(now);
        slot.active()
            .map(|record| record.proof.clone())
            .ok_or_else(not_found)
    }

    /// Marks every proof with `expires_at <= now` inactive; returns how many changed.
    pub fn expire_sweep(&self, now: DateTime<Utc>) -> usize {
        let slots: Vec<_> = self.slots.read().values().cloned().collect();
        let expired: usize = slots.iter().map(|slot| slot.lock().refresh(now)).sum();
        if expired > 0 {
            info!(expired, "expiry sweep");
        }
        expired
    }

    /// Withdraws the proof with `verification_id`.
    pub fn revoke(
        &self,
        verification_id: &str,
        reason: &str,
    ) -> Result<VerificationProof, LedgerError> {
        self.revoke_at(verification_id, reason, Utc::now())
    }

    /// [`revoke`](Self::revoke) stamped with `now`.
    ///
    /// Revoking an already revoked proof leaves the original reason in place.
    pub fn revoke_at(
        &self,
        verification_id: &str,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<VerificationProof, LedgerError> {
        let missing = || LedgerError::RevocationNotFound(verification_id.to_string());
        let work_hash = self
            .id_shard(verification_id)
            .read()
            .get(verification_id)
            .cloned()
            .ok_or_else(missing)?;
        let slot = self.existing_slot(&work_hash).ok_or_else(missing)?;
        let mut slot = slot.lock();
        let record = slot
            .records
            .iter_mut()
            .find(|record| record.proof.verification_id == verification_id)
            .ok_or_else(missing)?;
        if matches!(record.status, ProofStatus::Revoked { .. }) {
            debug!(verification_id, "proof already revoked");
        } else {
            record.status = ProofStatus::Revoked {
                reason: reason.to_string(),
                revoked_at: now,
            };
            warn!(verification_id, work_hash = %work_hash, reason, "proof revoked");
        }
        Ok(record.proof.clone())
    }

    /// Every record kept for `work_hash`, oldest first.
    pub fn history(&self, work_hash: &WorkHash) -> Vec<LedgerRecord> {
        self.existing_slot(work_hash)
            .map(|slot| slot.lock().records.clone())
            .unwrap_or_default()
    }

    /// Number of works with at least one record.
    pub fn len(&self) -> usize {
        self.slots.read().len()
    }

    /// Returns true when nothing was ever registered.
    pub fn is_empty(&self) -> bool {
        self.slots.read().is_empty()
    }

    /// Captures every record, ordered by issuance.
    pub fn snapshot(&self) -> LedgerSnapshot {
        let slots: Vec<_> = self.slots.read().values().cloned().collect();
        let mut records: Vec<LedgerRecord> = slots
            .iter()
            .flat_map(|slot| slot.lock().records.clone())
            .collect();
        records.sort_by(|a, b| {
            a.proof
                .issued_at
                .cmp(&b.proof.issued_at)
                .then_with(|| a.proof.verification_id.cmp(&b.proof.verification_id))
        });
        LedgerSnapshot {
            schema: SCHEMA_LEDGER.to_string(),
            records,
        }
    }

    /// Rebuilds a ledger from a snapshot.
    pub fn from_snapshot(snapshot: LedgerSnapshot) -> Result<Self, LedgerError> {
        if snapshot.schema != SCHEMA_LEDGER {
            return Err(LedgerError::Schema(snapshot.schema));
        }
        let ledger = Self::new();
        {
            let mut slots = ledger.slots.write();
            for record in snapshot.records {
                let work_hash = record.proof.work_hash.clone();
                let slot = slots.entry(work_hash.clone()).or_default();
                let mut slot = slot.lock();
                if record.is_active() && slot.active().is_some() {
                    return Err(LedgerError::Schema(format!(
                        "multiple active proofs for work {work_hash}"
                    )));
                }
                ledger
                    .id_shard(&record.proof.verification_id)
                    .write()
                    .insert(record.proof.verification_id.clone(), work_hash);
                slot.records.push(record);
            }
        }
        Ok(ledger)
    }

    /// Writes a snapshot to `path` atomically (temp file + rename).
    pub fn save(&self, path: &Path) -> Result<(), LedgerError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let contents = serde_json::to_string_pretty(&self.snapshot())?;
        let mut tmp = path.as_os_str().to_owned();
        tmp.push(".tmp");
        fs::write(&tmp, contents)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Loads a snapshot from `path`; a missing file yields an empty ledger.
    pub fn load(path: &Path) -> Result<Self, LedgerError> {
        if !path.exists() {
            return Ok(Self::new());
        }
        let contents = fs::read_to_string(path)?;
        let snapshot: LedgerSnapshot = serde_json::from_str(&contents)?;
        Self::from_snapshot(snapshot)
    }

    /// Runs [`expire_sweep`](Self::expire_sweep) every `interval` until the
    /// returned task is aborted.
    pub fn spawn_sweeper(self: Arc<Self>, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                self.expire_sweep(Utc::now());
            }
        })
    }
}

impl CertificationIndex for ProofLedger {
    fn is_certified(&self, work_hash: &WorkHash, now: DateTime<Utc>) -> bool {
        self.lookup_at(work_hash, now).is_ok()
    }
}
