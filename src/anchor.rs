//! Anchoring of (work hash, commitment) pairs.
//!
//! [`HashChainAnchor`] is an append-only BLAKE2b-256 hash chain: every record
//! folds the previous head, the work hash, the commitment and the record time
//! into a new head, and that head is the anchor id.  Records can optionally be
//! journaled as JSON lines; reopening a journal resumes the chain from its
//! last record.

use crate::{binder::Commitment, error::AnchorError, work::WorkHash};
use async_trait::async_trait;
use blake2::digest::{consts::U32, Digest};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::{
    fmt,
    fs::{self, OpenOptions},
    io::{ErrorKind, Write},
    path::{Path, PathBuf},
};
use tracing::{debug, warn};

type Blake2b256 = blake2::Blake2b<U32>;

const ANCHOR_DOMAIN: &[u8] = b"ORIGINSEAL_ANCHOR";

/// Identifier returned by an anchoring service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AnchorId(pub String);

impl fmt::Display for AnchorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// `anchor(work_hash, commitment) -> AnchorID`.
#[async_trait]
pub trait AnchorService: Send + Sync {
    /// Durably records the pair and returns its anchor id.
    async fn anchor(
        &self,
        work_hash: &WorkHash,
        commitment: &Commitment,
    ) -> Result<AnchorId, AnchorError>;
}

/// One link of the anchor chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnchorRecord {
    /// Position in the chain, starting at zero.
    pub index: u64,
    /// Head before this record (hex).
    pub previous: String,
    /// Anchored work.
    pub work_hash: WorkHash,
    /// Anchored commitment bytes (hex).
    pub commitment: String,
    /// When the record was appended.
    pub recorded_at: DateTime<Utc>,
    /// New head, which is also the anchor id (hex).
    pub head: String,
}

fn link_digest(
    previous: &[u8; 32],
    index: u64,
    work_hash: &WorkHash,
    commitment_hex: &str,
    recorded_at: DateTime<Utc>,
) -> [u8; 32] {
    let mut hasher = Blake2b256::new();
    hasher.update(ANCHOR_DOMAIN);
    hasher.update(previous);
    hasher.update(index.to_be_bytes());
    hasher.update((work_hash.as_str().len() as u64).to_be_bytes());
    hasher.update(work_hash.as_str().as_bytes());
    hasher.update((commitment_hex.len() as u64).to_be_bytes());
    hasher.update(commitment_hex.as_bytes());
    hasher.update(recorded_at.timestamp().to_be_bytes());
    hasher.update(recorded_at.timestamp_subsec_nanos().to_be_bytes());
    let mut out = [0u8; 32];
    out.copy_from_slice(&hasher.finalize());
    out
}

struct ChainState {
    head: [u8; 32],
    records: Vec<AnchorRecord>,
}

/// In-process append-only anchor chain.
pub struct HashChainAnchor {
    state: Mutex<ChainState>,
    journal: Option<PathBuf>,
}

impl HashChainAnchor {
    /// Creates an empty chain rooted at the all-zero head.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ChainState {
                head: [0u8; 32],
                records: Vec::new(),
            }),
            journal: None,
        }
    }

    /// Appends every record to `path` as a JSON line.
    ///
    /// Records already in the file are read back and verified, and the chain
    /// continues from the last one.  A journal that does not parse or whose
    /// links do not verify is refused.
    pub fn with_journal(mut self, path: impl Into<PathBuf>) -> Result<Self, AnchorError> {
        let path = path.into();
        let records = read_journal(&path)?;
        if let Err(index) = Self::verify_chain(&records) {
            return Err(AnchorError::CorruptJournal {
                index,
                reason: "hash chain does not verify".into(),
            });
        }
        {
            let mut state = self.state.lock();
            state.head = match records.last() {
                Some(last) => decode_head(&last.head, last.index)?,
                None => [0u8; 32],
            };
            if !records.is_empty() {
                debug!(path = %path.display(), records = records.len(), "anchor journal resumed");
            }
            state.records = records;
        }
        self.journal = Some(path);
        Ok(self)
    }

    /// Current chain head (hex).
    pub fn head(&self) -> String {
        hex::encode(self.state.lock().head)
    }

    /// Copy of every record in order.
    pub fn records(&self) -> Vec<AnchorRecord> {
        self.state.lock().records.clone()
    }

    /// Recomputes the chain and returns the index of the first broken link.
    pub fn verify_chain(records: &[AnchorRecord]) -> Result<(), u64> {
        let mut previous = [0u8; 32];
        for (position, record) in records.iter().enumerate() {
            let index = position as u64;
            if record.index != index || record.previous != hex::encode(previous) {
                return Err(index);
            }
            let head = link_digest(
                &previous,
                index,
                &record.work_hash,
                &record.commitment,
                record.recorded_at,
            );
            if record.head != hex::encode(head) {
                return Err(index);
            }
            previous = head;
        }
        Ok(())
    }

    fn append_journal(&self, record: &AnchorRecord) -> Result<(), AnchorError> {
        let Some(path) = &self.journal else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|err| AnchorError::Unavailable(err.to_string()))?;
        }
        let line = serde_json::to_string(record)
            .map_err(|err| AnchorError::Rejected(err.to_string()))?;
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .and_then(|mut file| writeln!(file, "{line}"))
            .map_err(|err| {
                warn!(path = %path.display(), error = %err, "anchor journal write failed");
                AnchorError::Unavailable(err.to_string())
            })
    }
}

fn read_journal(path: &Path) -> Result<Vec<AnchorRecord>, AnchorError> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(AnchorError::Unavailable(err.to_string())),
    };
    contents
        .lines()
        .filter(|line| !line.trim().is_empty())
        .enumerate()
        .map(|(index, line)| {
            serde_json::from_str(line).map_err(|err| AnchorError::CorruptJournal {
                index: index as u64,
                reason: err.to_string(),
            })
        })
        .collect()
}

fn decode_head(head: &str, index: u64) -> Result<[u8; 32], AnchorError> {
    let mut out = [0u8; 32];
    hex::decode_to_slice(head, &mut out).map_err(|err| AnchorError::CorruptJournal {
        index,
        reason: err.to_string(),
    })?;
    Ok(out)
}

impl Default for HashChainAnchor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AnchorService for HashChainAnchor {
    async fn anchor(
        &self,
        work_hash: &WorkHash,
        commitment: &Commitment,
    ) -> Result<AnchorId, AnchorError> {
        let mut state = self.state.lock();
        let index = state.records.len() as u64;
        let previous = state.head;
        let commitment_hex = commitment.to_hex();
        let recorded_at = Utc::now();
        let head = link_digest(&previous, index, work_hash, &commitment_hex, recorded_at);
        let record = AnchorRecord {
            index,
            previous: hex::encode(previous),
            work_hash: work_hash.clone(),
            commitment: commitment_hex,
            recorded_at,
            head: hex::encode(head),
        };
        self.append_journal(&record)?;
        state.head = head;
        state.records.push(record);
        debug!(work_hash = %work_hash, index, "anchored");
        Ok(AnchorId(hex::encode(head)))
    }
}
