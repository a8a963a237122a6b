//! Work identities and fingerprints.
//!
//! Raw content is only touched by [`Work::ingest`]; from then on the core
//! carries the SHA3-512 content hash and the fingerprint vector.

use blake2::digest::{consts::U32, Digest};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha3::Sha3_512;
use std::fmt;

type Blake2b256 = blake2::Blake2b<U32>;

const FINGERPRINT_DOMAIN: &[u8] = b"ORIGINSEAL_FINGERPRINT";

/// Hex-encoded SHA3-512 digest identifying a work.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkHash(String);

impl WorkHash {
    /// Length of the hex encoding of a SHA3-512 digest.
    pub const HEX_LEN: usize = 128;

    /// Wraps raw digest bytes.
    pub fn from_digest(bytes: &[u8]) -> Self {
        Self(hex::encode(bytes))
    }

    /// Parses a hex string, accepting only well-formed SHA3-512 digests.
    pub fn from_hex(input: &str) -> Result<Self, String> {
        let trimmed = input.trim();
        if trimmed.len() != Self::HEX_LEN {
            return Err(format!(
                "work hash must be {} hex characters, got {}",
                Self::HEX_LEN,
                trimmed.len()
            ));
        }
        if !trimmed.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err("work hash contains non-hex characters".to_string());
        }
        Ok(Self(trimmed.to_ascii_lowercase()))
    }

    /// Returns the hex encoding.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WorkHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Descriptive metadata carried alongside a work for scoring.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkMetadata {
    /// Human-readable title.
    #[serde(default)]
    pub title: String,
    /// Free-form description.
    #[serde(default)]
    pub description: String,
    /// Classification tags.
    #[serde(default)]
    pub tags: Vec<String>,
    /// MIME type of the original content.
    #[serde(default)]
    pub mime_type: String,
}

/// Immutable identity of a submitted work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Work {
    /// Caller-assigned identifier.
    pub id: String,
    /// SHA3-512 over content, creator and creation time.
    pub content_hash: WorkHash,
    /// Creator identifier.
    pub creator: String,
    /// Creation time declared by the creator.
    pub created_at: DateTime<Utc>,
    /// Metadata used by the scoring function.
    #[serde(default)]
    pub metadata: WorkMetadata,
}

impl Work {
    /// Hashes `content` into a work identity.  The content itself is not retained.
    pub fn ingest(
        id: impl Into<String>,
        creator: impl Into<String>,
        created_at: DateTime<Utc>,
        metadata: WorkMetadata,
        content: &[u8],
    ) -> Self {
        let creator = creator.into();
        let content_hash = hash_content(content, &creator, created_at);
        Self {
            id: id.into(),
            content_hash,
            creator,
            created_at,
            metadata,
        }
    }
}

/// Computes the work hash for `content` as submitted by `creator` at `created_at`.
pub fn hash_content(content: &[u8], creator: &str, created_at: DateTime<Utc>) -> WorkHash {
    let mut hasher = Sha3_512::new();
    for part in [content, creator.as_bytes(), created_at.to_rfc3339().as_bytes()] {
        hasher.update((part.len() as u64).to_be_bytes());
        hasher.update(part);
    }
    WorkHash::from_digest(&hasher.finalize())
}

/// Fixed-length feature vector summarising a work's content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fingerprint {
    values: Vec<f32>,
}

impl Fingerprint {
    /// Wraps an extractor's output.
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    /// Number of components.
    pub fn dimension(&self) -> usize {
        self.values.len()
    }

    /// Read-only view of the components.
    pub fn values(&self) -> &[f32] {
        &self.values
    }

    /// Canonical little-endian byte encoding used for hashing and proving.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.values.len() * 4);
        for value in &self.values {
            out.extend_from_slice(&value.to_le_bytes());
        }
        out
    }

    /// Domain-separated BLAKE2b-256 digest of the components.
    pub fn digest(&self) -> [u8; 32] {
        let mut hasher = Blake2b256::new();
        hasher.update(FINGERPRINT_DOMAIN);
        hasher.update((self.values.len() as u64).to_be_bytes());
        hasher.update(self.to_bytes());
        let mut out = [0u8; 32];
        out.copy_from_slice(&hasher.finalize());
        out
    }
}
