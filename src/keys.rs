//! Verifier key material and the pre-provisioned node key registry.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey, SECRET_KEY_LENGTH};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha512};
use std::{
    collections::BTreeMap,
    error::Error,
    fmt, fs,
    path::{Path, PathBuf},
};
use thiserror::Error as ThisError;

/// Describes how a verifier's ed25519 key should be obtained.
#[derive(Debug, Clone)]
pub enum KeySource {
    /// Deterministic key derived from an `ed25519://` seed string.
    Seed(String),
    /// Load the secret key material from the provided file path.
    File(PathBuf),
    /// Use a freshly generated random key.
    Random,
}

impl KeySource {
    /// Parses a `--key` CLI argument into a concrete key source.
    pub fn from_spec(spec: Option<&str>) -> Self {
        match spec {
            Some(value) if value.starts_with("ed25519://") => {
                Self::Seed(value.trim_start_matches("ed25519://").to_string())
            }
            Some(value) if !value.is_empty() => Self::File(PathBuf::from(value)),
            _ => Self::Random,
        }
    }
}

/// Errors reported while loading or decoding key material.
#[derive(Debug, Clone)]
pub enum KeyError {
    /// Underlying filesystem I/O failure.
    Io(String),
    /// Base64, hex, or ed25519 parsing failure.
    Decode(String),
    /// Buffer did not match the expected secret-key length.
    InvalidLength(usize),
    /// Signature did not verify.
    BadSignature,
}

impl fmt::Display for KeyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(err) => write!(f, "key I/O error: {err}"),
            Self::Decode(err) => write!(f, "key decode error: {err}"),
            Self::InvalidLength(len) => write!(f, "unexpected key length: {len}"),
            Self::BadSignature => write!(f, "signature verification failed"),
        }
    }
}

impl Error for KeyError {}

/// Loads or derives a signing key from `source`.
pub fn load_signing_key(source: &KeySource) -> Result<SigningKey, KeyError> {
    let secret = match source {
        KeySource::Seed(seed) => derive_secret_from_seed(seed),
        KeySource::File(path) => load_secret_from_file(path)?,
        KeySource::Random => SigningKey::generate(&mut OsRng).to_bytes(),
    };
    Ok(SigningKey::from_bytes(&secret))
}

/// Deterministically derives a signing key from a seed string.
pub fn signing_key_from_seed(seed: &str) -> SigningKey {
    SigningKey::from_bytes(&derive_secret_from_seed(seed))
}

fn derive_secret_from_seed(seed: &str) -> [u8; SECRET_KEY_LENGTH] {
    let digest = Sha512::digest(seed.as_bytes());
    let mut secret = [0u8; SECRET_KEY_LENGTH];
    secret.copy_from_slice(&digest[..SECRET_KEY_LENGTH]);
    secret
}

fn load_secret_from_file(path: &Path) -> Result<[u8; SECRET_KEY_LENGTH], KeyError> {
    let contents = fs::read(path).map_err(|err| KeyError::Io(err.to_string()))?;
    if contents.len() == SECRET_KEY_LENGTH {
        return bytes_to_secret(&contents);
    }
    if let Ok(text) = std::str::from_utf8(&contents) {
        let trimmed = text.trim();
        if trimmed.len() == SECRET_KEY_LENGTH * 2 {
            if let Ok(decoded) = hex::decode(trimmed) {
                return bytes_to_secret(&decoded);
            }
        }
        if let Ok(decoded) = BASE64.decode(trimmed) {
            return bytes_to_secret(&decoded);
        }
    }
    bytes_to_secret(&contents)
}

fn bytes_to_secret(bytes: &[u8]) -> Result<[u8; SECRET_KEY_LENGTH], KeyError> {
    if bytes.len() != SECRET_KEY_LENGTH {
        return Err(KeyError::InvalidLength(bytes.len()));
    }
    let mut secret = [0u8; SECRET_KEY_LENGTH];
    secret.copy_from_slice(bytes);
    Ok(secret)
}

/// Encodes a public key as base64.
pub fn encode_public_key_base64(verifying: &VerifyingKey) -> String {
    BASE64.encode(verifying.to_bytes())
}

/// Decodes a base64 public key.
pub fn decode_public_key_base64(input: &str) -> Result<VerifyingKey, KeyError> {
    let bytes = BASE64
        .decode(input.trim())
        .map_err(|err| KeyError::Decode(err.to_string()))?;
    VerifyingKey::try_from(bytes.as_slice()).map_err(|err| KeyError::Decode(err.to_string()))
}

/// Signs `payload` and returns the base64 signature.
pub fn sign_payload_base64(signing: &SigningKey, payload: &[u8]) -> String {
    BASE64.encode(signing.sign(payload).to_bytes())
}

/// Verifies a base64 signature over `payload`.
pub fn verify_signature_base64(
    verifying: &VerifyingKey,
    payload: &[u8],
    signature_b64: &str,
) -> Result<(), KeyError> {
    let bytes = BASE64
        .decode(signature_b64)
        .map_err(|err| KeyError::Decode(err.to_string()))?;
    let signature =
        Signature::from_slice(&bytes).map_err(|err| KeyError::Decode(err.to_string()))?;
    verifying
        .verify(payload, &signature)
        .map_err(|_| KeyError::BadSignature)
}

/// Errors surfaced while loading a verifier registry.
#[derive(Debug, ThisError)]
pub enum RegistryError {
    #[error("registry I/O error: {0}")]
    /// File-system failure while reading or writing the registry.
    Io(#[from] std::io::Error),
    #[error("registry parse error: {0}")]
    /// The registry file is not valid JSON.
    Parse(#[from] serde_json::Error),
    #[error("node {node_id}: {source}")]
    /// A listed key could not be decoded.
    Key {
        /// Node whose key failed to decode.
        node_id: String,
        /// Underlying decode error.
        source: KeyError,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RegistryFile {
    nodes: Vec<RegistryEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RegistryEntry {
    node_id: String,
    public_key: String,
}

/// Known public keys of the verifier set, keyed by node id.
///
/// Keys are provisioned ahead of time; seals from ids missing here are
/// never counted.
#[derive(Debug, Clone, Default)]
pub struct VerifierRegistry {
    keys: BTreeMap<String, VerifyingKey>,
}

impl VerifierRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers (or replaces) a node key.
    pub fn insert(&mut self, node_id: impl Into<String>, key: VerifyingKey) {
        self.keys.insert(node_id.into(), key);
    }

    /// Returns the key for `node_id`, if provisioned.
    pub fn get(&self, node_id: &str) -> Option<&VerifyingKey> {
        self.keys.get(node_id)
    }

    /// Number of provisioned nodes.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Returns true when no node is provisioned.
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Iterates over provisioned node ids.
    pub fn node_ids(&self) -> impl Iterator<Item = &str> {
        self.keys.keys().map(String::as_str)
    }

    /// Loads a registry from a JSON file.
    ///
    /// The expected format is:
    ///
    /// ```json
    /// { "nodes": [{ "node_id": "node-0", "public_key": "<base64-ed25519>" }] }
    /// ```
    pub fn from_json_path(path: &Path) -> Result<Self, RegistryError> {
        let contents = fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }

    /// Parses a registry from JSON text.
    pub fn from_json_str(input: &str) -> Result<Self, RegistryError> {
        let parsed: RegistryFile = serde_json::from_str(input)?;
        let mut registry = Self::new();
        for entry in parsed.nodes {
            let key = decode_public_key_base64(&entry.public_key).map_err(|source| {
                RegistryError::Key {
                    node_id: entry.node_id.clone(),
                    source,
                }
            })?;
            registry.insert(entry.node_id, key);
        }
        Ok(registry)
    }

    /// Serialises the registry to pretty JSON.
    pub fn to_json_string(&self) -> Result<String, serde_json::Error> {
        let file = RegistryFile {
            nodes: self
                .keys
                .iter()
                .map(|(node_id, key)| RegistryEntry {
                    node_id: node_id.clone(),
                    public_key: encode_public_key_base64(key),
                })
                .collect(),
        };
        serde_json::to_string_pretty(&file)
    }
}
