//! Tunable parameters for issuance.
//!
//! Values come from an optional JSON file and may be overridden by
//! `ORIGINSEAL_*` environment variables.  Every field has a default, so an
//! empty object (or no file at all) yields the canonical 3-of-5 quorum and a
//! twelve month validity window.

use crate::{
    consensus::{QuorumParams, DEFAULT_QUORUM_THRESHOLD, DEFAULT_TOTAL_NODES},
    error::ConfigError,
};
use serde::{Deserialize, Serialize};
use std::{env, fs, path::Path, time::Duration};

/// Env override for `quorum_threshold`.
pub const ENV_QUORUM: &str = "ORIGINSEAL_QUORUM";
/// Env override for `total_nodes`.
pub const ENV_TOTAL_NODES: &str = "ORIGINSEAL_TOTAL_NODES";
/// Env override for `consensus_timeout_ms`.
pub const ENV_CONSENSUS_TIMEOUT_MS: &str = "ORIGINSEAL_CONSENSUS_TIMEOUT_MS";
/// Env override for `request_timeout_ms`.
pub const ENV_REQUEST_TIMEOUT_MS: &str = "ORIGINSEAL_REQUEST_TIMEOUT_MS";
/// Env override for `proof_validity_months`.
pub const ENV_PROOF_VALIDITY_MONTHS: &str = "ORIGINSEAL_PROOF_VALIDITY_MONTHS";

/// Issuance configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SealConfig {
    /// Accept seals required per round.
    pub quorum_threshold: usize,
    /// Nodes selected per round.
    pub total_nodes: usize,
    /// Round deadline in milliseconds.
    pub consensus_timeout_ms: u64,
    /// Prover deadline in milliseconds.
    pub binding_timeout_ms: u64,
    /// Anchoring deadline in milliseconds.
    pub anchor_timeout_ms: u64,
    /// Optional whole-request deadline in milliseconds.
    pub request_timeout_ms: Option<u64>,
    /// Validity window of an issued proof.
    pub proof_validity_months: u32,
    /// Required fingerprint length.
    pub fingerprint_dimension: usize,
    /// Lowest score reference verifiers accept.
    pub min_entropy_score: f64,
    /// Period of the background expiry sweep in milliseconds.
    pub sweep_interval_ms: u64,
}

impl Default for SealConfig {
    fn default() -> Self {
        Self {
            quorum_threshold: DEFAULT_QUORUM_THRESHOLD,
            total_nodes: DEFAULT_TOTAL_NODES,
            consensus_timeout_ms: 5_000,
            binding_timeout_ms: 10_000,
            anchor_timeout_ms: 10_000,
            request_timeout_ms: None,
            proof_validity_months: 12,
            fingerprint_dimension: 64,
            min_entropy_score: 0.0,
            sweep_interval_ms: 60_000,
        }
    }
}

fn parse_env<T: std::str::FromStr>(name: &'static str, value: String) -> Result<T, ConfigError> {
    value
        .trim()
        .parse::<T>()
        .map_err(|_| ConfigError::Env { name, value })
}

impl SealConfig {
    /// Reads `path` (if given), applies env overrides and validates.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_json_str(&fs::read_to_string(path)?)?,
            None => Self::default(),
        };
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Parses a JSON document; missing fields take their defaults.
    pub fn from_json_str(input: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(input)?)
    }

    /// Applies `ORIGINSEAL_*` overrides from the process environment.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|name| env::var(name).ok())
    }

    /// Applies overrides resolved through `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup(ENV_QUORUM) {
            self.quorum_threshold = parse_env(ENV_QUORUM, value)?;
        }
        if let Some(value) = lookup(ENV_TOTAL_NODES) {
            self.total_nodes = parse_env(ENV_TOTAL_NODES, value)?;
        }
        if let Some(value) = lookup(ENV_CONSENSUS_TIMEOUT_MS) {
            self.consensus_timeout_ms = parse_env(ENV_CONSENSUS_TIMEOUT_MS, value)?;
        }
        if let Some(value) = lookup(ENV_REQUEST_TIMEOUT_MS) {
            self.request_timeout_ms = Some(parse_env(ENV_REQUEST_TIMEOUT_MS, value)?);
        }
        if let Some(value) = lookup(ENV_PROOF_VALIDITY_MONTHS) {
            self.proof_validity_months = parse_env(ENV_PROOF_VALIDITY_MONTHS, value)?;
        }
        Ok(())
    }

    /// Rejects inconsistent values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.quorum()
            .validate()
            .map_err(|err| ConfigError::Invalid(err.to_string()))?;
        let timeouts = [
            ("consensus_timeout_ms", self.consensus_timeout_ms),
            ("binding_timeout_ms", self.binding_timeout_ms),
            ("anchor_timeout_ms", self.anchor_timeout_ms),
            ("sweep_interval_ms", self.sweep_interval_ms),
            ("request_timeout_ms", self.request_timeout_ms.unwrap_or(1)),
        ];
        if let Some((name, _)) = timeouts.iter().find(|(_, ms)| *ms == 0) {
            return Err(ConfigError::Invalid(format!("{name} must be positive")));
        }
        if self.fingerprint_dimension == 0 {
            return Err(ConfigError::Invalid(
                "fingerprint_dimension must be positive".into(),
            ));
        }
        if !self.min_entropy_score.is_finite() || !(0.0..=100.0).contains(&self.min_entropy_score)
        {
            return Err(ConfigError::Invalid(format!(
                "min_entropy_score {} outside [0, 100]",
                self.min_entropy_score
            )));
        }
        Ok(())
    }

    /// Quorum rule for consensus rounds.
    pub fn quorum(&self) -> QuorumParams {
        QuorumParams::new(self.quorum_threshold, self.total_nodes)
    }

    /// Round deadline.
    pub fn consensus_timeout(&self) -> Duration {
        Duration::from_millis(self.consensus_timeout_ms)
    }

    /// Prover deadline.
    pub fn binding_timeout(&self) -> Duration {
        Duration::from_millis(self.binding_timeout_ms)
    }

    /// Anchoring deadline.
    pub fn anchor_timeout(&self) -> Duration {
        Duration::from_millis(self.anchor_timeout_ms)
    }

    /// Whole-request deadline, if any.
    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_ms.map(Duration::from_millis)
    }

    /// Expiry sweep period.
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }
}
