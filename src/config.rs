//! Engine configuration.
//!
//! Every struct has a usable `Default`, deserializes with missing fields
//! filled from that default, and is checked once by `validate` before use.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{DialecticError, DialecticResult, ValidationError};
use crate::scaler::ComputeLevel;

fn invalid(field: &str, reason: impl Into<String>) -> ValidationError {
    ValidationError::InvalidConfig {
        field: field.to_string(),
        reason: reason.into(),
    }
}

fn check_unit(field: &str, value: f64) -> Result<(), ValidationError> {
    if !(0.0..=1.0).contains(&value) {
        return Err(invalid(field, format!("must be within [0.0, 1.0] (got {value})")));
    }
    Ok(())
}

/// Parameters of belief-context seeding and revision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RevisionConfig {
    /// Discrepancy above which a revision is labelled `Surprise`.
    pub surprise_threshold: f64,
    /// Confidence of the first rating on a new belief context.
    pub default_confidence: f64,
    /// Probability a new belief context puts on the believed outcome.
    pub believed_outcome_probability: f64,
    pub initial_emotion_intensity: f64,
    /// Share of probability mass moved onto the observed state per revision.
    pub evidence_weight: f64,
}

impl Default for RevisionConfig {
    fn default() -> Self {
        Self {
            surprise_threshold: 0.5,
            default_confidence: 0.8,
            believed_outcome_probability: 0.8,
            initial_emotion_intensity: 0.5,
            evidence_weight: 0.5,
        }
    }
}

impl RevisionConfig {
    /// # Errors
    ///
    /// Returns `ValidationError::InvalidConfig` if any field lies outside [0, 1].
    pub fn validate(self) -> Result<Self, ValidationError> {
        check_unit("revision.surprise_threshold", self.surprise_threshold)?;
        check_unit("revision.default_confidence", self.default_confidence)?;
        check_unit("revision.believed_outcome_probability", self.believed_outcome_probability)?;
        check_unit("revision.initial_emotion_intensity", self.initial_emotion_intensity)?;
        check_unit("revision.evidence_weight", self.evidence_weight)?;
        Ok(self)
    }
}

/// Ambiguity weights and the compute ladder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScalerConfig {
    pub similarity_weight: f64,
    pub overlap_weight: f64,
    pub variance_weight: f64,
    /// Ordered cheapest first.
    pub levels: Vec<ComputeLevel>,
}

impl Default for ScalerConfig {
    fn default() -> Self {
        Self {
            similarity_weight: 0.4,
            overlap_weight: 0.3,
            variance_weight: 0.3,
            levels: ComputeLevel::default_ladder(),
        }
    }
}

impl ScalerConfig {
    /// # Errors
    ///
    /// Returns `ValidationError::EmptyComputeLadder` for an empty ladder and
    /// `ValidationError::InvalidConfig` for weights that are negative or do
    /// not sum to 1, or a ladder that shrinks from one level to the next.
    pub fn validate(self) -> Result<Self, ValidationError> {
        if self.levels.is_empty() {
            return Err(ValidationError::EmptyComputeLadder);
        }
        for (field, weight) in [
            ("scaler.similarity_weight", self.similarity_weight),
            ("scaler.overlap_weight", self.overlap_weight),
            ("scaler.variance_weight", self.variance_weight),
        ] {
            check_unit(field, weight)?;
        }
        let total = self.similarity_weight + self.overlap_weight + self.variance_weight;
        if (total - 1.0).abs() > 1e-9 {
            return Err(invalid("scaler.weights", format!("must sum to 1.0 (got {total})")));
        }
        for pair in self.levels.windows(2) {
            let (lo, hi) = (&pair[0], &pair[1]);
            if hi.max_context_depth < lo.max_context_depth
                || hi.max_branches < lo.max_branches
                || hi.max_beliefs < lo.max_beliefs
            {
                return Err(invalid("scaler.levels", "levels must not shrink as the index grows"));
            }
        }
        Ok(self)
    }
}

/// Timeout, retry, and circuit-breaker settings for language collaborator calls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollaboratorConfig {
    pub timeout_ms: u64,
    /// Total attempts per call, including the first.
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub backoff_multiplier: f64,
    /// Consecutive failed calls that open the breaker.
    pub breaker_failure_threshold: u32,
    pub breaker_cooldown_ms: u64,
}

impl Default for CollaboratorConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            max_attempts: 3,
            initial_backoff_ms: 200,
            max_backoff_ms: 5_000,
            backoff_multiplier: 2.0,
            breaker_failure_threshold: 5,
            breaker_cooldown_ms: 30_000,
        }
    }
}

impl CollaboratorConfig {
    /// # Errors
    ///
    /// Returns `ValidationError::InvalidConfig` for a zero timeout, zero
    /// attempts, a multiplier below 1, inverted backoff bounds, or a zero
    /// breaker threshold.
    pub fn validate(self) -> Result<Self, ValidationError> {
        if self.timeout_ms == 0 {
            return Err(invalid("collaborator.timeout_ms", "must be greater than zero"));
        }
        if self.max_attempts == 0 {
            return Err(invalid("collaborator.max_attempts", "must be at least 1"));
        }
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            return Err(invalid(
                "collaborator.backoff_multiplier",
                format!("must be at least 1.0 (got {})", self.backoff_multiplier),
            ));
        }
        if self.max_backoff_ms < self.initial_backoff_ms {
            return Err(invalid(
                "collaborator.max_backoff_ms",
                format!(
                    "must be at least initial_backoff_ms ({} < {})",
                    self.max_backoff_ms, self.initial_backoff_ms
                ),
            ));
        }
        if self.breaker_failure_threshold == 0 {
            return Err(invalid("collaborator.breaker_failure_threshold", "must be at least 1"));
        }
        Ok(self)
    }

    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    #[must_use]
    pub const fn cooldown(&self) -> Duration {
        Duration::from_millis(self.breaker_cooldown_ms)
    }

    /// Delay before retry number `retry` (0-based), capped at `max_backoff_ms`.
    #[must_use]
    pub fn backoff_for(&self, retry: u32) -> Duration {
        let exp = i32::try_from(retry).unwrap_or(i32::MAX);
        #[allow(clippy::cast_precision_loss)]
        let raw = self.initial_backoff_ms as f64 * self.backoff_multiplier.powi(exp);
        #[allow(clippy::cast_precision_loss)]
        let capped = raw.min(self.max_backoff_ms as f64);
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        Duration::from_millis(capped as u64)
    }
}

/// Settings of the file-backed document store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// fsync the commit log after every batch.
    pub sync_on_write: bool,
    /// Largest serialized batch the commit log accepts, in bytes.
    pub max_entry_bytes: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            sync_on_write: true,
            max_entry_bytes: 16 * 1024 * 1024,
        }
    }
}

impl StorageConfig {
    /// Frame lengths are stored as `u32`.
    pub const MAX_ENTRY_LIMIT: usize = u32::MAX as usize;

    /// # Errors
    ///
    /// Returns `ValidationError::InvalidConfig` if `max_entry_bytes` is zero
    /// or does not fit a frame length.
    pub fn validate(self) -> Result<Self, ValidationError> {
        if self.max_entry_bytes == 0 {
            return Err(invalid("storage.max_entry_bytes", "must be greater than zero"));
        }
        if self.max_entry_bytes > Self::MAX_ENTRY_LIMIT {
            return Err(invalid(
                "storage.max_entry_bytes",
                format!("must be at most {} (got {})", Self::MAX_ENTRY_LIMIT, self.max_entry_bytes),
            ));
        }
        Ok(self)
    }
}

/// Full configuration of a [`DialecticEngine`](crate::dialectic::DialecticEngine).
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub revision: RevisionConfig,
    pub scaler: ScalerConfig,
    pub collaborator: CollaboratorConfig,
    pub storage: StorageConfig,
}

impl EngineConfig {
    /// # Errors
    ///
    /// Returns the first `ValidationError` found in any section.
    pub fn validate(self) -> Result<Self, ValidationError> {
        Ok(Self {
            revision: self.revision.validate()?,
            scaler: self.scaler.validate()?,
            collaborator: self.collaborator.validate()?,
            storage: self.storage.validate()?,
        })
    }

    /// Parses and validates a JSON document. Missing fields take their defaults.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::InvalidConfig` for malformed JSON or any
    /// validation failure.
    pub fn from_json_str(json: &str) -> DialecticResult<Self> {
        let config: Self = serde_json::from_str(json).map_err(|e| invalid("config", e.to_string()))?;
        Ok(config.validate()?)
    }

    /// Reads, parses, and validates a JSON file.
    ///
    /// # Errors
    ///
    /// Returns `DialecticError::Internal` if the file cannot be read, or the
    /// errors of [`EngineConfig::from_json_str`].
    pub fn from_json_file(path: impl AsRef<Path>) -> DialecticResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            DialecticError::internal(format!("failed to read config {}: {e}", path.display()))
        })?;
        Self::from_json_str(&text)
    }
}
