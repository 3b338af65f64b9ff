//! Error types for the dialectic engine.
//!
//! All errors are strongly typed using thiserror. Leaf enums describe one
//! failure category each and fold into [`DialecticError`], which callers
//! match on to decide whether a failure is worth retrying.

use std::time::Duration;

use thiserror::Error;

use crate::belief::BeliefId;
use crate::context::ObservationContextId;
use crate::dialectic::{DialecticId, InteractionId, InteractionStatus};
use crate::storage::StorageError;

/// Input that can never succeed, regardless of how often it is retried.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Ambiguity score {value} is out of range [0.0, 1.0]")]
    AmbiguityOutOfRange {
        value: f64,
    },

    #[error("Confidence score {value} is out of range [0.0, 1.0]")]
    ConfidenceOutOfRange {
        value: f64,
    },

    #[error("Ontology is required to apply compute constraints")]
    MissingOntology,

    #[error("Compute ladder must contain at least one level")]
    EmptyComputeLadder,

    #[error("State '{state}' is missing its {bound} bound")]
    MissingStateBound {
        state: String,
        bound: &'static str,
    },

    #[error("State '{state}' has invalid bounds: min ({min}) must be below max ({max})")]
    InvalidStateBounds {
        state: String,
        min: f64,
        max: f64,
    },

    #[error("Measurement {value} is not a finite number")]
    NonFiniteMeasurement {
        value: f64,
    },

    #[error("Measurement dimension '{name}' declares no states")]
    EmptyDimension {
        name: String,
    },

    #[error("Measurement dimension '{name}' is not registered")]
    UnknownDimension {
        name: String,
    },

    #[error("State '{state}' is declared twice in '{context}'")]
    DuplicateState {
        state: String,
        context: String,
    },

    #[error("Belief context references unknown observation context {id}")]
    UnknownObservationContext {
        id: ObservationContextId,
    },

    #[error("State '{state}' is not declared by observation context '{context}'")]
    UndeclaredState {
        state: String,
        context: String,
    },

    #[error("Probability for state '{state}' is invalid: {value}")]
    InvalidProbability {
        state: String,
        value: f64,
    },

    #[error("Conditional probabilities carry no mass")]
    EmptyDistribution,

    #[error("Belief {id} already exists in the belief system")]
    DuplicateBelief {
        id: BeliefId,
    },

    #[error("Belief content cannot be empty")]
    EmptyBeliefContent,

    #[error("Invalid configuration for '{field}': {reason}")]
    InvalidConfig {
        field: String,
        reason: String,
    },
}

/// The dialectic is not in a state that permits the requested transition.
#[derive(Debug, Error)]
pub enum InvalidStateError {
    #[error("Dialectic {dialectic} has no interactions to answer")]
    NoInteractions {
        dialectic: DialecticId,
    },

    #[error("Interaction {interaction} is {status}, expected pending_answer")]
    NotPendingAnswer {
        interaction: InteractionId,
        status: InteractionStatus,
    },

    #[error("Interaction {interaction} is not a question/answer exchange")]
    NotQuestionAnswer {
        interaction: InteractionId,
    },

    #[error("Update request payload is blank")]
    EmptyRequest,
}

/// A collaborator (language or storage) failed or answered with garbage.
#[derive(Debug, Error)]
pub enum CollaboratorError {
    #[error("Collaborator call '{operation}' timed out after {duration_ms}ms")]
    Timeout {
        operation: &'static str,
        duration_ms: u64,
    },

    #[error("Collaborator unavailable during '{operation}': {message}")]
    Unavailable {
        operation: &'static str,
        message: String,
    },

    #[error("Malformed collaborator response from '{operation}': {reason}")]
    MalformedResponse {
        operation: &'static str,
        reason: String,
    },

    #[error("Circuit open for '{operation}'; retry after {retry_after_ms}ms")]
    CircuitOpen {
        operation: &'static str,
        retry_after_ms: u64,
    },

    /// The caller's cancellation token fired while the call was in flight.
    #[error("Collaborator call '{operation}' cancelled")]
    Cancelled { operation: &'static str },
}

impl CollaboratorError {
    pub(crate) fn timeout(operation: &'static str, timeout: Duration) -> Self {
        Self::Timeout {
            operation,
            duration_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
        }
    }

    /// Returns true if another attempt could plausibly succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Unavailable { .. })
    }
}

/// A referenced record does not exist.
#[derive(Debug, Error)]
pub enum NotFoundError {
    #[error("Self model not found: {0}")]
    SelfModel(String),

    #[error("Dialectic not found: {0}")]
    Dialectic(DialecticId),

    #[error("Interaction not found: {0}")]
    Interaction(InteractionId),

    #[error("Belief not found: {0}")]
    Belief(BeliefId),
}

/// Top-level error type for the dialectic engine.
#[derive(Debug, Error)]
pub enum DialecticError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Invalid state: {0}")]
    InvalidState(#[from] InvalidStateError),

    #[error("Collaborator error: {0}")]
    Collaborator(#[source] CollaboratorError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Not found: {0}")]
    NotFound(#[from] NotFoundError),

    #[error("Operation cancelled before commit")]
    Cancelled,

    #[error("Internal error: {message}")]
    Internal {
        message: String,
    },
}

impl From<CollaboratorError> for DialecticError {
    fn from(err: CollaboratorError) -> Self {
        match err {
            CollaboratorError::Cancelled { .. } => Self::Cancelled,
            other => Self::Collaborator(other),
        }
    }
}

impl DialecticError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns true if this is a validation error.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Returns true if this is an invalid state error.
    #[must_use]
    pub const fn is_invalid_state(&self) -> bool {
        matches!(self, Self::InvalidState(_))
    }

    /// Returns true if a language or storage collaborator failed.
    #[must_use]
    pub const fn is_collaborator(&self) -> bool {
        matches!(self, Self::Collaborator(_) | Self::Storage(_))
    }

    /// Returns true if this is a not-found error.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Returns true if the whole update may be retried by the caller.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Collaborator(e) => e.is_transient() || matches!(e, CollaboratorError::CircuitOpen { .. }),
            Self::Storage(e) => e.is_retryable(),
            Self::Validation(_)
            | Self::InvalidState(_)
            | Self::NotFound(_)
            | Self::Cancelled
            | Self::Internal { .. } => false,
        }
    }
}

/// Result type alias for dialectic operations.
pub type DialecticResult<T> = Result<T, DialecticError>;
