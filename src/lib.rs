//! # Dialectic - Predictive-Processing Belief Elicitation
//!
//! Dialectic tracks what a subject believes, links each belief to the
//! situations in which it can be checked, and revises it when an answer
//! contradicts what it predicted. A question/answer dialogue drives the
//! process; how much of the belief graph the next question may draw on
//! scales with how unsettled the conversation currently is.
//!
//! ## Core Concepts
//!
//! - **Belief**: a versioned statement owned by a self model
//! - **Observation context**: a named situation with declared outcome states
//! - **Belief context**: confidence history and outcome probabilities linking one belief to one context
//! - **Discrepancy**: the gap between a predicted distribution and an observed state
//! - **Dialectic**: the append-only question/answer history that feeds it all
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use dialectic::{
//!     CancellationToken, DialecticEngine, DialecticType, EngineConfig, InMemoryDocumentStore,
//!     ScriptedCollaborator, SelfModelId, UpdateRequest,
//! };
//!
//! let engine = DialecticEngine::new(
//!     Arc::new(InMemoryDocumentStore::new()),
//!     Arc::new(ScriptedCollaborator::new()),
//!     EngineConfig::default(),
//! )?;
//! let subject = SelfModelId::new("subject-1");
//! let dialectic = engine.create_dialectic(&subject, DialecticType::Default)?;
//! let outcome = engine.update(
//!     &subject,
//!     dialectic.id,
//!     UpdateRequest::Answer("I exercise three times a week".into()),
//!     false,
//!     &CancellationToken::new(),
//! )?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Data model
pub mod belief;
pub mod confidence;
pub mod context;
pub mod dialectic;
pub mod error;
pub mod ontology;

// Algorithms
pub mod discrepancy;
pub mod measurement;
pub mod scaler;

// Collaborators and plumbing
pub mod cancel;
pub mod collaborator;
pub mod config;
pub mod storage;

// Re-export primary types at crate root for convenience
pub use belief::{Belief, BeliefId, BeliefMetrics, BeliefSystem, BeliefType, EpistemicContext, SelfModelId};
pub use cancel::CancellationToken;
pub use collaborator::{
    BeliefSystemAnalysis, CircuitState, ExtractedBelief, GuardedCollaborator, LanguageCollaborator,
    ScriptedCollaborator,
};
pub use confidence::{ConfidenceRating, RatingSource};
pub use config::{CollaboratorConfig, EngineConfig, RevisionConfig, ScalerConfig, StorageConfig};
pub use context::extrapolate::{extrapolate_context_tree, ExtrapolationCache};
pub use context::{
    BeliefContext, EpistemicEmotion, ObservationContext, ObservationContextId, PredictiveProcessingContext,
};
pub use dialectic::{
    Dialectic, DialecticEngine, DialecticId, DialecticType, DialecticalInteraction, InteractionId,
    InteractionStatus, InteractionType, UpdateOutcome, UpdateRequest,
};
pub use discrepancy::{Discrepancy, DiscrepancyEngine, KlDivergence};
pub use error::{
    CollaboratorError, DialecticError, DialecticResult, InvalidStateError, NotFoundError, ValidationError,
};
pub use measurement::{MeasurementAggregator, MeasurementDimension, StateBounds, StateInterpreter};
pub use ontology::Ontology;
pub use scaler::{Ambiguity, ComputeLevel, ComputeScaler, ComputeSelection};
pub use storage::{DocumentStore, InMemoryDocumentStore, StorageError};

#[cfg(feature = "persistent")]
pub use storage::persistent::FileDocumentStore;
