//! Predictive-processing graph: observation contexts and belief contexts.
//!
//! Observation contexts are the nodes a belief can make predictions about;
//! belief contexts are the typed edges from a belief to one observation
//! context. The [`PredictiveProcessingContext`] exclusively owns both
//! collections. Callers get shared slices or look records up by id; the only
//! mutable access goes through methods that preserve the graph invariants.

mod manager;

/// Text-to-graph extrapolation and its cache.
pub mod extrapolate;

pub use manager::{
    belief_metrics, create_belief_context, create_observation_context, ensure_context,
    link_interaction_beliefs, observations_for_belief, LinkOutcome,
};

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::belief::BeliefId;
use crate::confidence::ConfidenceRating;
use crate::dialectic::InteractionId;
use crate::discrepancy::Discrepancy;
use crate::error::ValidationError;

/// States every turn-level observation context starts with.
pub const DEFAULT_STATES: [&str; 3] = ["Positive", "Negative", "Neutral"];

/// State an answer is taken to observe when nothing more specific was extracted.
pub const AFFIRMED_STATE: &str = "Positive";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObservationContextId(Uuid);

impl ObservationContextId {
    /// Creates a new random observation context ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ObservationContextId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ObservationContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A named situation in which a prediction can be checked.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservationContext {
    pub id: ObservationContextId,
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<ObservationContextId>,

    /// Append-only; a declared state is never removed.
    possible_states: Vec<String>,
}

impl ObservationContext {
    /// Creates a root context with no states.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: ObservationContextId::new(),
            name: name.into(),
            parent_id: None,
            possible_states: Vec::new(),
        }
    }

    /// Creates a root context seeded with [`DEFAULT_STATES`].
    pub fn with_default_states(name: impl Into<String>) -> Self {
        let mut ctx = Self::new(name);
        for state in DEFAULT_STATES {
            ctx.add_state(state);
        }
        ctx
    }

    #[must_use]
    pub fn with_parent(mut self, parent: ObservationContextId) -> Self {
        self.parent_id = Some(parent);
        self
    }

    #[must_use]
    pub fn possible_states(&self) -> &[String] {
        &self.possible_states
    }

    #[must_use]
    pub fn has_state(&self, state: &str) -> bool {
        self.possible_states.iter().any(|s| s == state)
    }

    /// Declares a state. Returns false if it was already declared.
    pub fn add_state(&mut self, state: impl Into<String>) -> bool {
        let state = state.into();
        if self.has_state(&state) {
            return false;
        }
        self.possible_states.push(state);
        true
    }
}

/// How a belief context reacted to the latest evidence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EpistemicEmotion {
    #[default]
    Confirmation,
    Surprise,
    /// Reserved for multi-hypothesis evidence; never assigned by the default policy.
    Curiosity,
    /// Reserved for contradictory evidence; never assigned by the default policy.
    Confusion,
}

impl fmt::Display for EpistemicEmotion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Confirmation => write!(f, "confirmation"),
            Self::Surprise => write!(f, "surprise"),
            Self::Curiosity => write!(f, "curiosity"),
            Self::Confusion => write!(f, "confusion"),
        }
    }
}

/// The probabilistic link between one belief and one observation context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BeliefContext {
    pub belief_id: BeliefId,
    pub observation_context_id: ObservationContextId,

    confidence_ratings: Vec<ConfidenceRating>,

    conditional_probabilities: BTreeMap<String, f64>,

    pub epistemic_emotion: EpistemicEmotion,
    pub emotion_intensity: f64,

    /// Write-once comparison records, oldest first.
    #[serde(default)]
    evidence: Vec<Discrepancy>,

    #[serde(default)]
    pub related_interaction_ids: Vec<InteractionId>,
}

impl BeliefContext {
    /// Creates a belief context with a single default rating and no distribution.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::ConfidenceOutOfRange` for a score outside [0, 1].
    pub fn new(
        belief_id: BeliefId,
        observation_context_id: ObservationContextId,
        confidence: f64,
    ) -> Result<Self, ValidationError> {
        Ok(Self {
            belief_id,
            observation_context_id,
            confidence_ratings: vec![ConfidenceRating::default_rating(confidence)?],
            conditional_probabilities: BTreeMap::new(),
            epistemic_emotion: EpistemicEmotion::Confirmation,
            emotion_intensity: 0.5,
            evidence: Vec::new(),
            related_interaction_ids: Vec::new(),
        })
    }

    #[must_use]
    pub fn confidence_ratings(&self) -> &[ConfidenceRating] {
        &self.confidence_ratings
    }

    /// Score of the most recent rating, 0 if there is none.
    #[must_use]
    pub fn latest_confidence(&self) -> f64 {
        self.confidence_ratings.last().map_or(0.0, ConfidenceRating::score)
    }

    /// Appends a rating. Earlier ratings are never rewritten.
    pub fn append_rating(&mut self, rating: ConfidenceRating) {
        self.confidence_ratings.push(rating);
    }

    #[must_use]
    pub fn conditional_probabilities(&self) -> &BTreeMap<String, f64> {
        &self.conditional_probabilities
    }

    /// Probability assigned to `state`; undeclared states have probability 0.
    #[must_use]
    pub fn probability(&self, state: &str) -> f64 {
        self.conditional_probabilities.get(state).copied().unwrap_or(0.0)
    }

    /// Replaces the distribution after checking it against `context`.
    ///
    /// Keys must be declared states of `context`, values must be finite and
    /// non-negative, and the result is normalized to sum to 1.
    ///
    /// # Errors
    ///
    /// Returns a `ValidationError` for a mismatched context, an undeclared
    /// state, an invalid value, or a distribution with no mass.
    pub fn set_conditional_probabilities(
        &mut self,
        context: &ObservationContext,
        probabilities: BTreeMap<String, f64>,
    ) -> Result<(), ValidationError> {
        if context.id != self.observation_context_id {
            return Err(ValidationError::UnknownObservationContext { id: context.id });
        }
        for (state, &value) in &probabilities {
            if !context.has_state(state) {
                return Err(ValidationError::UndeclaredState {
                    state: state.clone(),
                    context: context.name.clone(),
                });
            }
            if !value.is_finite() || value < 0.0 {
                return Err(ValidationError::InvalidProbability {
                    state: state.clone(),
                    value,
                });
            }
        }
        self.conditional_probabilities = normalize(probabilities)?;
        Ok(())
    }

    #[must_use]
    pub fn evidence(&self) -> &[Discrepancy] {
        &self.evidence
    }

    pub(crate) fn record_evidence(&mut self, discrepancy: Discrepancy) {
        self.evidence.push(discrepancy);
    }

    pub(crate) fn relate_interaction(&mut self, interaction: InteractionId) {
        if !self.related_interaction_ids.contains(&interaction) {
            self.related_interaction_ids.push(interaction);
        }
    }

    /// When this context last received evidence or a rating.
    #[must_use]
    pub fn last_evidenced_at(&self) -> Option<DateTime<Utc>> {
        let evidence = self.evidence.last().map(|d| d.timestamp);
        let rating = self.confidence_ratings.last().map(|r| r.assessed_at);
        evidence.max(rating)
    }
}

/// Scales non-negative weights to sum to 1.
pub(crate) fn normalize(
    probabilities: BTreeMap<String, f64>,
) -> Result<BTreeMap<String, f64>, ValidationError> {
    let total: f64 = probabilities.values().sum();
    if total <= 0.0 || !total.is_finite() {
        return Err(ValidationError::EmptyDistribution);
    }
    Ok(probabilities
        .into_iter()
        .map(|(state, value)| (state, value / total))
        .collect())
}

/// The belief/observation graph of one belief system.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PredictiveProcessingContext {
    observation_contexts: Vec<ObservationContext>,
    belief_contexts: Vec<BeliefContext>,
}

impl PredictiveProcessingContext {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn observation_contexts(&self) -> &[ObservationContext] {
        &self.observation_contexts
    }

    #[must_use]
    pub fn belief_contexts(&self) -> &[BeliefContext] {
        &self.belief_contexts
    }

    #[must_use]
    pub fn observation_context(&self, id: ObservationContextId) -> Option<&ObservationContext> {
        self.observation_contexts.iter().find(|c| c.id == id)
    }

    pub(crate) fn observation_context_mut(
        &mut self,
        id: ObservationContextId,
    ) -> Option<&mut ObservationContext> {
        self.observation_contexts.iter_mut().find(|c| c.id == id)
    }

    /// Adds an observation context.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::UnknownObservationContext` if the context
    /// names a parent that is not part of this graph.
    pub fn add_observation_context(
        &mut self,
        context: ObservationContext,
    ) -> Result<ObservationContextId, ValidationError> {
        if let Some(parent) = context.parent_id {
            if self.observation_context(parent).is_none() {
                return Err(ValidationError::UnknownObservationContext { id: parent });
            }
        }
        let id = context.id;
        self.observation_contexts.push(context);
        Ok(id)
    }

    /// Declares an additional state on an existing observation context.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::UnknownObservationContext` for an unknown id.
    pub fn add_state(
        &mut self,
        id: ObservationContextId,
        state: impl Into<String>,
    ) -> Result<bool, ValidationError> {
        let ctx = self
            .observation_context_mut(id)
            .ok_or(ValidationError::UnknownObservationContext { id })?;
        Ok(ctx.add_state(state))
    }

    /// Adds a belief context and returns its position.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::UnknownObservationContext` if the edge points
    /// at a context outside this graph.
    pub fn add_belief_context(&mut self, context: BeliefContext) -> Result<usize, ValidationError> {
        if self.observation_context(context.observation_context_id).is_none() {
            return Err(ValidationError::UnknownObservationContext {
                id: context.observation_context_id,
            });
        }
        self.belief_contexts.push(context);
        Ok(self.belief_contexts.len() - 1)
    }

    /// Belief contexts for one belief, with their positions.
    pub fn belief_contexts_for(
        &self,
        belief_id: BeliefId,
    ) -> impl Iterator<Item = (usize, &BeliefContext)> {
        self.belief_contexts
            .iter()
            .enumerate()
            .filter(move |(_, bc)| bc.belief_id == belief_id)
    }

    #[must_use]
    pub fn belief_context(&self, index: usize) -> Option<&BeliefContext> {
        self.belief_contexts.get(index)
    }

    /// Borrows a belief context mutably together with its observation context.
    pub(crate) fn split_mut(
        &mut self,
        index: usize,
    ) -> Option<(&mut BeliefContext, &mut ObservationContext)> {
        let bc = self.belief_contexts.get_mut(index)?;
        let ctx = self
            .observation_contexts
            .iter_mut()
            .find(|c| c.id == bc.observation_context_id)?;
        Some((bc, ctx))
    }

    /// True if at least one belief context references `belief_id`.
    #[must_use]
    pub fn has_prediction(&self, belief_id: BeliefId) -> bool {
        self.belief_contexts.iter().any(|bc| bc.belief_id == belief_id)
    }

    /// Children of `parent` in insertion order.
    pub fn children_of(
        &self,
        parent: ObservationContextId,
    ) -> impl Iterator<Item = &ObservationContext> {
        self.observation_contexts
            .iter()
            .filter(move |c| c.parent_id == Some(parent))
    }

    /// Names from the root down to `id`, or `None` for an unknown id or a
    /// parent chain that loops.
    #[must_use]
    pub fn name_path(&self, id: ObservationContextId) -> Option<Vec<String>> {
        let mut path = Vec::new();
        let mut next = Some(id);
        while let Some(current) = next {
            if path.len() == self.observation_contexts.len() {
                return None;
            }
            let context = self.observation_context(current)?;
            path.push(context.name.clone());
            next = context.parent_id;
        }
        path.reverse();
        Some(path)
    }
}
