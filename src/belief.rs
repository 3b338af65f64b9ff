//! Beliefs and the belief system that owns them.
//!
//! A belief is immutable once created: the only mutation allowed is flipping
//! its `active` flag, and rewording happens by superseding it with a new
//! version. Beliefs are never physically removed from a belief system.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::context::PredictiveProcessingContext;
use crate::error::{NotFoundError, ValidationError};
use crate::ontology::Ontology;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BeliefId(Uuid);

impl BeliefId {
    /// Creates a new random belief ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for BeliefId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for BeliefId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of the subject whose beliefs are tracked.
///
/// Self models live outside this crate, so the identifier is an opaque string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SelfModelId(String);

impl SelfModelId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SelfModelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BeliefType {
    #[default]
    Statement,
    Falsifiable,
    Causal,
    Clarification,
}

impl fmt::Display for BeliefType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Statement => write!(f, "statement"),
            Self::Falsifiable => write!(f, "falsifiable"),
            Self::Causal => write!(f, "causal"),
            Self::Clarification => write!(f, "clarification"),
        }
    }
}

/// A stored statement about what the subject holds to be true.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Belief {
    pub id: BeliefId,
    pub owner_id: SelfModelId,
    /// Starts at 1; each supersession creates a new belief with `version + 1`.
    pub version: u32,
    pub belief_type: BeliefType,
    /// Ordered text fragments; joined with spaces they form the statement.
    pub content: Vec<String>,
    pub active: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supersedes: Option<BeliefId>,
}

impl Belief {
    /// Creates an active, first-version belief.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::EmptyBeliefContent` if every fragment is blank.
    pub fn new(
        owner_id: SelfModelId,
        belief_type: BeliefType,
        content: Vec<String>,
    ) -> Result<Self, ValidationError> {
        if content.iter().all(|fragment| fragment.trim().is_empty()) {
            return Err(ValidationError::EmptyBeliefContent);
        }
        Ok(Self {
            id: BeliefId::new(),
            owner_id,
            version: 1,
            belief_type,
            content,
            active: true,
            supersedes: None,
        })
    }

    /// The full statement text.
    #[must_use]
    pub fn text(&self) -> String {
        self.content.join(" ")
    }

    /// Lowercased, whitespace-collapsed text used to detect restated beliefs.
    #[must_use]
    pub fn normalized_text(&self) -> String {
        normalize_statement(&self.text())
    }
}

pub(crate) fn normalize_statement(text: &str) -> String {
    text.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
        .trim_end_matches(['.', '!', '?'])
        .to_string()
}

/// A kind of epistemic context attached to a belief system.
///
/// Only predictive processing is populated today; other context kinds are
/// added as further variants so every consumer has to handle them explicitly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EpistemicContext {
    PredictiveProcessing(PredictiveProcessingContext),
}

/// Summary counts over a belief system.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct BeliefMetrics {
    pub total_beliefs: usize,
    /// Beliefs with at least one belief context, i.e. a testable prediction.
    pub total_falsifiable_beliefs: usize,
    /// Beliefs whose type is `Statement`.
    pub total_statements: usize,
    /// `total_falsifiable_beliefs / total_beliefs`, 0 when there are no beliefs.
    pub clarification_score: f64,
}

/// Every belief tracked for one self model plus the graph that links them to
/// observation contexts.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct BeliefSystem {
    pub self_model_id: SelfModelId,

    /// Storage version of this document; bumped on every committed update.
    #[serde(default)]
    pub version: u64,

    beliefs: Vec<Belief>,

    pub epistemic_contexts: Vec<EpistemicContext>,

    #[serde(default)]
    pub metrics: BeliefMetrics,

    /// The last bounded ontology handed to question generation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ontology: Option<Ontology>,
}

impl BeliefSystem {
    #[must_use]
    pub fn new(self_model_id: SelfModelId) -> Self {
        Self {
            self_model_id,
            ..Self::default()
        }
    }

    /// All beliefs in insertion order, including inactive ones.
    #[must_use]
    pub fn beliefs(&self) -> &[Belief] {
        &self.beliefs
    }

    pub fn active_beliefs(&self) -> impl Iterator<Item = &Belief> {
        self.beliefs.iter().filter(|b| b.active)
    }

    #[must_use]
    pub fn belief(&self, id: BeliefId) -> Option<&Belief> {
        self.beliefs.iter().find(|b| b.id == id)
    }

    /// Active belief whose statement matches `text` after normalization.
    #[must_use]
    pub fn find_active_by_text(&self, text: &str) -> Option<&Belief> {
        let needle = normalize_statement(text);
        self.active_beliefs().find(|b| b.normalized_text() == needle)
    }

    /// Adds a belief.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::DuplicateBelief` if a belief with the same id exists.
    pub fn add_belief(&mut self, belief: Belief) -> Result<BeliefId, ValidationError> {
        if self.belief(belief.id).is_some() {
            return Err(ValidationError::DuplicateBelief { id: belief.id });
        }
        let id = belief.id;
        self.beliefs.push(belief);
        Ok(id)
    }

    /// Returns the active belief with the same statement, or records a new one.
    ///
    /// The second element is true when a new belief was created.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::EmptyBeliefContent` for blank statements.
    pub fn add_or_reuse(
        &mut self,
        belief_type: BeliefType,
        statement: &str,
    ) -> Result<(BeliefId, bool), ValidationError> {
        if let Some(existing) = self.find_active_by_text(statement) {
            return Ok((existing.id, false));
        }
        let belief = Belief::new(
            self.self_model_id.clone(),
            belief_type,
            vec![statement.trim().to_string()],
        )?;
        Ok((self.add_belief(belief)?, true))
    }

    /// Marks a belief inactive. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns `NotFoundError::Belief` if the id is unknown.
    pub fn deactivate(&mut self, id: BeliefId) -> Result<(), NotFoundError> {
        let belief = self
            .beliefs
            .iter_mut()
            .find(|b| b.id == id)
            .ok_or(NotFoundError::Belief(id))?;
        belief.active = false;
        Ok(())
    }

    /// Rewords a belief by creating its next version and deactivating the old one.
    ///
    /// # Errors
    ///
    /// Returns `NotFoundError` for an unknown id and `ValidationError` for blank content.
    pub fn supersede(
        &mut self,
        id: BeliefId,
        content: Vec<String>,
    ) -> Result<BeliefId, crate::error::DialecticError> {
        let old = self.belief(id).ok_or(NotFoundError::Belief(id))?.clone();
        let mut next = Belief::new(old.owner_id.clone(), old.belief_type, content)?;
        next.version = old.version + 1;
        next.supersedes = Some(old.id);
        let next_id = self.add_belief(next)?;
        self.deactivate(id)?;
        Ok(next_id)
    }

    /// The predictive-processing context, if one has been created.
    #[must_use]
    pub fn predictive_processing(&self) -> Option<&PredictiveProcessingContext> {
        self.epistemic_contexts.iter().find_map(|ctx| match ctx {
            EpistemicContext::PredictiveProcessing(ppc) => Some(ppc),
        })
    }
}
