//! The language collaborator boundary.
//!
//! Question generation, belief extraction, and blob matching are delegated to
//! an implementation of [`LanguageCollaborator`]. The engine never calls one
//! directly; it goes through [`GuardedCollaborator`], which adds timeouts,
//! retries, and a circuit breaker.

mod guarded;
mod scripted;

pub use guarded::{CircuitState, GuardedCollaborator};
pub use scripted::ScriptedCollaborator;

use serde::{Deserialize, Serialize};

use crate::belief::{BeliefId, BeliefSystem, BeliefType};
use crate::dialectic::{DialecticalInteraction, QaPair};
use crate::error::CollaboratorError;
use crate::ontology::Ontology;

/// A belief statement found in a question/answer exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedBelief {
    pub content: String,
    #[serde(default)]
    pub belief_type: BeliefType,
    /// State the answer reports for this belief; `None` means it affirms it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_state: Option<String>,
}

impl ExtractedBelief {
    /// An affirmed `Statement` belief.
    pub fn statement(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            belief_type: BeliefType::Statement,
            observed_state: None,
        }
    }

    #[must_use]
    pub fn with_type(mut self, belief_type: BeliefType) -> Self {
        self.belief_type = belief_type;
        self
    }

    #[must_use]
    pub fn observing(mut self, state: impl Into<String>) -> Self {
        self.observed_state = Some(state.into());
        self
    }
}

/// Assessment of a belief system returned by the collaborator.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct BeliefSystemAnalysis {
    pub coherence: f64,
    pub consistency: f64,
    pub falsifiability: f64,
    pub overall_score: f64,
    pub feedback: String,
    #[serde(default)]
    pub recommendations: Vec<String>,
    #[serde(default)]
    pub verified_beliefs: Vec<BeliefId>,
}

impl BeliefSystemAnalysis {
    /// Checks that every score lies in [0, 1].
    ///
    /// # Errors
    ///
    /// Returns `CollaboratorError::MalformedResponse` naming the bad score.
    pub fn validate(self) -> Result<Self, CollaboratorError> {
        for (name, score) in [
            ("coherence", self.coherence),
            ("consistency", self.consistency),
            ("falsifiability", self.falsifiability),
            ("overall_score", self.overall_score),
        ] {
            if !(0.0..=1.0).contains(&score) {
                return Err(CollaboratorError::MalformedResponse {
                    operation: "analyze_belief_system",
                    reason: format!("{name} {score} is outside [0, 1]"),
                });
            }
        }
        Ok(self)
    }
}

/// Natural-language capabilities the engine relies on.
///
/// Calls may block for a long time; callers are expected to wrap
/// implementations in a [`GuardedCollaborator`].
pub trait LanguageCollaborator: Send + Sync {
    /// Next question to ask, given the bounded ontology and the answered history.
    fn generate_question(&self, ontology: &Ontology, history: &[QaPair]) -> Result<String, CollaboratorError>;

    /// Belief statements expressed by one exchange.
    fn extract_beliefs(&self, question: &str, answer: &str) -> Result<Vec<ExtractedBelief>, CollaboratorError>;

    /// Discrete questions contained in free text.
    fn extract_questions_from_text(&self, blob: &str) -> Result<Vec<String>, CollaboratorError>;

    /// One answer per question, same order and length; an empty string means unanswered.
    fn match_answers_to_questions(&self, blob: &str, questions: &[String]) -> Result<Vec<String>, CollaboratorError>;

    /// Scores the belief system, optionally in light of the latest interaction.
    fn analyze_belief_system(
        &self,
        system: &BeliefSystem,
        latest: Option<&DialecticalInteraction>,
    ) -> Result<BeliefSystemAnalysis, CollaboratorError>;
}
