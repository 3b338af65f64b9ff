//! Dialectics: ordered question/answer conversations about a subject's beliefs.
//!
//! A [`Dialectic`] owns its interaction list; the most recent interaction is
//! last. Each interaction moves `PendingAnswer -> Answered` at most once.

mod engine;

pub use engine::{DialecticEngine, UpdateOutcome, UpdateRequest};

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::belief::{Belief, BeliefSystem, SelfModelId};
use crate::collaborator::BeliefSystemAnalysis;
use crate::error::InvalidStateError;
use crate::storage::Record;

/// Unique identifier for a dialectic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DialecticId(Uuid);

impl DialecticId {
    /// Creates a new random dialectic ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for DialecticId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for DialecticId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for DialecticId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s.trim())?))
    }
}

/// Unique identifier for an interaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InteractionId(Uuid);

impl InteractionId {
    /// Creates a new random interaction ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for InteractionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for InteractionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractionStatus {
    /// Zero value; never a transition target.
    #[default]
    Invalid,
    PendingAnswer,
    Answered,
}

impl fmt::Display for InteractionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Invalid => write!(f, "invalid"),
            Self::PendingAnswer => write!(f, "pending_answer"),
            Self::Answered => write!(f, "answered"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractionType {
    QuestionAnswer,
    HypothesisEvidence,
    ActionOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
    pub text: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Answer {
    pub text: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionAnswer {
    pub question: Question,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer: Option<Answer>,
    /// Beliefs extracted from this exchange, as they stood when it was answered.
    #[serde(default)]
    pub extracted_beliefs: Vec<Belief>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HypothesisEvidence {
    pub hypothesis: String,
    #[serde(default)]
    pub evidence: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionOutcome {
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<String>,
}

/// Payload of an interaction; the variant determines its [`InteractionType`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InteractionData {
    QuestionAnswer(QuestionAnswer),
    HypothesisEvidence(HypothesisEvidence),
    ActionOutcome(ActionOutcome),
}

/// One step of a dialectic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DialecticalInteraction {
    pub id: InteractionId,
    status: InteractionStatus,
    pub data: InteractionData,
    #[serde(default)]
    pub perspectives: Vec<String>,
    pub updated_at: DateTime<Utc>,
}

impl DialecticalInteraction {
    /// A question waiting for its answer.
    pub fn pending_question(text: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: InteractionId::new(),
            status: InteractionStatus::PendingAnswer,
            data: InteractionData::QuestionAnswer(QuestionAnswer {
                question: Question {
                    text: text.into(),
                    created_at: now,
                },
                answer: None,
                extracted_beliefs: Vec::new(),
                updated_at: now,
            }),
            perspectives: Vec::new(),
            updated_at: now,
        }
    }

    #[must_use]
    pub fn with_perspectives(mut self, perspectives: Vec<String>) -> Self {
        self.perspectives = perspectives;
        self
    }

    #[must_use]
    pub const fn status(&self) -> InteractionStatus {
        self.status
    }

    #[must_use]
    pub const fn interaction_type(&self) -> InteractionType {
        match self.data {
            InteractionData::QuestionAnswer(_) => InteractionType::QuestionAnswer,
            InteractionData::HypothesisEvidence(_) => InteractionType::HypothesisEvidence,
            InteractionData::ActionOutcome(_) => InteractionType::ActionOutcome,
        }
    }

    #[must_use]
    pub fn question_answer(&self) -> Option<&QuestionAnswer> {
        match &self.data {
            InteractionData::QuestionAnswer(qa) => Some(qa),
            _ => None,
        }
    }

    /// Question text, for question/answer interactions.
    #[must_use]
    pub fn question(&self) -> Option<&str> {
        self.question_answer().map(|qa| qa.question.text.as_str())
    }

    /// Answer text, once answered.
    #[must_use]
    pub fn answer(&self) -> Option<&str> {
        self.question_answer()
            .and_then(|qa| qa.answer.as_ref())
            .map(|a| a.text.as_str())
    }

    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.status == InteractionStatus::PendingAnswer
    }

    /// Moves a pending question/answer interaction to `Answered`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidStateError::NotPendingAnswer` unless the interaction is
    /// pending, and `InvalidStateError::NotQuestionAnswer` for other payloads.
    pub fn mark_answered(
        &mut self,
        answer: impl Into<String>,
        extracted_beliefs: Vec<Belief>,
    ) -> Result<(), InvalidStateError> {
        if self.status != InteractionStatus::PendingAnswer {
            return Err(InvalidStateError::NotPendingAnswer {
                interaction: self.id,
                status: self.status,
            });
        }
        let InteractionData::QuestionAnswer(qa) = &mut self.data else {
            return Err(InvalidStateError::NotQuestionAnswer { interaction: self.id });
        };
        let now = Utc::now();
        qa.answer = Some(Answer {
            text: answer.into(),
            created_at: now,
        });
        qa.extracted_beliefs = extracted_beliefs;
        qa.updated_at = now;
        self.status = InteractionStatus::Answered;
        self.updated_at = now;
        Ok(())
    }
}

/// A question and its answer, as handed to question generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QaPair {
    pub question: String,
    pub answer: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentType {
    #[default]
    Interviewer,
}

/// What the dialectic is probing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DialecticType {
    /// Open-ended exploration of the subject's beliefs.
    #[default]
    Default,
    /// Anchored to a philosophy whose structured text seeds observation contexts.
    Philosophy { philosophy_id: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Agent {
    pub agent_type: AgentType,
    pub dialectic_type: DialecticType,
}

/// An append-only conversation used to elicit and refine beliefs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dialectic {
    pub id: DialecticId,
    pub self_model_id: SelfModelId,
    pub agent: Agent,
    user_interactions: Vec<DialecticalInteraction>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub belief_system_snapshot: Option<BeliefSystem>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analysis: Option<BeliefSystemAnalysis>,

    /// Storage version of this document; bumped on every committed update.
    #[serde(default)]
    pub version: u64,

    pub created_at: DateTime<Utc>,
}

impl Dialectic {
    /// Creates a dialectic with no interactions.
    #[must_use]
    pub fn new(self_model_id: SelfModelId, dialectic_type: DialecticType) -> Self {
        Self {
            id: DialecticId::new(),
            self_model_id,
            agent: Agent {
                agent_type: AgentType::Interviewer,
                dialectic_type,
            },
            user_interactions: Vec::new(),
            belief_system_snapshot: None,
            analysis: None,
            version: 0,
            created_at: Utc::now(),
        }
    }

    #[must_use]
    pub fn interactions(&self) -> &[DialecticalInteraction] {
        &self.user_interactions
    }

    #[must_use]
    pub fn last_interaction(&self) -> Option<&DialecticalInteraction> {
        self.user_interactions.last()
    }

    pub(crate) fn interaction_mut(&mut self, id: InteractionId) -> Option<&mut DialecticalInteraction> {
        self.user_interactions.iter_mut().find(|i| i.id == id)
    }

    /// Appends a new interaction at the end of the history.
    pub fn push_interaction(&mut self, interaction: DialecticalInteraction) {
        self.user_interactions.push(interaction);
    }

    pub fn pending(&self) -> impl Iterator<Item = &DialecticalInteraction> {
        self.user_interactions.iter().filter(|i| i.is_pending())
    }

    /// Answered question/answer pairs, oldest first.
    #[must_use]
    pub fn answered_pairs(&self) -> Vec<QaPair> {
        self.user_interactions
            .iter()
            .filter(|i| i.status() == InteractionStatus::Answered)
            .filter_map(|i| {
                Some(QaPair {
                    question: i.question()?.to_string(),
                    answer: i.answer()?.to_string(),
                })
            })
            .collect()
    }

    /// Question texts of every question/answer interaction, oldest first.
    #[must_use]
    pub fn question_texts(&self) -> Vec<&str> {
        self.user_interactions.iter().filter_map(DialecticalInteraction::question).collect()
    }

    /// Storage key of this dialectic within its self model's scope.
    #[must_use]
    pub fn storage_key(&self) -> String {
        dialectic_key(self.id)
    }
}

pub(crate) fn dialectic_key(id: DialecticId) -> String {
    format!("dialectic/{id}")
}

/// Storage key of a self model's belief system.
pub(crate) const BELIEF_SYSTEM_KEY: &str = "belief_system";

impl Record for Dialectic {
    const RECORD_TYPE: &'static str = "dialectic";
}

impl Record for BeliefSystem {
    const RECORD_TYPE: &'static str = "belief_system";
}
