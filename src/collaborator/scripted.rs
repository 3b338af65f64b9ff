//! A deterministic, rule-based language collaborator.
//!
//! Splits text on punctuation and matches answers by position. Used by the
//! test suites, the benchmark, and the terminal session binary.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use crate::belief::{normalize_statement, BeliefSystem};
use crate::context::EpistemicEmotion;
use crate::dialectic::{DialecticalInteraction, QaPair};
use crate::error::CollaboratorError;
use crate::ontology::Ontology;

use super::{BeliefSystemAnalysis, ExtractedBelief, LanguageCollaborator};

const DEFAULT_OPENER: &str = "What is something you believe strongly about yourself?";

/// Rule-based collaborator with an optional queue of canned questions.
///
/// Question generation pops the queue first. When it is empty the least
/// confident belief in the ontology that has not been asked about yet is
/// challenged, and failing that the opener is asked.
#[derive(Debug)]
pub struct ScriptedCollaborator {
    questions: Mutex<VecDeque<String>>,
    observations: HashMap<String, String>,
    opener: String,
}

impl Default for ScriptedCollaborator {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedCollaborator {
    #[must_use]
    pub fn new() -> Self {
        Self {
            questions: Mutex::new(VecDeque::new()),
            observations: HashMap::new(),
            opener: DEFAULT_OPENER.to_string(),
        }
    }

    /// Queues canned questions, asked in order before any generated one.
    #[must_use]
    pub fn with_questions<I, S>(self, questions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if let Ok(mut queue) = self.questions.lock() {
            queue.extend(questions.into_iter().map(Into::into));
        }
        self
    }

    #[must_use]
    pub fn with_opener(mut self, opener: impl Into<String>) -> Self {
        self.opener = opener.into();
        self
    }

    /// Reports `state` whenever `statement` is extracted.
    #[must_use]
    pub fn observe(mut self, statement: &str, state: impl Into<String>) -> Self {
        self.observations.insert(normalize_statement(statement), state.into());
        self
    }

    /// Appends one canned question to the queue.
    ///
    /// # Errors
    ///
    /// Returns `CollaboratorError::Unavailable` if the queue lock is poisoned.
    pub fn push_question(&self, question: impl Into<String>) -> Result<(), CollaboratorError> {
        self.queue("push_question")?.push_back(question.into());
        Ok(())
    }

    fn queue(
        &self,
        operation: &'static str,
    ) -> Result<std::sync::MutexGuard<'_, VecDeque<String>>, CollaboratorError> {
        self.questions.lock().map_err(|_| CollaboratorError::Unavailable {
            operation,
            message: "poisoned lock: scripted.questions".to_string(),
        })
    }
}

fn challenge(statement: &str) -> String {
    format!("What would change your mind about '{statement}'?")
}

fn sentences(text: &str) -> impl Iterator<Item = &str> {
    text.split(['.', '!', '?', ';', '\n'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

impl LanguageCollaborator for ScriptedCollaborator {
    fn generate_question(&self, ontology: &Ontology, history: &[QaPair]) -> Result<String, CollaboratorError> {
        if let Some(question) = self.queue("generate_question")?.pop_front() {
            return Ok(question);
        }

        let asked = |q: &str| history.iter().any(|pair| pair.question == q);
        let mut candidates: Vec<_> = ontology.beliefs.iter().collect();
        candidates.sort_by(|a, b| a.confidence.total_cmp(&b.confidence));
        let generated = candidates
            .into_iter()
            .map(|b| challenge(&b.belief.text()))
            .find(|q| !asked(q));

        Ok(generated.unwrap_or_else(|| self.opener.clone()))
    }

    fn extract_beliefs(&self, _question: &str, answer: &str) -> Result<Vec<ExtractedBelief>, CollaboratorError> {
        Ok(sentences(answer)
            .map(|sentence| {
                let belief = ExtractedBelief::statement(sentence);
                match self.observations.get(&normalize_statement(sentence)) {
                    Some(state) => belief.observing(state.clone()),
                    None => belief,
                }
            })
            .collect())
    }

    fn extract_questions_from_text(&self, blob: &str) -> Result<Vec<String>, CollaboratorError> {
        let mut questions = Vec::new();
        let mut rest = blob;
        while let Some(end) = rest.find('?') {
            let (head, tail) = rest.split_at(end + 1);
            // Keep only the last sentence before the question mark.
            let start = head[..head.len() - 1]
                .rfind(['.', '!', '\n'])
                .map_or(0, |i| i + 1);
            let question = head[start..].trim();
            if question.len() > 1 {
                questions.push(question.to_string());
            }
            rest = tail;
        }
        Ok(questions)
    }

    fn match_answers_to_questions(&self, blob: &str, questions: &[String]) -> Result<Vec<String>, CollaboratorError> {
        let mut lines = blob.lines().map(str::trim).filter(|l| !l.is_empty());
        Ok(questions
            .iter()
            .map(|_| lines.next().unwrap_or_default().to_string())
            .collect())
    }

    fn analyze_belief_system(
        &self,
        system: &BeliefSystem,
        _latest: Option<&DialecticalInteraction>,
    ) -> Result<BeliefSystemAnalysis, CollaboratorError> {
        let metrics = crate::context::belief_metrics(system);
        let contexts = system
            .predictive_processing()
            .map(|ppc| ppc.belief_contexts())
            .unwrap_or_default();

        #[allow(clippy::cast_precision_loss)]
        let (consistency, coherence) = if contexts.is_empty() {
            (1.0, 0.0)
        } else {
            let n = contexts.len() as f64;
            let surprised = contexts
                .iter()
                .filter(|bc| bc.epistemic_emotion == EpistemicEmotion::Surprise)
                .count() as f64;
            let mean_confidence = contexts.iter().map(|bc| bc.latest_confidence()).sum::<f64>() / n;
            (1.0 - surprised / n, mean_confidence)
        };
        let falsifiability = metrics.clarification_score;
        let overall_score = (coherence + consistency + falsifiability) / 3.0;

        let ppc = system.predictive_processing();
        let mut recommendations = Vec::new();
        let mut verified_beliefs = Vec::new();
        for belief in system.active_beliefs() {
            if ppc.is_some_and(|p| p.has_prediction(belief.id)) {
                verified_beliefs.push(belief.id);
            } else {
                recommendations.push(format!("State a testable prediction for '{}'", belief.text()));
            }
        }

        Ok(BeliefSystemAnalysis {
            coherence,
            consistency,
            falsifiability,
            overall_score,
            feedback: format!(
                "{} active beliefs, {} with predictions",
                metrics.total_beliefs, metrics.total_falsifiable_beliefs
            ),
            recommendations,
            verified_beliefs,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::belief::SelfModelId;
    use crate::config::RevisionConfig;
    use crate::context::link_interaction_beliefs;
    use crate::dialectic::InteractionId;

    #[test]
    fn test_queued_questions_come_first() {
        let collab = ScriptedCollaborator::new().with_questions(["First?", "Second?"]);
        let ontology = Ontology::default();
        assert_eq!(collab.generate_question(&ontology, &[]).unwrap(), "First?");
        assert_eq!(collab.generate_question(&ontology, &[]).unwrap(), "Second?");
        assert_eq!(collab.generate_question(&ontology, &[]).unwrap(), DEFAULT_OPENER);
    }

    #[test]
    fn test_challenges_unasked_beliefs() {
        let mut system = BeliefSystem::new(SelfModelId::new("s"));
        link_interaction_beliefs(
            &mut system,
            "q",
            "a",
            &[ExtractedBelief::statement("I sleep well")],
            InteractionId::new(),
            &RevisionConfig::default(),
        )
        .unwrap();
        let ontology = Ontology::from_belief_system(&system);
        let collab = ScriptedCollaborator::new();

        let question = collab.generate_question(&ontology, &[]).unwrap();
        assert_eq!(question, "What would change your mind about 'I sleep well'?");

        let history = [QaPair {
            question,
            answer: "nothing".into(),
        }];
        assert_eq!(collab.generate_question(&ontology, &history).unwrap(), DEFAULT_OPENER);
    }

    #[test]
    fn test_extract_beliefs_splits_sentences() {
        let collab = ScriptedCollaborator::new().observe("I skip breakfast", "Negative");
        let beliefs = collab
            .extract_beliefs("q", "I exercise daily. I skip breakfast; really!")
            .unwrap();
        let contents: Vec<_> = beliefs.iter().map(|b| b.content.as_str()).collect();
        assert_eq!(contents, ["I exercise daily", "I skip breakfast", "really"]);
        assert_eq!(beliefs[0].observed_state, None);
        assert_eq!(beliefs[1].observed_state.as_deref(), Some("Negative"));
    }

    #[test]
    fn test_extract_questions() {
        let collab = ScriptedCollaborator::new();
        let questions = collab
            .extract_questions_from_text("Intro text. Do you run? How often?\nNote: none")
            .unwrap();
        assert_eq!(questions, ["Do you run?", "How often?"]);
        assert!(collab.extract_questions_from_text("no questions here").unwrap().is_empty());
    }

    #[test]
    fn test_match_answers_pads_with_empty() {
        let collab = ScriptedCollaborator::new();
        let questions = vec!["a?".to_string(), "b?".to_string(), "c?".to_string()];
        let answers = collab.match_answers_to_questions("yes\n\nno\n", &questions).unwrap();
        assert_eq!(answers, ["yes", "no", ""]);
    }

    #[test]
    fn test_analysis_scores_are_bounded() {
        let mut system = BeliefSystem::new(SelfModelId::new("s"));
        link_interaction_beliefs(
            &mut system,
            "q",
            "a",
            &[ExtractedBelief::statement("I read at night")],
            InteractionId::new(),
            &RevisionConfig::default(),
        )
        .unwrap();
        system.add_or_reuse(crate::belief::BeliefType::Statement, "I like tea").unwrap();

        let analysis = ScriptedCollaborator::new()
            .analyze_belief_system(&system, None)
            .unwrap()
            .validate()
            .unwrap();
        assert!((analysis.falsifiability - 0.5).abs() < 1e-12);
        assert!((analysis.consistency - 1.0).abs() < 1e-12);
        assert_eq!(analysis.verified_beliefs.len(), 1);
        assert_eq!(analysis.recommendations.len(), 1);
    }
}
