//! Operations that create and link records in the predictive-processing graph.

use std::collections::BTreeMap;

use tracing::debug;

use crate::belief::{BeliefId, BeliefMetrics, BeliefSystem, EpistemicContext};
use crate::collaborator::ExtractedBelief;
use crate::config::RevisionConfig;
use crate::dialectic::InteractionId;
use crate::error::ValidationError;

use super::{
    BeliefContext, EpistemicEmotion, ObservationContext, ObservationContextId,
    PredictiveProcessingContext, AFFIRMED_STATE,
};

const MAX_NAME_CHARS: usize = 120;

/// Returns the belief system's predictive-processing context, creating it on
/// first use. Calling it again never adds a second epistemic context.
pub fn ensure_context(system: &mut BeliefSystem) -> &mut PredictiveProcessingContext {
    let position = system
        .epistemic_contexts
        .iter()
        .position(|ctx| matches!(ctx, EpistemicContext::PredictiveProcessing(_)));
    let index = position.unwrap_or_else(|| {
        system
            .epistemic_contexts
            .push(EpistemicContext::PredictiveProcessing(PredictiveProcessingContext::new()));
        system.epistemic_contexts.len() - 1
    });
    match &mut system.epistemic_contexts[index] {
        EpistemicContext::PredictiveProcessing(ppc) => ppc,
    }
}

/// Creates the observation context for one question/answer turn.
pub fn create_observation_context<'a>(
    ppc: &'a mut PredictiveProcessingContext,
    question: &str,
    answer: &str,
) -> &'a ObservationContext {
    let subject = if question.trim().is_empty() { answer } else { question };
    let subject: String = subject.trim().chars().take(MAX_NAME_CHARS).collect();
    let context = ObservationContext::with_default_states(format!("Response to '{subject}'"));
    ppc.observation_contexts.push(context);
    &ppc.observation_contexts[ppc.observation_contexts.len() - 1]
}

/// Links a belief to an observation context with one default confidence rating.
///
/// # Errors
///
/// Returns `ValidationError` if the observation context is unknown or the
/// confidence is outside [0, 1].
pub fn create_belief_context(
    ppc: &mut PredictiveProcessingContext,
    belief_id: BeliefId,
    observation_context_id: ObservationContextId,
    confidence: f64,
) -> Result<&BeliefContext, ValidationError> {
    let context = BeliefContext::new(belief_id, observation_context_id, confidence)?;
    let index = ppc.add_belief_context(context)?;
    Ok(&ppc.belief_contexts[index])
}

/// A belief context that existed before this turn and whose belief was restated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TouchedContext {
    pub index: usize,
    pub observed_state: String,
}

/// What [`link_interaction_beliefs`] changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkOutcome {
    pub observation_context_id: ObservationContextId,
    /// Every belief mentioned in the turn, in extraction order, without repeats.
    pub linked_beliefs: Vec<BeliefId>,
    /// Beliefs that did not exist before this turn.
    pub created_beliefs: Vec<BeliefId>,
    /// Positions of the belief contexts created for this turn.
    pub new_belief_contexts: Vec<usize>,
    /// Earlier belief contexts of restated beliefs; these get revised.
    pub touched: Vec<TouchedContext>,
}

/// Records one turn in the graph: a fresh observation context plus one
/// belief context per extracted belief, each seeded with the default
/// confidence and a distribution skewed toward the believed outcome.
///
/// # Errors
///
/// Returns `ValidationError` for blank belief statements or an invalid
/// default confidence.
pub fn link_interaction_beliefs(
    system: &mut BeliefSystem,
    question: &str,
    answer: &str,
    extracted: &[ExtractedBelief],
    interaction: InteractionId,
    config: &RevisionConfig,
) -> Result<LinkOutcome, ValidationError> {
    ensure_context(system);

    let mut linked_beliefs = Vec::new();
    let mut created_beliefs = Vec::new();
    let mut observed = Vec::new();
    for item in extracted {
        let (belief_id, created) = system.add_or_reuse(item.belief_type, &item.content)?;
        if linked_beliefs.contains(&belief_id) {
            continue;
        }
        if created {
            created_beliefs.push(belief_id);
        }
        linked_beliefs.push(belief_id);
        observed.push(
            item.observed_state
                .clone()
                .unwrap_or_else(|| AFFIRMED_STATE.to_string()),
        );
    }

    let ppc = ensure_context(system);

    let touched: Vec<TouchedContext> = linked_beliefs
        .iter()
        .zip(&observed)
        .flat_map(|(belief_id, state)| {
            ppc.belief_contexts_for(*belief_id)
                .map(|(index, _)| TouchedContext {
                    index,
                    observed_state: state.clone(),
                })
                .collect::<Vec<_>>()
        })
        .collect();

    let context = create_observation_context(ppc, question, answer).clone();

    let mut new_belief_contexts = Vec::with_capacity(linked_beliefs.len());
    for (belief_id, state) in linked_beliefs.iter().zip(&observed) {
        let believed = if context.has_state(state) { state.as_str() } else { AFFIRMED_STATE };
        let mut bc = BeliefContext::new(*belief_id, context.id, config.default_confidence)?;
        bc.set_conditional_probabilities(
            &context,
            skewed_distribution(context.possible_states(), believed, config.believed_outcome_probability),
        )?;
        bc.epistemic_emotion = EpistemicEmotion::Confirmation;
        bc.emotion_intensity = config.initial_emotion_intensity;
        bc.relate_interaction(interaction);
        new_belief_contexts.push(ppc.add_belief_context(bc)?);
    }

    debug!(
        observation_context = %context.id,
        linked = linked_beliefs.len(),
        created = created_beliefs.len(),
        touched = touched.len(),
        "Interaction beliefs linked"
    );

    Ok(LinkOutcome {
        observation_context_id: context.id,
        linked_beliefs,
        created_beliefs,
        new_belief_contexts,
        touched,
    })
}

/// `probability` on `believed`, the remainder spread evenly over the other states.
fn skewed_distribution(states: &[String], believed: &str, probability: f64) -> BTreeMap<String, f64> {
    let others = states.len().saturating_sub(1);
    #[allow(clippy::cast_precision_loss)]
    let rest = if others == 0 { 0.0 } else { (1.0 - probability) / others as f64 };
    states
        .iter()
        .map(|state| {
            let p = if state == believed { probability } else { rest };
            (state.clone(), p)
        })
        .collect()
}

/// Observation contexts a belief makes predictions about, in encounter order.
#[must_use]
pub fn observations_for_belief(
    ppc: &PredictiveProcessingContext,
    belief_id: BeliefId,
) -> Vec<&ObservationContext> {
    let mut seen: Vec<ObservationContextId> = Vec::new();
    let mut out = Vec::new();
    for (_, bc) in ppc.belief_contexts_for(belief_id) {
        if seen.contains(&bc.observation_context_id) {
            continue;
        }
        seen.push(bc.observation_context_id);
        if let Some(ctx) = ppc.observation_context(bc.observation_context_id) {
            out.push(ctx);
        }
    }
    out
}

/// Counts over the active beliefs of a belief system.
#[must_use]
pub fn belief_metrics(system: &BeliefSystem) -> BeliefMetrics {
    let ppc = system.predictive_processing();
    let mut metrics = BeliefMetrics::default();
    for belief in system.active_beliefs() {
        metrics.total_beliefs += 1;
        if belief.belief_type == crate::belief::BeliefType::Statement {
            metrics.total_statements += 1;
        }
        if ppc.is_some_and(|p| p.has_prediction(belief.id)) {
            metrics.total_falsifiable_beliefs += 1;
        }
    }
    metrics.clarification_score = if metrics.total_beliefs == 0 {
        0.0
    } else {
        #[allow(clippy::cast_precision_loss)]
        let score = metrics.total_falsifiable_beliefs as f64 / metrics.total_beliefs as f64;
        score
    };
    metrics
}
