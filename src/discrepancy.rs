//! Discrepancy scoring and belief revision.
//!
//! A belief context predicts a distribution over its observation context's
//! states. When a state is observed the engine measures how far the
//! prediction was off, appends a revised confidence rating, labels the
//! reaction with an epistemic emotion, and keeps an immutable
//! [`Discrepancy`] record of the comparison.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::confidence::ConfidenceRating;
use crate::config::RevisionConfig;
use crate::context::{BeliefContext, EpistemicEmotion, PredictiveProcessingContext};
use crate::dialectic::InteractionId;
use crate::error::{DialecticError, DialecticResult};

/// One comparison between a predicted distribution and an observed state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Discrepancy {
    pub interaction_id: InteractionId,
    pub observed_state: String,
    /// `1 - P(observed_state)` under the prior.
    pub score: f64,
    pub prior_probabilities: BTreeMap<String, f64>,
    pub posterior_probabilities: BTreeMap<String, f64>,
    pub kl_divergence: f64,
    pub pointwise_kl_terms: BTreeMap<String, f64>,
    pub is_counterfactual: bool,
    pub timestamp: DateTime<Utc>,
}

/// KL divergence together with its per-state terms.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct KlDivergence {
    pub value: f64,
    pub pointwise_terms: BTreeMap<String, f64>,
}

/// `1 - P(observed_state)`, clamped to [0, 1]. An undeclared state scores 1.
#[must_use]
pub fn discrepancy(context: &BeliefContext, observed_state: &str) -> f64 {
    let p = context.probability(observed_state);
    if p.is_finite() {
        (1.0 - p).clamp(0.0, 1.0)
    } else {
        1.0
    }
}

/// `D(prior || posterior)` over states present in both maps.
///
/// States whose prior probability is zero contribute nothing. A state with
/// positive prior but zero posterior contributes an infinite term.
#[must_use]
pub fn kl_divergence(
    prior: &BTreeMap<String, f64>,
    posterior: &BTreeMap<String, f64>,
) -> KlDivergence {
    let mut out = KlDivergence::default();
    for (state, &p) in prior {
        if p <= 0.0 {
            continue;
        }
        let Some(&q) = posterior.get(state) else {
            continue;
        };
        let term = if q <= 0.0 { f64::INFINITY } else { p * (p / q).ln() };
        out.pointwise_terms.insert(state.clone(), term);
        out.value += term;
    }
    out
}

/// Default emotion policy: above the threshold is surprise, anything else confirms.
///
/// `Curiosity` and `Confusion` are never produced here.
#[must_use]
pub fn emotion_for(discrepancy: f64, surprise_threshold: f64) -> EpistemicEmotion {
    if discrepancy > surprise_threshold {
        EpistemicEmotion::Surprise
    } else {
        EpistemicEmotion::Confirmation
    }
}

/// Moves `weight` of the mass onto `observed_state`.
fn posterior_toward(
    prior: &BTreeMap<String, f64>,
    observed_state: &str,
    weight: f64,
) -> BTreeMap<String, f64> {
    let mut posterior: BTreeMap<String, f64> = prior
        .iter()
        .map(|(state, &p)| (state.clone(), (1.0 - weight) * p))
        .collect();
    *posterior.entry(observed_state.to_string()).or_insert(0.0) += weight;
    posterior
}

/// The outcome of evaluating one observation against one belief context.
#[derive(Debug, Clone, PartialEq)]
pub struct Revision {
    pub emotion: EpistemicEmotion,
    pub emotion_intensity: f64,
    pub next_confidence: f64,
    pub record: Discrepancy,
}

/// Applies the revision policy to belief contexts.
#[derive(Debug, Clone, Default)]
pub struct DiscrepancyEngine {
    config: RevisionConfig,
}

impl DiscrepancyEngine {
    #[must_use]
    pub fn new(config: RevisionConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub fn config(&self) -> &RevisionConfig {
        &self.config
    }

    /// Computes the revision an observation would cause, without applying it.
    #[must_use]
    pub fn evaluate(
        &self,
        context: &BeliefContext,
        observed_state: &str,
        interaction_id: InteractionId,
    ) -> Revision {
        let score = discrepancy(context, observed_state);
        let emotion = emotion_for(score, self.config.surprise_threshold);
        let emotion_intensity = match emotion {
            EpistemicEmotion::Surprise => score,
            _ => 1.0 - score,
        };

        let prior = context.conditional_probabilities().clone();
        let posterior = posterior_toward(&prior, observed_state, self.config.evidence_weight);
        let kl = kl_divergence(&prior, &posterior);

        Revision {
            emotion,
            emotion_intensity,
            next_confidence: context.latest_confidence() * (1.0 - score),
            record: Discrepancy {
                interaction_id,
                observed_state: observed_state.to_string(),
                score,
                prior_probabilities: prior,
                posterior_probabilities: posterior,
                kl_divergence: kl.value,
                pointwise_kl_terms: kl.pointwise_terms,
                is_counterfactual: false,
                timestamp: Utc::now(),
            },
        }
    }

    /// Scores a hypothetical observation. Nothing on the context changes.
    #[must_use]
    pub fn evaluate_counterfactual(
        &self,
        context: &BeliefContext,
        observed_state: &str,
        interaction_id: InteractionId,
    ) -> Discrepancy {
        let mut record = self.evaluate(context, observed_state, interaction_id).record;
        record.is_counterfactual = true;
        record
    }

    /// Revises the belief context at `index` in place.
    ///
    /// Declares `observed_state` on the observation context if it is new,
    /// appends a system rating of `previous * (1 - discrepancy)`, sets the
    /// emotion, replaces the distribution with the posterior, and stores the
    /// discrepancy record as evidence.
    ///
    /// # Errors
    ///
    /// Returns `DialecticError::Internal` if `index` does not name a belief
    /// context with a resolvable observation context, or a validation error
    /// if the posterior cannot be stored.
    pub fn apply(
        &self,
        ppc: &mut PredictiveProcessingContext,
        index: usize,
        observed_state: &str,
        interaction_id: InteractionId,
    ) -> DialecticResult<Discrepancy> {
        let (context, observation) = ppc
            .split_mut(index)
            .ok_or_else(|| DialecticError::internal(format!("no belief context at {index}")))?;

        let revision = self.evaluate(context, observed_state, interaction_id);
        observation.add_state(observed_state);

        context.append_rating(ConfidenceRating::system(revision.next_confidence));
        context.epistemic_emotion = revision.emotion;
        context.emotion_intensity = revision.emotion_intensity;
        context.set_conditional_probabilities(observation, revision.record.posterior_probabilities.clone())?;
        context.record_evidence(revision.record.clone());
        context.relate_interaction(interaction_id);

        debug!(
            belief = %context.belief_id,
            observed = observed_state,
            discrepancy = revision.record.score,
            kl = revision.record.kl_divergence,
            emotion = %revision.emotion,
            confidence = revision.next_confidence,
            "Belief context revised"
        );

        Ok(revision.record)
    }
}
