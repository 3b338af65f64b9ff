//! Property tests for scoring, revision, and compute scaling.

use std::collections::BTreeMap;

use dialectic::context::{belief_metrics, ensure_context, link_interaction_beliefs, DEFAULT_STATES};
use dialectic::discrepancy::{discrepancy, kl_divergence};
use dialectic::{
    BeliefContext, BeliefId, BeliefSystem, ComputeScaler, DiscrepancyEngine, ExtractedBelief, InteractionId,
    ObservationContext, PredictiveProcessingContext, RevisionConfig, ScalerConfig, SelfModelId,
};
use proptest::prelude::*;

// ---------------------------------------------------------------------------
// Strategies
// ---------------------------------------------------------------------------

/// Unnormalized weights for the three default states.
fn arb_weights() -> impl Strategy<Value = [f64; 3]> {
    [0.01f64..1.0, 0.01f64..1.0, 0.01f64..1.0]
}

fn arb_state() -> impl Strategy<Value = &'static str> {
    prop_oneof![
        Just(DEFAULT_STATES[0]),
        Just(DEFAULT_STATES[1]),
        Just(DEFAULT_STATES[2]),
        Just("Unexpected"),
    ]
}

fn distribution(weights: [f64; 3]) -> BTreeMap<String, f64> {
    let total: f64 = weights.iter().sum();
    DEFAULT_STATES
        .iter()
        .zip(weights)
        .map(|(state, w)| ((*state).to_string(), w / total))
        .collect()
}

/// A graph holding one belief context over a default-state observation context.
fn single_context(weights: [f64; 3], confidence: f64) -> PredictiveProcessingContext {
    let observation = ObservationContext::with_default_states("Response to 'q'");
    let mut ppc = PredictiveProcessingContext::new();
    ppc.add_observation_context(observation.clone()).unwrap();
    let mut bc = BeliefContext::new(BeliefId::new(), observation.id, confidence).unwrap();
    bc.set_conditional_probabilities(&observation, distribution(weights)).unwrap();
    ppc.add_belief_context(bc).unwrap();
    ppc
}

// ---------------------------------------------------------------------------
// Properties
// ---------------------------------------------------------------------------

proptest! {
    #[test]
    fn discrepancy_is_a_unit_score(weights in arb_weights(), state in arb_state()) {
        let ppc = single_context(weights, 0.8);
        let score = discrepancy(ppc.belief_context(0).unwrap(), state);
        prop_assert!((0.0..=1.0).contains(&score));
        if state == "Unexpected" {
            prop_assert!((score - 1.0).abs() < f64::EPSILON);
        }
    }

    #[test]
    fn kl_is_zero_only_for_identical_distributions(a in arb_weights(), b in arb_weights()) {
        let p = distribution(a);
        let q = distribution(b);
        prop_assert!(kl_divergence(&p, &p).value.abs() < 1e-12);

        let kl = kl_divergence(&p, &q);
        prop_assert!(kl.value >= -1e-12);
        prop_assert!(kl.value.is_finite());
        let differs = p.iter().any(|(state, v)| (v - q[state]).abs() > 1e-3);
        if differs {
            prop_assert!(kl.value > 0.0);
        }
    }

    #[test]
    fn revision_appends_exactly_one_rating(
        weights in arb_weights(),
        confidence in 0.0f64..=1.0,
        observations in prop::collection::vec(arb_state(), 1..6),
    ) {
        let engine = DiscrepancyEngine::default();
        let mut ppc = single_context(weights, confidence);

        for (step, state) in observations.iter().enumerate() {
            let before: Vec<f64> = ppc
                .belief_context(0)
                .unwrap()
                .confidence_ratings()
                .iter()
                .map(|r| r.score())
                .collect();
            let record = engine.apply(&mut ppc, 0, state, InteractionId::new()).unwrap();
            prop_assert!((0.0..=1.0).contains(&record.score));
            prop_assert!(record.kl_divergence >= 0.0);

            let context = ppc.belief_context(0).unwrap();
            let after: Vec<f64> = context.confidence_ratings().iter().map(|r| r.score()).collect();
            prop_assert_eq!(after.len(), before.len() + 1);
            prop_assert_eq!(&after[..before.len()], &before[..]);
            prop_assert!((0.0..=1.0).contains(&context.latest_confidence()));
            prop_assert_eq!(context.evidence().len(), step + 1);

            let mass: f64 = context.conditional_probabilities().values().sum();
            prop_assert!((mass - 1.0).abs() < 1e-9);
        }

        // Observing an undeclared state declares it.
        let observation_id = ppc.belief_context(0).unwrap().observation_context_id;
        let observation = ppc.observation_context(observation_id).unwrap();
        for state in &observations {
            prop_assert!(observation.has_state(state));
        }
    }

    #[test]
    fn compute_level_is_monotone(a in 0.0f64..=1.0, b in 0.0f64..=1.0) {
        let scaler = ComputeScaler::new(ScalerConfig::default());
        let (low, high) = if a <= b { (a, b) } else { (b, a) };
        let low = scaler.scale_compute(low).unwrap();
        let high = scaler.scale_compute(high).unwrap();
        prop_assert!(low.index <= high.index);
        prop_assert!(low.level.max_beliefs <= high.level.max_beliefs);
        prop_assert!(low.level.max_context_depth <= high.level.max_context_depth);
    }

    #[test]
    fn out_of_range_ambiguity_is_rejected(score in prop_oneof![-10.0f64..-1e-9, 1.000_001f64..10.0]) {
        let scaler = ComputeScaler::new(ScalerConfig::default());
        prop_assert!(scaler.scale_compute(score).is_err());
    }

    #[test]
    fn clarification_score_is_a_fraction(
        turns in prop::collection::vec(prop::collection::vec("[a-z]{1,6}( [a-z]{1,6}){0,3}", 0..4), 1..5),
    ) {
        let mut system = BeliefSystem::new(SelfModelId::new("prop"));
        for statements in &turns {
            let extracted: Vec<ExtractedBelief> =
                statements.iter().map(ExtractedBelief::statement).collect();
            link_interaction_beliefs(
                &mut system,
                "q",
                "a",
                &extracted,
                InteractionId::new(),
                &RevisionConfig::default(),
            )
            .unwrap();
        }
        let metrics = belief_metrics(&system);
        prop_assert!((0.0..=1.0).contains(&metrics.clarification_score));
        prop_assert!(metrics.total_falsifiable_beliefs <= metrics.total_beliefs);
        prop_assert_eq!(metrics.total_beliefs, system.active_beliefs().count());
    }
}

#[test]
fn compute_level_endpoints() {
    let scaler = ComputeScaler::new(ScalerConfig::default());
    assert_eq!(scaler.scale_compute(0.0).unwrap().index, 0);
    assert_eq!(scaler.scale_compute(1.0).unwrap().index, scaler.levels().len() - 1);
    assert!(scaler.scale_compute(1.5).is_err());
    assert!(scaler.scale_compute(f64::NAN).is_err());
}

#[test]
fn ensure_context_is_idempotent() {
    let mut system = BeliefSystem::new(SelfModelId::new("idempotent"));
    ensure_context(&mut system);
    let first = system.predictive_processing().cloned().unwrap();
    ensure_context(&mut system);
    ensure_context(&mut system);
    assert_eq!(system.epistemic_contexts.len(), 1);
    assert_eq!(system.predictive_processing(), Some(&first));
}
