use std::collections::BTreeMap;
use std::sync::Arc;

use criterion::{criterion_group, criterion_main, BatchSize, Criterion, Throughput};

use dialectic::context::link_interaction_beliefs;
use dialectic::{
    BeliefSystem, CancellationToken, ComputeScaler, DialecticEngine, DialecticType, DiscrepancyEngine,
    EngineConfig, ExtractedBelief, InMemoryDocumentStore, InteractionId, Ontology, RevisionConfig,
    ScalerConfig, ScriptedCollaborator, SelfModelId, UpdateRequest,
};

/// A belief system with `beliefs` beliefs, each restated over `turns` turns.
fn seeded_system(beliefs: usize, turns: usize) -> BeliefSystem {
    let mut system = BeliefSystem::new(SelfModelId::new("bench"));
    let extracted: Vec<ExtractedBelief> = (0..beliefs)
        .map(|i| ExtractedBelief::statement(format!("I hold belief number {i}")))
        .collect();
    for turn in 0..turns {
        link_interaction_beliefs(
            &mut system,
            &format!("question {turn}"),
            "answer",
            &extracted,
            InteractionId::new(),
            &RevisionConfig::default(),
        )
        .unwrap();
    }
    system
}

fn bench_discrepancy_apply(c: &mut Criterion) {
    let engine = DiscrepancyEngine::default();
    let system = seeded_system(1, 1);

    let mut group = c.benchmark_group("revision");
    group.throughput(Throughput::Elements(1));
    group.bench_function("discrepancy_apply", |b| {
        b.iter_batched(
            || system.predictive_processing().cloned().unwrap(),
            |mut ppc| engine.apply(&mut ppc, 0, "Negative", InteractionId::new()).unwrap(),
            BatchSize::SmallInput,
        );
    });
    group.bench_function("kl_divergence", |b| {
        let prior: BTreeMap<String, f64> = [("Positive", 0.8), ("Negative", 0.1), ("Neutral", 0.1)]
            .into_iter()
            .map(|(s, p)| (s.to_string(), p))
            .collect();
        let posterior: BTreeMap<String, f64> = [("Positive", 0.4), ("Negative", 0.55), ("Neutral", 0.05)]
            .into_iter()
            .map(|(s, p)| (s.to_string(), p))
            .collect();
        b.iter(|| dialectic::discrepancy::kl_divergence(&prior, &posterior));
    });
    group.finish();
}

fn bench_compute_scaling(c: &mut Criterion) {
    let scaler = ComputeScaler::new(ScalerConfig::default());
    let ontology = Ontology::from_belief_system(&seeded_system(50, 4));

    let mut group = c.benchmark_group("scaler");
    for score in [0.0, 0.5, 1.0] {
        group.bench_function(format!("apply_constraints/{score}"), |b| {
            let selection = scaler.scale_compute(score).unwrap();
            b.iter(|| scaler.apply_constraints(&selection.level, Some(&ontology)).unwrap());
        });
    }
    group.finish();
}

fn bench_answer_update(c: &mut Criterion) {
    c.bench_function("engine/answer_update", |b| {
        b.iter_custom(|iters| {
            // Fresh engine per sample so the belief system does not grow across samples.
            let engine = DialecticEngine::new(
                Arc::new(InMemoryDocumentStore::new()),
                Arc::new(ScriptedCollaborator::new()),
                EngineConfig::default(),
            )
            .unwrap();
            let subject = SelfModelId::new("bench");
            let dialectic = engine.create_dialectic(&subject, DialecticType::Default).unwrap();
            let cancel = CancellationToken::new();

            let start = std::time::Instant::now();
            for i in 0..iters {
                engine
                    .update(
                        &subject,
                        dialectic.id,
                        UpdateRequest::Answer(format!("I practice habit {}. I sleep well.", i % 8)),
                        false,
                        &cancel,
                    )
                    .unwrap();
            }
            start.elapsed()
        });
    });
}

criterion_group!(benches, bench_discrepancy_apply, bench_compute_scaling, bench_answer_update);
criterion_main!(benches);
