//! Ambiguity-adaptive compute scaling.
//!
//! An ambiguity score in [0, 1] picks a rung on an ordered ladder of compute
//! levels, and the chosen level bounds how much of the belief ontology is
//! exposed to next-question generation.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::belief::{BeliefId, BeliefSystem};
use crate::confidence::variance;
use crate::config::ScalerConfig;
use crate::context::ObservationContextId;
use crate::dialectic::DialecticalInteraction;
use crate::error::{DialecticError, DialecticResult, ValidationError};
use crate::ontology::{Ontology, OntologyBelief, OntologyContext};

/// How much of the ontology one question-generation step may see.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ComputeLevel {
    /// Tree levels kept, counting the roots as the first.
    pub max_context_depth: usize,
    /// Children kept per node; the set of roots counts as one node.
    pub max_branches: usize,
    pub max_beliefs: usize,
}

impl ComputeLevel {
    pub const fn new(max_context_depth: usize, max_branches: usize, max_beliefs: usize) -> Self {
        Self {
            max_context_depth,
            max_branches,
            max_beliefs,
        }
    }

    /// Five levels from a shallow glance to a broad sweep.
    #[must_use]
    pub fn default_ladder() -> Vec<Self> {
        vec![
            Self::new(1, 2, 5),
            Self::new(2, 3, 10),
            Self::new(3, 5, 20),
            Self::new(4, 8, 40),
            Self::new(6, 12, 80),
        ]
    }
}

/// A level together with its position on the ladder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ComputeSelection {
    pub index: usize,
    pub level: ComputeLevel,
}

/// The three ambiguity signals and their weighted blend.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Ambiguity {
    /// Highest token overlap between this question and any earlier one.
    pub similarity: f64,
    /// Share of touched beliefs already predicting in another observation context.
    pub overlap: f64,
    /// Spread of the touched belief contexts' latest confidences, scaled to [0, 1].
    pub variance: f64,
    pub score: f64,
}

const TOKEN_PATTERN: &str = r"\w+";

fn token_regex() -> DialecticResult<&'static Regex> {
    static TOKENS: OnceLock<Result<Regex, regex::Error>> = OnceLock::new();
    TOKENS
        .get_or_init(|| Regex::new(TOKEN_PATTERN))
        .as_ref()
        .map_err(|e| DialecticError::internal(format!("invalid token pattern '{TOKEN_PATTERN}': {e}")))
}

fn tokens(pattern: &Regex, text: &str) -> HashSet<String> {
    pattern
        .find_iter(text)
        .map(|m| m.as_str().to_lowercase())
        .collect()
}

fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    let union = a.union(b).count();
    if union == 0 {
        return 0.0;
    }
    #[allow(clippy::cast_precision_loss)]
    let score = a.intersection(b).count() as f64 / union as f64;
    score
}

/// Maps ambiguity to compute and prunes ontologies accordingly.
#[derive(Debug, Clone, Default)]
pub struct ComputeScaler {
    config: ScalerConfig,
}

impl ComputeScaler {
    #[must_use]
    pub fn new(config: ScalerConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub fn levels(&self) -> &[ComputeLevel] {
        &self.config.levels
    }

    /// Scores how unsettled the line of inquiry around `interaction` is.
    ///
    /// `history` is the dialectic's interaction list; `interaction` itself is
    /// skipped when comparing questions. Belief contexts count as touched when
    /// they list the interaction among their related interactions.
    ///
    /// # Errors
    ///
    /// Returns `DialecticError::Internal` if the token pattern fails to compile.
    pub fn ambiguity_score(
        &self,
        interaction: &DialecticalInteraction,
        history: &[DialecticalInteraction],
        system: &BeliefSystem,
    ) -> DialecticResult<Ambiguity> {
        let pattern = token_regex()?;
        let question = tokens(pattern, interaction.question().unwrap_or_default());
        let similarity = history
            .iter()
            .filter(|other| other.id != interaction.id)
            .filter_map(DialecticalInteraction::question)
            .map(|text| jaccard(&question, &tokens(pattern, text)))
            .fold(0.0f64, f64::max);

        let (overlap, spread) = system
            .predictive_processing()
            .map_or((0.0, 0.0), |ppc| {
                let touched: Vec<_> = ppc
                    .belief_contexts()
                    .iter()
                    .filter(|bc| bc.related_interaction_ids.contains(&interaction.id))
                    .collect();
                if touched.is_empty() {
                    return (0.0, 0.0);
                }

                let beliefs: HashSet<BeliefId> = touched.iter().map(|bc| bc.belief_id).collect();
                let mut contexts_per_belief: HashMap<BeliefId, HashSet<ObservationContextId>> = HashMap::new();
                for bc in ppc.belief_contexts() {
                    if beliefs.contains(&bc.belief_id) {
                        contexts_per_belief
                            .entry(bc.belief_id)
                            .or_default()
                            .insert(bc.observation_context_id);
                    }
                }
                let covered = contexts_per_belief.values().filter(|c| c.len() > 1).count();
                #[allow(clippy::cast_precision_loss)]
                let overlap = covered as f64 / beliefs.len() as f64;

                let latest: Vec<f64> = touched.iter().map(|bc| bc.latest_confidence()).collect();
                (overlap, (4.0 * variance(&latest)).clamp(0.0, 1.0))
            });

        let score = (self.config.similarity_weight * similarity
            + self.config.overlap_weight * overlap
            + self.config.variance_weight * spread)
            .clamp(0.0, 1.0);

        Ok(Ambiguity {
            similarity,
            overlap,
            variance: spread,
            score,
        })
    }

    /// Picks the ladder rung at `floor(score * (levels - 1))`.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::AmbiguityOutOfRange` for a score outside
    /// [0, 1] (including NaN) and `ValidationError::EmptyComputeLadder` if the
    /// ladder has no levels.
    pub fn scale_compute(&self, score: f64) -> Result<ComputeSelection, ValidationError> {
        if !(0.0..=1.0).contains(&score) {
            return Err(ValidationError::AmbiguityOutOfRange { value: score });
        }
        let levels = &self.config.levels;
        let last = levels.len().checked_sub(1).ok_or(ValidationError::EmptyComputeLadder)?;
        #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let index = ((score * last as f64).floor() as usize).min(last);
        debug!(ambiguity = score, level = index, "Compute level selected");
        Ok(ComputeSelection {
            index,
            level: levels[index],
        })
    }

    /// Prunes `ontology` to the budget of `level`.
    ///
    /// Contexts at depth `max_context_depth` or below are dropped, each node
    /// keeps at most `max_branches` children (highest confidence first; the
    /// roots are capped the same way), and at most `max_beliefs` beliefs are
    /// kept (highest confidence, then most recently evidenced). Retained items
    /// keep their original order.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::MissingOntology` if `ontology` is `None`.
    pub fn apply_constraints(
        &self,
        level: &ComputeLevel,
        ontology: Option<&Ontology>,
    ) -> Result<Ontology, ValidationError> {
        let ontology = ontology.ok_or(ValidationError::MissingOntology)?;

        let mut kept: HashSet<ObservationContextId> = HashSet::new();
        let mut frontier = strongest(ontology.roots().collect(), level.max_branches);
        let mut depth = 0usize;
        while depth < level.max_context_depth && !frontier.is_empty() {
            let mut next = Vec::new();
            for id in frontier {
                if !kept.insert(id) {
                    continue;
                }
                next.extend(strongest(ontology.children_of(id).collect(), level.max_branches));
            }
            frontier = next;
            depth += 1;
        }

        let contexts = ontology
            .contexts
            .iter()
            .filter(|c| kept.contains(&c.context.id))
            .cloned()
            .collect();

        let mut ranked: Vec<(usize, &OntologyBelief)> = ontology.beliefs.iter().enumerate().collect();
        ranked.sort_by(|(_, a), (_, b)| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(Ordering::Equal)
                .then_with(|| b.last_evidenced_at.cmp(&a.last_evidenced_at))
        });
        ranked.truncate(level.max_beliefs);
        ranked.sort_by_key(|(position, _)| *position);
        let beliefs = ranked.into_iter().map(|(_, b)| b.clone()).collect();

        Ok(Ontology { contexts, beliefs })
    }
}

/// Ids of the `limit` most confident contexts, ties broken by original order.
fn strongest(
    mut candidates: Vec<&OntologyContext>,
    limit: usize,
) -> Vec<ObservationContextId> {
    candidates.sort_by(|a, b| b.confidence.partial_cmp(&a.confidence).unwrap_or(Ordering::Equal));
    candidates.into_iter().take(limit).map(|c| c.context.id).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::belief::{Belief, BeliefType, SelfModelId};
    use crate::context::ObservationContext;

    fn node(name: &str, parent: Option<&ObservationContext>, confidence: f64) -> OntologyContext {
        let mut context = ObservationContext::new(name);
        context.parent_id = parent.map(|p| p.id);
        OntologyContext { context, confidence }
    }

    fn belief(text: &str, confidence: f64) -> OntologyBelief {
        OntologyBelief {
            belief: Belief::new(SelfModelId::new("s"), BeliefType::Statement, vec![text.into()]).unwrap(),
            confidence,
            last_evidenced_at: None,
        }
    }

    #[test]
    fn test_scale_compute_bounds() {
        let scaler = ComputeScaler::default();
        assert_eq!(scaler.scale_compute(0.0).unwrap().index, 0);
        assert_eq!(scaler.scale_compute(1.0).unwrap().index, 4);
        assert_eq!(scaler.scale_compute(1.0).unwrap().level, ComputeLevel::new(6, 12, 80));
        assert!(matches!(
            scaler.scale_compute(1.5),
            Err(ValidationError::AmbiguityOutOfRange { .. })
        ));
        assert!(scaler.scale_compute(-0.01).is_err());
        assert!(scaler.scale_compute(f64::NAN).is_err());
    }

    #[test]
    fn test_scale_compute_floor() {
        let scaler = ComputeScaler::default();
        assert_eq!(scaler.scale_compute(0.24).unwrap().index, 0);
        assert_eq!(scaler.scale_compute(0.25).unwrap().index, 1);
        assert_eq!(scaler.scale_compute(0.99).unwrap().index, 3);
    }

    #[test]
    fn test_single_level_ladder() {
        let scaler = ComputeScaler::new(ScalerConfig {
            levels: vec![ComputeLevel::new(1, 1, 1)],
            ..ScalerConfig::default()
        });
        assert_eq!(scaler.scale_compute(0.7).unwrap().index, 0);
    }

    #[test]
    fn test_apply_constraints_requires_ontology() {
        let scaler = ComputeScaler::default();
        let err = scaler.apply_constraints(&ComputeLevel::new(1, 1, 1), None).unwrap_err();
        assert!(matches!(err, ValidationError::MissingOntology));
    }

    #[test]
    fn test_apply_constraints_depth_and_branches() {
        let root = node("root", None, 0.9);
        let a = node("a", Some(&root.context), 0.2);
        let b = node("b", Some(&root.context), 0.7);
        let c = node("c", Some(&root.context), 0.5);
        let deep = node("deep", Some(&b.context), 0.9);
        let ontology = Ontology {
            contexts: vec![root, a, b, c, deep],
            beliefs: Vec::new(),
        };
        let scaler = ComputeScaler::default();

        let pruned = scaler.apply_constraints(&ComputeLevel::new(2, 2, 10), Some(&ontology)).unwrap();
        let names: Vec<_> = pruned.contexts.iter().map(|c| c.context.name.as_str()).collect();
        assert_eq!(names, ["root", "b", "c"]);

        let pruned = scaler.apply_constraints(&ComputeLevel::new(1, 8, 10), Some(&ontology)).unwrap();
        assert_eq!(pruned.contexts.len(), 1);

        let pruned = scaler.apply_constraints(&ComputeLevel::new(6, 8, 10), Some(&ontology)).unwrap();
        assert_eq!(pruned.contexts.len(), 5);
    }

    #[test]
    fn test_apply_constraints_caps_roots() {
        let ontology = Ontology {
            contexts: vec![node("r1", None, 0.1), node("r2", None, 0.8), node("r3", None, 0.5)],
            beliefs: Vec::new(),
        };
        let pruned = ComputeScaler::default()
            .apply_constraints(&ComputeLevel::new(1, 2, 5), Some(&ontology))
            .unwrap();
        let names: Vec<_> = pruned.contexts.iter().map(|c| c.context.name.as_str()).collect();
        assert_eq!(names, ["r2", "r3"]);
    }

    #[test]
    fn test_apply_constraints_caps_beliefs() {
        let ontology = Ontology {
            contexts: Vec::new(),
            beliefs: vec![belief("low", 0.1), belief("high", 0.9), belief("mid", 0.5)],
        };
        let pruned = ComputeScaler::default()
            .apply_constraints(&ComputeLevel::new(1, 1, 2), Some(&ontology))
            .unwrap();
        let texts: Vec<_> = pruned.beliefs.iter().map(|b| b.belief.text()).collect();
        assert_eq!(texts, ["high", "mid"]);
    }

    #[test]
    fn test_ambiguity_similarity_only() {
        let first = DialecticalInteraction::pending_question("How often do you exercise?");
        let second = DialecticalInteraction::pending_question("How often do you exercise at night?");
        let history = vec![first, second.clone()];
        let system = BeliefSystem::new(SelfModelId::new("s"));

        let ambiguity = ComputeScaler::default()
            .ambiguity_score(&second, &history, &system)
            .unwrap();
        assert!((ambiguity.similarity - 5.0 / 7.0).abs() < 1e-12);
        assert!(ambiguity.overlap.abs() < f64::EPSILON);
        assert!((ambiguity.score - 0.4 * 5.0 / 7.0).abs() < 1e-12);
    }

    #[test]
    fn test_ambiguity_first_question_is_zero() {
        let only = DialecticalInteraction::pending_question("Anything?");
        let system = BeliefSystem::new(SelfModelId::new("s"));
        let ambiguity = ComputeScaler::default()
            .ambiguity_score(&only, &[only.clone()], &system)
            .unwrap();
        assert!(ambiguity.score.abs() < f64::EPSILON);
    }

    #[test]
    fn test_token_pattern_compiles() {
        let pattern = token_regex().unwrap();
        assert!(std::ptr::eq(pattern, token_regex().unwrap()));
        let words = tokens(pattern, "Do you RUN, or do you walk?");
        assert_eq!(words.len(), 5);
        assert!(words.contains("run"));
    }
}
