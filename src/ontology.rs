//! The bounded view of a belief system handed to question generation.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::belief::{Belief, BeliefSystem};
use crate::context::{ObservationContext, ObservationContextId};

/// An observation context and the strongest confidence any belief holds about it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OntologyContext {
    pub context: ObservationContext,
    pub confidence: f64,
}

/// An active belief with its strongest current confidence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OntologyBelief {
    pub belief: Belief,
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_evidenced_at: Option<DateTime<Utc>>,
}

/// Observation-context forest plus the beliefs predicting over it.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Ontology {
    pub contexts: Vec<OntologyContext>,
    pub beliefs: Vec<OntologyBelief>,
}

impl Ontology {
    /// Snapshot of every observation context and active belief.
    ///
    /// Confidences are the maximum latest confidence across the relevant
    /// belief contexts, or 0 when there are none.
    #[must_use]
    pub fn from_belief_system(system: &BeliefSystem) -> Self {
        let Some(ppc) = system.predictive_processing() else {
            return Self {
                contexts: Vec::new(),
                beliefs: system
                    .active_beliefs()
                    .map(|belief| OntologyBelief {
                        belief: belief.clone(),
                        confidence: 0.0,
                        last_evidenced_at: None,
                    })
                    .collect(),
            };
        };

        let mut by_context: HashMap<ObservationContextId, f64> = HashMap::new();
        for bc in ppc.belief_contexts() {
            let entry = by_context.entry(bc.observation_context_id).or_insert(0.0);
            *entry = entry.max(bc.latest_confidence());
        }

        let contexts = ppc
            .observation_contexts()
            .iter()
            .map(|ctx| OntologyContext {
                context: ctx.clone(),
                confidence: by_context.get(&ctx.id).copied().unwrap_or(0.0),
            })
            .collect();

        let beliefs = system
            .active_beliefs()
            .map(|belief| {
                let mut confidence = 0.0f64;
                let mut last_evidenced_at: Option<DateTime<Utc>> = None;
                for (_, bc) in ppc.belief_contexts_for(belief.id) {
                    confidence = confidence.max(bc.latest_confidence());
                    last_evidenced_at = last_evidenced_at.max(bc.last_evidenced_at());
                }
                OntologyBelief {
                    belief: belief.clone(),
                    confidence,
                    last_evidenced_at,
                }
            })
            .collect();

        Self { contexts, beliefs }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.contexts.is_empty() && self.beliefs.is_empty()
    }

    #[must_use]
    pub fn context(&self, id: ObservationContextId) -> Option<&OntologyContext> {
        self.contexts.iter().find(|c| c.context.id == id)
    }

    /// Contexts with no parent, or whose parent is not part of this ontology.
    pub fn roots(&self) -> impl Iterator<Item = &OntologyContext> {
        self.contexts.iter().filter(|c| match c.context.parent_id {
            None => true,
            Some(parent) => self.context(parent).is_none(),
        })
    }

    pub fn children_of(&self, parent: ObservationContextId) -> impl Iterator<Item = &OntologyContext> {
        self.contexts
            .iter()
            .filter(move |c| c.context.parent_id == Some(parent))
    }

    /// Depth of every context; roots are at depth 0.
    #[must_use]
    pub fn depths(&self) -> HashMap<ObservationContextId, usize> {
        let mut depths = HashMap::with_capacity(self.contexts.len());
        let mut frontier: Vec<ObservationContextId> = self.roots().map(|c| c.context.id).collect();
        let mut depth = 0usize;
        while !frontier.is_empty() {
            let mut next = Vec::new();
            for id in frontier {
                if depths.contains_key(&id) {
                    continue;
                }
                depths.insert(id, depth);
                next.extend(self.children_of(id).map(|c| c.context.id));
            }
            frontier = next;
            depth += 1;
        }
        depths
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::belief::SelfModelId;
    use crate::collaborator::ExtractedBelief;
    use crate::config::RevisionConfig;
    use crate::context::link_interaction_beliefs;
    use crate::dialectic::InteractionId;

    #[test]
    fn test_empty_system() {
        let ontology = Ontology::from_belief_system(&BeliefSystem::new(SelfModelId::new("s")));
        assert!(ontology.is_empty());
    }

    #[test]
    fn test_snapshot_confidences() {
        let mut system = BeliefSystem::new(SelfModelId::new("s"));
        link_interaction_beliefs(
            &mut system,
            "q",
            "a",
            &[ExtractedBelief::statement("I walk daily")],
            InteractionId::new(),
            &RevisionConfig::default(),
        )
        .unwrap();

        let ontology = Ontology::from_belief_system(&system);
        assert_eq!(ontology.contexts.len(), 1);
        assert_eq!(ontology.beliefs.len(), 1);
        assert!((ontology.contexts[0].confidence - 0.8).abs() < f64::EPSILON);
        assert!((ontology.beliefs[0].confidence - 0.8).abs() < f64::EPSILON);
        assert!(ontology.beliefs[0].last_evidenced_at.is_some());
    }

    #[test]
    fn test_depths() {
        let root = ObservationContext::new("root");
        let child = ObservationContext::new("child").with_parent(root.id);
        let grandchild = ObservationContext::new("grandchild").with_parent(child.id);
        let ontology = Ontology {
            contexts: [root.clone(), child.clone(), grandchild.clone()]
                .into_iter()
                .map(|context| OntologyContext { context, confidence: 0.5 })
                .collect(),
            beliefs: Vec::new(),
        };
        let depths = ontology.depths();
        assert_eq!(depths[&root.id], 0);
        assert_eq!(depths[&child.id], 1);
        assert_eq!(depths[&grandchild.id], 2);
        assert_eq!(ontology.roots().count(), 1);
    }
}
