//! The dialectic state machine.
//!
//! Every mutating call is one read-modify-write of a self model's documents:
//! the belief system and the dialectic are loaded, changed in memory, and
//! committed together in a single batch. Calls for the same self model are
//! serialized by a per-scope mutex; writers in other processes are caught by
//! the optimistic version check on commit.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::{debug, info};

use crate::belief::{Belief, BeliefSystem, SelfModelId};
use crate::cancel::CancellationToken;
use crate::collaborator::{BeliefSystemAnalysis, GuardedCollaborator, LanguageCollaborator};
use crate::config::EngineConfig;
use crate::context::extrapolate::ExtrapolationCache;
use crate::context::{
    belief_metrics, ensure_context, link_interaction_beliefs, ObservationContext, ObservationContextId,
    PredictiveProcessingContext,
};
use crate::discrepancy::{Discrepancy, DiscrepancyEngine};
use crate::error::{DialecticError, DialecticResult, InvalidStateError, NotFoundError, ValidationError};
use crate::ontology::Ontology;
use crate::scaler::{Ambiguity, ComputeScaler, ComputeSelection};
use crate::storage::{DocumentStore, Record, RecordStoreExt, StorageError, StoreOp, VersionCheck};

use super::{
    dialectic_key, Dialectic, DialecticId, DialecticType, DialecticalInteraction, InteractionId,
    BELIEF_SYSTEM_KEY,
};

fn lock_err(context: &'static str) -> StorageError {
    StorageError::BackendError(format!("poisoned lock: {context}"))
}

/// What an update call carries. At most one payload is honored per call.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum UpdateRequest {
    /// Nothing to apply; the documents are still re-committed.
    #[default]
    None,
    /// Answers the last interaction, which must be pending.
    Answer(String),
    /// Free text split into new pending questions.
    QuestionBlob(String),
    /// Free text matched against every pending question.
    AnswerBlob(String),
}

impl UpdateRequest {
    /// Picks one payload, preferring an answer, then a question blob, then
    /// an answer blob.
    #[must_use]
    pub fn from_parts(
        answer: Option<String>,
        question_blob: Option<String>,
        answer_blob: Option<String>,
    ) -> Self {
        match (answer, question_blob, answer_blob) {
            (Some(answer), _, _) => Self::Answer(answer),
            (None, Some(blob), _) => Self::QuestionBlob(blob),
            (None, None, Some(blob)) => Self::AnswerBlob(blob),
            (None, None, None) => Self::None,
        }
    }
}

/// The documents after an update, plus what the update computed on the way.
#[derive(Debug, Clone)]
pub struct UpdateOutcome {
    pub dialectic: Dialectic,
    pub belief_system: BeliefSystem,
    /// Set when a next question was generated.
    pub ambiguity: Option<Ambiguity>,
    pub compute_level: Option<ComputeSelection>,
    /// One record per belief context revised by this update.
    pub discrepancies: Vec<Discrepancy>,
    /// False for dry runs.
    pub persisted: bool,
}

#[derive(Debug, Default)]
struct Step {
    ambiguity: Option<Ambiguity>,
    compute_level: Option<ComputeSelection>,
    discrepancies: Vec<Discrepancy>,
}

/// Drives dialectics for any number of self models.
pub struct DialecticEngine {
    store: Arc<dyn DocumentStore>,
    language: GuardedCollaborator,
    revision: DiscrepancyEngine,
    scaler: ComputeScaler,
    scopes: Mutex<HashMap<SelfModelId, Arc<Mutex<()>>>>,
    philosophies: ExtrapolationCache,
}

impl std::fmt::Debug for DialecticEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DialecticEngine")
            .field("language", &self.language)
            .field("revision", &self.revision)
            .field("scaler", &self.scaler)
            .finish_non_exhaustive()
    }
}

impl DialecticEngine {
    /// Creates an engine after validating `config`.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::InvalidConfig` (or `EmptyComputeLadder`) for
    /// an unusable configuration.
    pub fn new(
        store: Arc<dyn DocumentStore>,
        language: Arc<dyn LanguageCollaborator>,
        config: EngineConfig,
    ) -> Result<Self, ValidationError> {
        let config = config.validate()?;
        Ok(Self {
            store,
            language: GuardedCollaborator::new(language, config.collaborator),
            revision: DiscrepancyEngine::new(config.revision),
            scaler: ComputeScaler::new(config.scaler),
            scopes: Mutex::new(HashMap::new()),
            philosophies: ExtrapolationCache::new(),
        })
    }

    /// The guarded collaborator, for inspecting breaker state.
    #[must_use]
    pub fn language(&self) -> &GuardedCollaborator {
        &self.language
    }

    #[must_use]
    pub fn philosophies(&self) -> &ExtrapolationCache {
        &self.philosophies
    }

    /// Runs `body` holding the self model's scope mutex.
    ///
    /// The scope entry is dropped again once no other call holds or waits on it.
    fn with_scope<T>(
        &self,
        self_model: &SelfModelId,
        body: impl FnOnce() -> DialecticResult<T>,
    ) -> DialecticResult<T> {
        let lock = {
            let mut scopes = self.scopes.lock().map_err(|_| lock_err("engine.scopes"))?;
            Arc::clone(scopes.entry(self_model.clone()).or_default())
        };
        let result = match lock.lock() {
            Ok(_guard) => body(),
            Err(_) => Err(lock_err("engine.scope").into()),
        };
        drop(lock);
        self.release_scope(self_model);
        result
    }

    fn release_scope(&self, self_model: &SelfModelId) {
        // Clones are only taken under the map lock, so a count of one here is final.
        if let Ok(mut scopes) = self.scopes.lock() {
            if scopes.get(self_model).is_some_and(|lock| Arc::strong_count(lock) == 1) {
                scopes.remove(self_model);
            }
        }
    }

    fn load_system(&self, self_model: &SelfModelId) -> DialecticResult<Option<BeliefSystem>> {
        Ok(self
            .store
            .load_record::<BeliefSystem>(self_model.as_str(), BELIEF_SYSTEM_KEY)?
            .map(|stored| {
                let mut system = stored.value;
                system.version = stored.version;
                system
            }))
    }

    fn load_or_new_system(&self, self_model: &SelfModelId) -> DialecticResult<BeliefSystem> {
        Ok(self
            .load_system(self_model)?
            .unwrap_or_else(|| BeliefSystem::new(self_model.clone())))
    }

    fn load_dialectic(&self, self_model: &SelfModelId, id: DialecticId) -> DialecticResult<Dialectic> {
        let stored = self
            .store
            .load_record::<Dialectic>(self_model.as_str(), &dialectic_key(id))?
            .ok_or(NotFoundError::Dialectic(id))?;
        let mut dialectic = stored.value;
        dialectic.version = stored.version;
        Ok(dialectic)
    }

    /// Writes whichever documents are given in one batch and bumps their
    /// versions once the batch is accepted.
    fn commit(
        &self,
        system: Option<&mut BeliefSystem>,
        dialectic: Option<&mut Dialectic>,
    ) -> DialecticResult<()> {
        let mut ops = Vec::with_capacity(2);
        if let Some(system) = system.as_deref() {
            ops.push(versioned_op(
                system.self_model_id.as_str(),
                BELIEF_SYSTEM_KEY,
                system,
                system.version,
            )?);
        }
        if let Some(dialectic) = dialectic.as_deref() {
            ops.push(versioned_op(
                dialectic.self_model_id.as_str(),
                &dialectic.storage_key(),
                dialectic,
                dialectic.version,
            )?);
        }
        self.store.store_batch(ops)?;

        if let Some(system) = system {
            system.version += 1;
        }
        if let Some(dialectic) = dialectic {
            dialectic.version += 1;
            debug!(dialectic = %dialectic.id, version = dialectic.version, "Dialectic committed");
        }
        Ok(())
    }

    fn next_question(
        &self,
        ontology: &Ontology,
        dialectic: &Dialectic,
        cancel: &CancellationToken,
    ) -> DialecticResult<String> {
        Ok(self
            .language
            .generate_question(ontology, &dialectic.answered_pairs(), cancel)?)
    }

    /// Starts a dialectic and asks its first question.
    ///
    /// The first question sees the ontology at the lowest compute level.
    ///
    /// # Errors
    ///
    /// Returns collaborator or storage failures; nothing is stored on error.
    pub fn create_dialectic(
        &self,
        self_model: &SelfModelId,
        dialectic_type: DialecticType,
    ) -> DialecticResult<Dialectic> {
        self.with_scope(self_model, || {
            let system = self.load_or_new_system(self_model)?;
            let mut dialectic = Dialectic::new(self_model.clone(), dialectic_type);

            let selection = self.scaler.scale_compute(0.0)?;
            let ontology = self
                .scaler
                .apply_constraints(&selection.level, Some(&Ontology::from_belief_system(&system)))?;
            let question = self.next_question(&ontology, &dialectic, &CancellationToken::new())?;
            dialectic.push_interaction(DialecticalInteraction::pending_question(question));

            self.commit(None, Some(&mut dialectic))?;
            info!(
                dialectic = %dialectic.id,
                self_model = %self_model,
                "Dialectic created"
            );
            Ok(dialectic)
        })
    }

    /// Applies one update request to a dialectic.
    ///
    /// Everything is computed on private copies of the documents. `cancel` is
    /// watched during every collaborator call, including its retry backoff,
    /// checked after each one and once more right before the commit; a
    /// cancelled or failed update leaves storage untouched. With
    /// `dry_run` the result is returned without being committed.
    ///
    /// # Errors
    ///
    /// - `NotFoundError::Dialectic` for an unknown dialectic.
    /// - `InvalidStateError` when an answer targets a dialectic whose last
    ///   interaction is not pending, or when a payload is blank.
    /// - `DialecticError::Cancelled` if `cancel` fired before the commit.
    /// - Collaborator, validation, and storage failures as they occur.
    pub fn update(
        &self,
        self_model: &SelfModelId,
        dialectic_id: DialecticId,
        request: UpdateRequest,
        dry_run: bool,
        cancel: &CancellationToken,
    ) -> DialecticResult<UpdateOutcome> {
        self.with_scope(self_model, || {
            let mut system = self.load_or_new_system(self_model)?;
            let mut dialectic = self.load_dialectic(self_model, dialectic_id)?;
            let mut step = Step::default();

            match request {
                UpdateRequest::None => {
                    debug!(dialectic = %dialectic_id, "Empty update request");
                }
                UpdateRequest::Answer(answer) => {
                    let answer = non_blank(&answer)?;
                    let target = last_pending(&dialectic)?;
                    self.answer_interaction(&mut system, &mut dialectic, target, answer, cancel, &mut step)?;
                    self.ask_next(&mut system, &mut dialectic, target, cancel, &mut step)?;
                }
                UpdateRequest::QuestionBlob(blob) => {
                    let blob = non_blank(&blob)?;
                    let questions = self.language.extract_questions_from_text(blob, cancel)?;
                    check(cancel)?;
                    debug!(dialectic = %dialectic_id, questions = questions.len(), "Questions extracted from blob");
                    for question in questions {
                        dialectic.push_interaction(DialecticalInteraction::pending_question(question));
                    }
                }
                UpdateRequest::AnswerBlob(blob) => {
                    let blob = non_blank(&blob)?;
                    self.answer_blob(&mut system, &mut dialectic, blob, cancel, &mut step)?;
                }
            }

            check(cancel)?;
            let persisted = if dry_run {
                debug!(dialectic = %dialectic_id, "Dry run; nothing persisted");
                false
            } else {
                self.commit(Some(&mut system), Some(&mut dialectic))?;
                true
            };

            Ok(UpdateOutcome {
                dialectic,
                belief_system: system,
                ambiguity: step.ambiguity,
                compute_level: step.compute_level,
                discrepancies: step.discrepancies,
                persisted,
            })
        })
    }

    fn answer_blob(
        &self,
        system: &mut BeliefSystem,
        dialectic: &mut Dialectic,
        blob: &str,
        cancel: &CancellationToken,
        step: &mut Step,
    ) -> DialecticResult<()> {
        let pending: Vec<(InteractionId, String)> = dialectic
            .pending()
            .filter_map(|i| Some((i.id, i.question()?.to_string())))
            .collect();
        if pending.is_empty() {
            // Reports the state of the last interaction.
            last_pending(dialectic)?;
        }

        let questions: Vec<String> = pending.iter().map(|(_, q)| q.clone()).collect();
        let answers = self.language.match_answers_to_questions(blob, &questions, cancel)?;
        check(cancel)?;

        let mut last_answered = None;
        for ((id, _), answer) in pending.into_iter().zip(answers) {
            let answer = answer.trim();
            if answer.is_empty() {
                continue;
            }
            self.answer_interaction(system, dialectic, id, answer, cancel, step)?;
            last_answered = Some(id);
        }

        match last_answered {
            Some(id) => self.ask_next(system, dialectic, id, cancel, step),
            None => {
                debug!(dialectic = %dialectic.id, "Answer blob matched no pending question");
                Ok(())
            }
        }
    }

    fn answer_interaction(
        &self,
        system: &mut BeliefSystem,
        dialectic: &mut Dialectic,
        target: InteractionId,
        answer: &str,
        cancel: &CancellationToken,
        step: &mut Step,
    ) -> DialecticResult<()> {
        let question = dialectic
            .interactions()
            .iter()
            .find(|i| i.id == target)
            .ok_or(NotFoundError::Interaction(target))?
            .question()
            .ok_or(InvalidStateError::NotQuestionAnswer { interaction: target })?
            .to_string();

        let extracted = self.language.extract_beliefs(&question, answer, cancel)?;
        check(cancel)?;

        let link = link_interaction_beliefs(
            system,
            &question,
            answer,
            &extracted,
            target,
            self.revision.config(),
        )?;
        let linked: Vec<Belief> = link
            .linked_beliefs
            .iter()
            .filter_map(|id| system.belief(*id).cloned())
            .collect();
        dialectic
            .interaction_mut(target)
            .ok_or(NotFoundError::Interaction(target))?
            .mark_answered(answer, linked)?;

        let ppc = ensure_context(system);
        for touched in &link.touched {
            let record = self
                .revision
                .apply(ppc, touched.index, &touched.observed_state, target)?;
            step.discrepancies.push(record);
        }
        system.metrics = belief_metrics(system);

        info!(
            dialectic = %dialectic.id,
            interaction = %target,
            beliefs = link.linked_beliefs.len(),
            created = link.created_beliefs.len(),
            revised = link.touched.len(),
            "Answer applied"
        );
        Ok(())
    }

    fn ask_next(
        &self,
        system: &mut BeliefSystem,
        dialectic: &mut Dialectic,
        answered: InteractionId,
        cancel: &CancellationToken,
        step: &mut Step,
    ) -> DialecticResult<()> {
        let interaction = dialectic
            .interactions()
            .iter()
            .find(|i| i.id == answered)
            .ok_or(NotFoundError::Interaction(answered))?;
        let ambiguity = self
            .scaler
            .ambiguity_score(interaction, dialectic.interactions(), system)?;
        let selection = self.scaler.scale_compute(ambiguity.score)?;
        let ontology = self
            .scaler
            .apply_constraints(&selection.level, Some(&Ontology::from_belief_system(system)))?;

        let question = self.next_question(&ontology, dialectic, cancel)?;
        check(cancel)?;

        debug!(
            dialectic = %dialectic.id,
            ambiguity = ambiguity.score,
            level = selection.index,
            contexts = ontology.contexts.len(),
            beliefs = ontology.beliefs.len(),
            "Next question generated"
        );
        system.ontology = Some(ontology);
        dialectic.push_interaction(DialecticalInteraction::pending_question(question));
        step.ambiguity = Some(ambiguity);
        step.compute_level = Some(selection);
        Ok(())
    }

    /// # Errors
    ///
    /// Returns `NotFoundError::Dialectic` for an unknown id.
    pub fn get_dialectic(&self, self_model: &SelfModelId, id: DialecticId) -> DialecticResult<Dialectic> {
        self.load_dialectic(self_model, id)
    }

    /// Every dialectic of a self model, oldest first.
    ///
    /// # Errors
    ///
    /// Returns storage failures.
    pub fn list_dialectics(&self, self_model: &SelfModelId) -> DialecticResult<Vec<Dialectic>> {
        let mut dialectics: Vec<Dialectic> = self
            .store
            .list_records::<Dialectic>(self_model.as_str())?
            .into_iter()
            .map(|(_, stored)| {
                let mut dialectic = stored.value;
                dialectic.version = stored.version;
                dialectic
            })
            .collect();
        dialectics.sort_by_key(|d| d.created_at);
        Ok(dialectics)
    }

    /// # Errors
    ///
    /// Returns `NotFoundError::SelfModel` if nothing was ever stored for it.
    pub fn belief_system(&self, self_model: &SelfModelId) -> DialecticResult<BeliefSystem> {
        self.load_system(self_model)?
            .ok_or_else(|| NotFoundError::SelfModel(self_model.to_string()).into())
    }

    /// Asks the collaborator to assess the belief system and records the
    /// assessment and a snapshot of the system on the dialectic.
    ///
    /// # Errors
    ///
    /// Returns `NotFoundError` for an unknown dialectic, and collaborator or
    /// storage failures.
    pub fn analyze(
        &self,
        self_model: &SelfModelId,
        dialectic_id: DialecticId,
    ) -> DialecticResult<BeliefSystemAnalysis> {
        self.with_scope(self_model, || {
            let system = self.load_or_new_system(self_model)?;
            let mut dialectic = self.load_dialectic(self_model, dialectic_id)?;

            let analysis = self
                .language
                .analyze_belief_system(&system, dialectic.last_interaction(), &CancellationToken::new())?;
            dialectic.analysis = Some(analysis.clone());
            dialectic.belief_system_snapshot = Some(system);
            self.commit(None, Some(&mut dialectic))?;

            info!(
                dialectic = %dialectic_id,
                overall = analysis.overall_score,
                "Belief system analyzed"
            );
            Ok(analysis)
        })
    }

    /// Adds the observation contexts extrapolated from a philosophy's
    /// structured text to the self model's graph.
    ///
    /// Parses are cached per philosophy. A context whose name path (its
    /// ancestors' names and its own) is already in the stored graph is not
    /// added again; only states it lacks are declared on the stored one. Seeding
    /// the same text twice therefore adds nothing, even after the cache is
    /// cleared or the engine restarts. Returns the number of contexts added.
    ///
    /// # Errors
    ///
    /// Returns validation, cache, or storage failures.
    pub fn seed_philosophy(
        &self,
        self_model: &SelfModelId,
        philosophy_id: &str,
        structured_text: &str,
    ) -> DialecticResult<usize> {
        self.with_scope(self_model, || {
            let contexts = self
                .philosophies
                .get_or_extrapolate(philosophy_id, structured_text)?;
            let mut system = self.load_or_new_system(self_model)?;
            let (added, new_states) = merge_contexts(ensure_context(&mut system), &contexts)?;

            if added > 0 || new_states > 0 {
                self.commit(Some(&mut system), None)?;
            }
            info!(self_model = %self_model, philosophy_id, added, new_states, "Philosophy seeded");
            Ok(added)
        })
    }
}

/// Merges an extrapolated forest into `ppc` by name path.
///
/// `contexts` lists parents before their children. Returns the number of
/// contexts added and of states declared on contexts that were already there.
fn merge_contexts(
    ppc: &mut PredictiveProcessingContext,
    contexts: &[ObservationContext],
) -> Result<(usize, usize), ValidationError> {
    let mut known: HashMap<Vec<String>, ObservationContextId> = ppc
        .observation_contexts()
        .iter()
        .filter_map(|c| ppc.name_path(c.id).map(|path| (path, c.id)))
        .collect();
    // Extrapolated id -> (name path, id in `ppc`).
    let mut placed: HashMap<ObservationContextId, (Vec<String>, ObservationContextId)> = HashMap::new();
    let (mut added, mut new_states) = (0usize, 0usize);

    for context in contexts {
        let parent = context.parent_id.and_then(|id| placed.get(&id));
        let mut path = parent.map(|(path, _)| path.clone()).unwrap_or_default();
        path.push(context.name.clone());
        let parent_id = parent.map(|(_, id)| *id);

        let target = if let Some(&existing) = known.get(&path) {
            for state in context.possible_states() {
                if ppc.add_state(existing, state.as_str())? {
                    new_states += 1;
                }
            }
            existing
        } else {
            let mut fresh = context.clone();
            fresh.parent_id = parent_id;
            if ppc.observation_context(fresh.id).is_some() {
                fresh.id = ObservationContextId::new();
            }
            let id = ppc.add_observation_context(fresh)?;
            known.insert(path.clone(), id);
            added += 1;
            id
        };
        placed.insert(context.id, (path, target));
    }
    Ok((added, new_states))
}

fn check(cancel: &CancellationToken) -> DialecticResult<()> {
    if cancel.is_cancelled() {
        debug!("Update cancelled before commit");
        return Err(DialecticError::Cancelled);
    }
    Ok(())
}

fn non_blank(text: &str) -> Result<&str, InvalidStateError> {
    let text = text.trim();
    if text.is_empty() {
        return Err(InvalidStateError::EmptyRequest);
    }
    Ok(text)
}

fn last_pending(dialectic: &Dialectic) -> Result<InteractionId, InvalidStateError> {
    let last = dialectic
        .last_interaction()
        .ok_or(InvalidStateError::NoInteractions { dialectic: dialectic.id })?;
    if !last.is_pending() {
        return Err(InvalidStateError::NotPendingAnswer {
            interaction: last.id,
            status: last.status(),
        });
    }
    Ok(last.id)
}

/// Stages `record` as version `base + 1`, expecting `base` to be the latest
/// stored version (or the key to be absent when `base` is 0).
fn versioned_op<R: Record>(scope: &str, key: &str, record: &R, base: u64) -> Result<StoreOp, StorageError> {
    let next = base + 1;
    let mut value = record.to_stored()?;
    if let Some(fields) = value.body.as_object_mut() {
        fields.insert("version".to_string(), serde_json::Value::from(next));
    }
    Ok(StoreOp::new(scope, key, value, next).with_check(VersionCheck::latest((base > 0).then_some(base))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborator::ScriptedCollaborator;
    use crate::dialectic::InteractionStatus;
    use crate::storage::InMemoryDocumentStore;

    fn engine_with(collab: ScriptedCollaborator) -> (DialecticEngine, Arc<InMemoryDocumentStore>) {
        let store = Arc::new(InMemoryDocumentStore::new());
        let engine = DialecticEngine::new(store.clone(), Arc::new(collab), EngineConfig::default()).unwrap();
        (engine, store)
    }

    fn subject() -> SelfModelId {
        SelfModelId::new("subject-1")
    }

    #[test]
    fn test_update_request_from_parts() {
        assert_eq!(UpdateRequest::from_parts(None, None, None), UpdateRequest::None);
        assert_eq!(
            UpdateRequest::from_parts(Some("a".into()), Some("q".into()), None),
            UpdateRequest::Answer("a".into())
        );
        assert_eq!(
            UpdateRequest::from_parts(None, Some("q".into()), Some("b".into())),
            UpdateRequest::QuestionBlob("q".into())
        );
    }

    #[test]
    fn test_create_persists_one_pending_question() {
        let (engine, _) = engine_with(ScriptedCollaborator::new().with_questions(["How do you spend mornings?"]));
        let dialectic = engine.create_dialectic(&subject(), DialecticType::Default).unwrap();
        assert_eq!(dialectic.interactions().len(), 1);
        assert!(dialectic.interactions()[0].is_pending());
        assert_eq!(dialectic.version, 1);

        let loaded = engine.get_dialectic(&subject(), dialectic.id).unwrap();
        assert_eq!(loaded, dialectic);
    }

    #[test]
    fn test_answer_bumps_both_versions() {
        let (engine, _) = engine_with(ScriptedCollaborator::new());
        let dialectic = engine.create_dialectic(&subject(), DialecticType::Default).unwrap();
        let outcome = engine
            .update(
                &subject(),
                dialectic.id,
                UpdateRequest::Answer("I cook every night".into()),
                false,
                &CancellationToken::new(),
            )
            .unwrap();
        assert!(outcome.persisted);
        assert_eq!(outcome.dialectic.version, 2);
        assert_eq!(outcome.belief_system.version, 1);
        assert!(outcome.compute_level.is_some());

        let stored = engine.belief_system(&subject()).unwrap();
        assert_eq!(stored.version, 1);
        assert_eq!(stored.beliefs(), outcome.belief_system.beliefs());
    }

    #[test]
    fn test_blank_answer_is_rejected() {
        let (engine, _) = engine_with(ScriptedCollaborator::new());
        let dialectic = engine.create_dialectic(&subject(), DialecticType::Default).unwrap();
        let err = engine
            .update(
                &subject(),
                dialectic.id,
                UpdateRequest::Answer("   ".into()),
                false,
                &CancellationToken::new(),
            )
            .unwrap_err();
        assert!(matches!(err, DialecticError::InvalidState(InvalidStateError::EmptyRequest)));
    }

    #[test]
    fn test_empty_request_still_persists() {
        let (engine, _) = engine_with(ScriptedCollaborator::new());
        let dialectic = engine.create_dialectic(&subject(), DialecticType::Default).unwrap();
        let outcome = engine
            .update(&subject(), dialectic.id, UpdateRequest::None, false, &CancellationToken::new())
            .unwrap();
        assert!(outcome.persisted);
        assert_eq!(outcome.dialectic.version, 2);
        assert_eq!(outcome.dialectic.interactions().len(), 1);
        assert!(outcome.ambiguity.is_none());
    }

    #[test]
    fn test_unknown_dialectic() {
        let (engine, _) = engine_with(ScriptedCollaborator::new());
        let err = engine
            .update(
                &subject(),
                DialecticId::new(),
                UpdateRequest::None,
                false,
                &CancellationToken::new(),
            )
            .unwrap_err();
        assert!(err.is_not_found());
        assert!(engine.belief_system(&subject()).unwrap_err().is_not_found());
    }

    #[test]
    fn test_answer_blob_answers_pending_questions() {
        let (engine, _) = engine_with(ScriptedCollaborator::new().with_questions(["Do you run?"]));
        let dialectic = engine.create_dialectic(&subject(), DialecticType::Default).unwrap();
        let cancel = CancellationToken::new();
        engine
            .update(
                &subject(),
                dialectic.id,
                UpdateRequest::QuestionBlob("Do you swim? Do you cycle?".into()),
                false,
                &cancel,
            )
            .unwrap();

        let outcome = engine
            .update(
                &subject(),
                dialectic.id,
                UpdateRequest::AnswerBlob("I run on weekends\n\nI cycle to work".into()),
                false,
                &cancel,
            )
            .unwrap();

        let statuses: Vec<_> = outcome.dialectic.interactions().iter().map(|i| i.status()).collect();
        assert_eq!(
            statuses,
            [
                InteractionStatus::Answered,
                InteractionStatus::Answered,
                InteractionStatus::PendingAnswer,
                InteractionStatus::PendingAnswer,
            ]
        );
        // Answers are matched by position, not by content.
        assert_eq!(outcome.dialectic.interactions()[1].answer(), Some("I cycle to work"));
        assert_eq!(outcome.belief_system.metrics.total_beliefs, 2);
    }

    #[test]
    fn test_seed_philosophy_is_idempotent() {
        let (engine, _) = engine_with(ScriptedCollaborator::new());
        let text = "[[Circadian Rhythm]]\n  ((asleep))\n  ((awake))\n";
        assert_eq!(engine.seed_philosophy(&subject(), "sleep", text).unwrap(), 1);
        assert_eq!(engine.seed_philosophy(&subject(), "sleep", text).unwrap(), 0);
        assert_eq!(engine.philosophies().len(), 1);

        let system = engine.belief_system(&subject()).unwrap();
        let ppc = system.predictive_processing().unwrap();
        assert_eq!(ppc.observation_contexts().len(), 1);
        assert_eq!(system.version, 1);
    }

    #[test]
    fn test_scope_entries_are_released() {
        let (engine, _) = engine_with(ScriptedCollaborator::new());
        let dialectic = engine.create_dialectic(&subject(), DialecticType::Default).unwrap();
        engine
            .update(&subject(), dialectic.id, UpdateRequest::None, false, &CancellationToken::new())
            .unwrap();
        engine
            .update(&subject(), DialecticId::new(), UpdateRequest::None, false, &CancellationToken::new())
            .unwrap_err();
        assert!(engine.scopes.lock().unwrap().is_empty());
    }

    #[test]
    fn test_scope_entry_survives_while_held() {
        let (engine, _) = engine_with(ScriptedCollaborator::new());
        let held = engine
            .with_scope(&subject(), || {
                let scopes = engine.scopes.lock().unwrap();
                let held = scopes.get(&subject()).map(Arc::clone);
                held.ok_or_else(|| DialecticError::internal("no scope entry"))
            })
            .unwrap();
        // The extra clone keeps the entry alive until it is gone.
        assert_eq!(engine.scopes.lock().unwrap().len(), 1);
        drop(held);
        engine.with_scope(&subject(), || Ok(())).unwrap();
        assert!(engine.scopes.lock().unwrap().is_empty());
    }

    #[test]
    fn test_analyze_records_snapshot() {
        let (engine, _) = engine_with(ScriptedCollaborator::new());
        let dialectic = engine.create_dialectic(&subject(), DialecticType::Default).unwrap();
        engine
            .update(
                &subject(),
                dialectic.id,
                UpdateRequest::Answer("I journal daily".into()),
                false,
                &CancellationToken::new(),
            )
            .unwrap();

        let analysis = engine.analyze(&subject(), dialectic.id).unwrap();
        assert!((analysis.falsifiability - 1.0).abs() < 1e-12);

        let stored = engine.get_dialectic(&subject(), dialectic.id).unwrap();
        let recorded = stored.analysis.unwrap();
        assert!((recorded.overall_score - analysis.overall_score).abs() < 1e-12);
        assert_eq!(recorded.recommendations, analysis.recommendations);
        assert!(stored.belief_system_snapshot.is_some());
    }
}
