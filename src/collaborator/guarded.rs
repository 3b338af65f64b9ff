//! Timeout, retry, and circuit breaking around a language collaborator.

use std::fmt;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, RecvTimeoutError};
use tracing::{debug, info, warn};

use crate::belief::BeliefSystem;
use crate::cancel::CancellationToken;
use crate::config::CollaboratorConfig;
use crate::dialectic::{DialecticalInteraction, QaPair};
use crate::error::CollaboratorError;
use crate::ontology::Ontology;

use super::{BeliefSystemAnalysis, ExtractedBelief, LanguageCollaborator};

/// State of the circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Calls flow normally.
    Closed,
    /// Calls are rejected until the cooldown elapses.
    Open,
    /// One trial call is allowed through.
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half-open"),
        }
    }
}

#[derive(Debug, Default)]
struct Breaker {
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    trial_in_flight: bool,
}

type Shared = Arc<dyn LanguageCollaborator>;

/// Longest stretch a waiting call goes without looking at its cancellation token.
const CANCEL_POLL: Duration = Duration::from_millis(10);

/// Wraps a collaborator so every call is bounded, retried, and breaker-guarded.
///
/// Each attempt runs on its own thread and is awaited with
/// `recv_timeout`; an attempt that times out or is cancelled is abandoned,
/// not joined. The caller's token is checked before every attempt and
/// while waiting on an attempt or a retry backoff. A cancelled call does not
/// count as a breaker failure.
pub struct GuardedCollaborator {
    inner: Shared,
    config: CollaboratorConfig,
    breaker: Mutex<Breaker>,
}

impl fmt::Debug for GuardedCollaborator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GuardedCollaborator")
            .field("config", &self.config)
            .field("circuit", &self.circuit_state())
            .finish_non_exhaustive()
    }
}

impl GuardedCollaborator {
    pub fn new(inner: Arc<dyn LanguageCollaborator>, config: CollaboratorConfig) -> Self {
        Self {
            inner,
            config,
            breaker: Mutex::new(Breaker::default()),
        }
    }

    #[must_use]
    pub fn config(&self) -> &CollaboratorConfig {
        &self.config
    }

    #[must_use]
    pub fn circuit_state(&self) -> CircuitState {
        let Ok(breaker) = self.breaker.lock() else {
            return CircuitState::Open;
        };
        match breaker.opened_at {
            None => CircuitState::Closed,
            Some(at) if at.elapsed() >= self.config.cooldown() => CircuitState::HalfOpen,
            Some(_) => CircuitState::Open,
        }
    }

    fn admit(&self, operation: &'static str) -> Result<(), CollaboratorError> {
        let mut breaker = self.breaker.lock().map_err(|_| CollaboratorError::Unavailable {
            operation,
            message: "poisoned lock: collaborator.breaker".to_string(),
        })?;
        let Some(opened_at) = breaker.opened_at else {
            return Ok(());
        };
        let cooldown = self.config.cooldown();
        let elapsed = opened_at.elapsed();
        if elapsed < cooldown || breaker.trial_in_flight {
            let remaining = cooldown.saturating_sub(elapsed);
            return Err(CollaboratorError::CircuitOpen {
                operation,
                retry_after_ms: u64::try_from(remaining.as_millis()).unwrap_or(u64::MAX),
            });
        }
        breaker.trial_in_flight = true;
        debug!(operation, "Circuit half-open; allowing trial call");
        Ok(())
    }

    /// Ends an admitted call without judging the collaborator.
    fn release(&self) {
        if let Ok(mut breaker) = self.breaker.lock() {
            breaker.trial_in_flight = false;
        }
    }

    fn record(&self, operation: &'static str, ok: bool) {
        let Ok(mut breaker) = self.breaker.lock() else {
            return;
        };
        let was_trial = breaker.trial_in_flight;
        breaker.trial_in_flight = false;
        if ok {
            if breaker.opened_at.is_some() {
                info!(operation, "Circuit closing after successful trial call");
            }
            *breaker = Breaker::default();
            return;
        }
        breaker.consecutive_failures += 1;
        if was_trial || breaker.consecutive_failures >= self.config.breaker_failure_threshold {
            warn!(
                operation,
                failures = breaker.consecutive_failures,
                "Circuit opening due to collaborator failures"
            );
            breaker.opened_at = Some(Instant::now());
        }
    }

    fn attempt<T, F>(
        &self,
        operation: &'static str,
        cancel: &CancellationToken,
        f: &Arc<F>,
    ) -> Result<T, CollaboratorError>
    where
        T: Send + 'static,
        F: Fn(&dyn LanguageCollaborator) -> Result<T, CollaboratorError> + Send + Sync + 'static,
    {
        let (tx, rx) = bounded(1);
        let inner = Arc::clone(&self.inner);
        let f = Arc::clone(f);
        thread::Builder::new()
            .name(format!("collaborator-{operation}"))
            .spawn(move || {
                let _ = tx.send((*f)(inner.as_ref()));
            })
            .map_err(|e| CollaboratorError::Unavailable {
                operation,
                message: format!("failed to spawn worker: {e}"),
            })?;

        let timeout = self.config.timeout();
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match rx.recv_timeout(remaining.min(CANCEL_POLL)) {
                Ok(result) => return result,
                Err(RecvTimeoutError::Timeout) if cancel.is_cancelled() => {
                    debug!(operation, "Collaborator call abandoned on cancellation");
                    return Err(CollaboratorError::Cancelled { operation });
                }
                Err(RecvTimeoutError::Timeout) if remaining <= CANCEL_POLL => {
                    return Err(CollaboratorError::timeout(operation, timeout));
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(CollaboratorError::Unavailable {
                        operation,
                        message: "worker exited without a result".to_string(),
                    });
                }
            }
        }
    }

    /// Sleeps for `delay` unless `cancel` fires first. Returns false if it did.
    fn backoff(delay: Duration, cancel: &CancellationToken) -> bool {
        let deadline = Instant::now() + delay;
        loop {
            if cancel.is_cancelled() {
                return false;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return true;
            }
            thread::sleep(remaining.min(CANCEL_POLL));
        }
    }

    fn call<T, F>(&self, operation: &'static str, cancel: &CancellationToken, f: F) -> Result<T, CollaboratorError>
    where
        T: Send + 'static,
        F: Fn(&dyn LanguageCollaborator) -> Result<T, CollaboratorError> + Send + Sync + 'static,
    {
        if cancel.is_cancelled() {
            return Err(CollaboratorError::Cancelled { operation });
        }
        self.admit(operation)?;
        let f = Arc::new(f);
        let mut retry = 0u32;
        loop {
            match self.attempt(operation, cancel, &f) {
                Ok(value) => {
                    self.record(operation, true);
                    return Ok(value);
                }
                Err(err @ CollaboratorError::Cancelled { .. }) => {
                    self.release();
                    return Err(err);
                }
                Err(err) if err.is_transient() && retry + 1 < self.config.max_attempts => {
                    let delay = self.config.backoff_for(retry);
                    warn!(
                        operation,
                        attempt = retry + 1,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %err,
                        "Collaborator call failed; retrying"
                    );
                    if !Self::backoff(delay, cancel) {
                        debug!(operation, attempt = retry + 1, "Retry abandoned on cancellation");
                        self.release();
                        return Err(CollaboratorError::Cancelled { operation });
                    }
                    retry += 1;
                }
                Err(err) => {
                    self.record(operation, false);
                    return Err(err);
                }
            }
        }
    }

    /// # Errors
    ///
    /// Returns `MalformedResponse` for a blank question, or any guard failure.
    pub fn generate_question(
        &self,
        ontology: &Ontology,
        history: &[QaPair],
        cancel: &CancellationToken,
    ) -> Result<String, CollaboratorError> {
        let ontology = ontology.clone();
        let history = history.to_vec();
        let question = self.call("generate_question", cancel, move |c| c.generate_question(&ontology, &history))?;
        let question = question.trim();
        if question.is_empty() {
            return Err(CollaboratorError::MalformedResponse {
                operation: "generate_question",
                reason: "empty question".to_string(),
            });
        }
        Ok(question.to_string())
    }

    /// Blank statements are dropped.
    ///
    /// # Errors
    ///
    /// Returns any guard failure.
    pub fn extract_beliefs(
        &self,
        question: &str,
        answer: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<ExtractedBelief>, CollaboratorError> {
        let (question, answer) = (question.to_string(), answer.to_string());
        let extracted = self.call("extract_beliefs", cancel, move |c| c.extract_beliefs(&question, &answer))?;
        let before = extracted.len();
        let kept: Vec<_> = extracted
            .into_iter()
            .filter(|b| !b.content.trim().is_empty())
            .collect();
        if kept.len() < before {
            debug!(dropped = before - kept.len(), "Blank extracted beliefs dropped");
        }
        Ok(kept)
    }

    /// Blank questions are dropped.
    ///
    /// # Errors
    ///
    /// Returns any guard failure.
    pub fn extract_questions_from_text(
        &self,
        blob: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<String>, CollaboratorError> {
        let blob = blob.to_string();
        let questions = self.call("extract_questions_from_text", cancel, move |c| c.extract_questions_from_text(&blob))?;
        Ok(questions
            .into_iter()
            .map(|q| q.trim().to_string())
            .filter(|q| !q.is_empty())
            .collect())
    }

    /// # Errors
    ///
    /// Returns `MalformedResponse` if the answer list length differs from the
    /// question list, or any guard failure.
    pub fn match_answers_to_questions(
        &self,
        blob: &str,
        questions: &[String],
        cancel: &CancellationToken,
    ) -> Result<Vec<String>, CollaboratorError> {
        let expected = questions.len();
        let (blob, questions) = (blob.to_string(), questions.to_vec());
        let answers = self.call("match_answers_to_questions", cancel, move |c| {
            c.match_answers_to_questions(&blob, &questions)
        })?;
        if answers.len() != expected {
            return Err(CollaboratorError::MalformedResponse {
                operation: "match_answers_to_questions",
                reason: format!("expected {expected} answers, got {}", answers.len()),
            });
        }
        Ok(answers)
    }

    /// # Errors
    ///
    /// Returns `MalformedResponse` for scores outside [0, 1], or any guard failure.
    pub fn analyze_belief_system(
        &self,
        system: &BeliefSystem,
        latest: Option<&DialecticalInteraction>,
        cancel: &CancellationToken,
    ) -> Result<BeliefSystemAnalysis, CollaboratorError> {
        let (system, latest) = (system.clone(), latest.cloned());
        self.call("analyze_belief_system", cancel, move |c| {
            c.analyze_belief_system(&system, latest.as_ref())
        })?
        .validate()
    }
}
