//! Combines per-dimension state distributions into one bounded estimate.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::interpreter::{StateBounds, StateInterpreter};
use crate::context::ObservationContext;
use crate::error::ValidationError;

const LIKELIHOOD_FLOOR: f64 = 1e-12;

/// Normalized entropy above which another measurement is recommended.
pub const DEFAULT_ENTROPY_THRESHOLD: f64 = 0.8;

/// One measured quantity: an observation context whose states carry numeric
/// ranges, and the current distribution over those states.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasurementDimension {
    context: ObservationContext,
    states: Vec<StateBounds>,
    distribution: BTreeMap<String, f64>,
    measurements: usize,
    interpreter: StateInterpreter,
}

impl MeasurementDimension {
    /// Creates a dimension with a uniform prior over `states`.
    ///
    /// # Errors
    ///
    /// Returns a `ValidationError` if `states` is empty, a state name repeats,
    /// or any state has invalid bounds.
    pub fn new(
        name: impl Into<String>,
        states: Vec<StateBounds>,
        interpreter: StateInterpreter,
    ) -> Result<Self, ValidationError> {
        let mut context = ObservationContext::new(name);
        if states.is_empty() {
            return Err(ValidationError::EmptyDimension { name: context.name });
        }
        for state in &states {
            state.range()?;
            if !context.add_state(state.name.clone()) {
                return Err(ValidationError::DuplicateState {
                    state: state.name.clone(),
                    context: context.name,
                });
            }
        }

        #[allow(clippy::cast_precision_loss)]
        let uniform = 1.0 / states.len() as f64;
        let distribution = states.iter().map(|s| (s.name.clone(), uniform)).collect();

        Ok(Self {
            context,
            states,
            distribution,
            measurements: 0,
            interpreter,
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.context.name
    }

    #[must_use]
    pub fn context(&self) -> &ObservationContext {
        &self.context
    }

    #[must_use]
    pub fn distribution(&self) -> &BTreeMap<String, f64> {
        &self.distribution
    }

    #[must_use]
    pub fn measurements(&self) -> usize {
        self.measurements
    }

    /// Bayesian update of the state distribution with one reading.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::NonFiniteMeasurement` for NaN or infinite input.
    pub fn observe(&mut self, measurement: f64) -> Result<(), ValidationError> {
        let mut posterior = BTreeMap::new();
        let mut total = 0.0;
        for state in &self.states {
            let likelihood = self.interpreter.calculate_likelihood(measurement, state)?;
            let prior = self.distribution.get(&state.name).copied().unwrap_or(0.0);
            let mass = (prior * likelihood).max(LIKELIHOOD_FLOOR);
            total += mass;
            posterior.insert(state.name.clone(), mass);
        }
        for value in posterior.values_mut() {
            *value /= total;
        }
        self.distribution = posterior;
        self.measurements += 1;

        debug!(
            dimension = %self.context.name,
            measurement,
            entropy = self.normalized_entropy(),
            "Measurement applied"
        );
        Ok(())
    }

    /// True until the first reading is processed.
    ///
    /// A reading that leaves equal mass on every state still counts; how
    /// spread the distribution is afterwards is `normalized_entropy`'s concern.
    #[must_use]
    pub fn is_uniform(&self) -> bool {
        self.measurements == 0
    }

    /// The most probable state; ties resolve to the first declared.
    #[must_use]
    pub fn most_probable(&self) -> Option<(&StateBounds, f64)> {
        let mut best: Option<(&StateBounds, f64)> = None;
        for state in &self.states {
            let p = self.distribution.get(&state.name).copied().unwrap_or(0.0);
            if best.map_or(true, |(_, b)| p > b) {
                best = Some((state, p));
            }
        }
        best
    }

    /// Shannon entropy divided by its maximum, in [0, 1].
    #[must_use]
    pub fn normalized_entropy(&self) -> f64 {
        if self.states.len() < 2 {
            return 0.0;
        }
        let entropy: f64 = self
            .distribution
            .values()
            .filter(|&&p| p > 0.0)
            .map(|&p| -p * p.ln())
            .sum();
        #[allow(clippy::cast_precision_loss)]
        let max = (self.states.len() as f64).ln();
        (entropy / max).clamp(0.0, 1.0)
    }
}

/// What to measure next.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MeasurementSuggestion {
    NeedsInitialMeasurement { dimension: String },
    AdditionalMeasurementRecommended { dimension: String, entropy: f64 },
}

/// A closed numeric interval.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RangeEstimate {
    pub min: f64,
    pub max: f64,
}

impl RangeEstimate {
    #[must_use]
    pub fn width(&self) -> f64 {
        self.max - self.min
    }

    #[must_use]
    pub fn contains(&self, value: f64) -> bool {
        (self.min..=self.max).contains(&value)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasurementEstimate {
    /// `None` until at least one dimension contributes.
    pub range: Option<RangeEstimate>,
    pub confidence: f64,
    pub contributing: Vec<String>,
    pub suggestions: Vec<MeasurementSuggestion>,
}

/// Registry of measurement dimensions feeding one estimate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasurementAggregator {
    dimensions: Vec<MeasurementDimension>,
    entropy_threshold: f64,
}

impl Default for MeasurementAggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl MeasurementAggregator {
    #[must_use]
    pub fn new() -> Self {
        Self {
            dimensions: Vec::new(),
            entropy_threshold: DEFAULT_ENTROPY_THRESHOLD,
        }
    }

    #[must_use]
    pub fn with_entropy_threshold(mut self, threshold: f64) -> Self {
        self.entropy_threshold = threshold.clamp(0.0, 1.0);
        self
    }

    /// Registers a dimension, replacing any previous one with the same name.
    pub fn add_dimension(&mut self, dimension: MeasurementDimension) {
        self.dimensions.retain(|d| d.name() != dimension.name());
        self.dimensions.push(dimension);
    }

    #[must_use]
    pub fn dimension(&self, name: &str) -> Option<&MeasurementDimension> {
        self.dimensions.iter().find(|d| d.name() == name)
    }

    #[must_use]
    pub fn dimensions(&self) -> &[MeasurementDimension] {
        &self.dimensions
    }

    /// Feeds one reading into the named dimension.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::UnknownDimension` for an unregistered name,
    /// or the dimension's own validation errors.
    pub fn observe(&mut self, name: &str, measurement: f64) -> Result<(), ValidationError> {
        let dimension = self
            .dimensions
            .iter_mut()
            .find(|d| d.name() == name)
            .ok_or_else(|| ValidationError::UnknownDimension { name: name.to_string() })?;
        dimension.observe(measurement)
    }

    /// Narrows a running bound with the top state of every measured
    /// dimension, in registration order.
    ///
    /// When a dimension's range does not overlap the running bound the two
    /// are joined into their hull instead.
    #[must_use]
    pub fn estimate(&self) -> MeasurementEstimate {
        let mut range: Option<RangeEstimate> = None;
        let mut contributing = Vec::new();
        let mut suggestions = Vec::new();
        let mut top_sum = 0.0;

        for dimension in &self.dimensions {
            if dimension.is_uniform() {
                suggestions.push(MeasurementSuggestion::NeedsInitialMeasurement {
                    dimension: dimension.name().to_string(),
                });
                continue;
            }

            let entropy = dimension.normalized_entropy();
            if entropy > self.entropy_threshold {
                suggestions.push(MeasurementSuggestion::AdditionalMeasurementRecommended {
                    dimension: dimension.name().to_string(),
                    entropy,
                });
            }

            let Some((state, probability)) = dimension.most_probable() else {
                continue;
            };
            let Ok((min, max)) = state.range() else {
                continue;
            };
            range = Some(match range {
                None => RangeEstimate { min, max },
                Some(current) => {
                    let lo = current.min.max(min);
                    let hi = current.max.min(max);
                    if lo <= hi {
                        RangeEstimate { min: lo, max: hi }
                    } else {
                        RangeEstimate {
                            min: current.min.min(min),
                            max: current.max.max(max),
                        }
                    }
                }
            });
            top_sum += probability;
            contributing.push(dimension.name().to_string());
        }

        let confidence = if contributing.is_empty() {
            0.0
        } else {
            #[allow(clippy::cast_precision_loss)]
            let n = contributing.len() as f64;
            top_sum / n
        };

        MeasurementEstimate {
            range,
            confidence,
            contributing,
            suggestions,
        }
    }
}
