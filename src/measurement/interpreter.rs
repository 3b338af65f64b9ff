//! Numeric measurement to state likelihood.

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// A named state covering a closed numeric range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateBounds {
    pub name: String,
    pub min: Option<f64>,
    pub max: Option<f64>,
}

impl StateBounds {
    pub fn new(name: impl Into<String>, min: f64, max: f64) -> Self {
        Self {
            name: name.into(),
            min: Some(min),
            max: Some(max),
        }
    }

    /// The validated `(min, max)` pair.
    ///
    /// # Errors
    ///
    /// See [`validate_state`].
    pub fn range(&self) -> Result<(f64, f64), ValidationError> {
        let min = self.min.ok_or_else(|| ValidationError::MissingStateBound {
            state: self.name.clone(),
            bound: "min",
        })?;
        let max = self.max.ok_or_else(|| ValidationError::MissingStateBound {
            state: self.name.clone(),
            bound: "max",
        })?;
        if !min.is_finite() || !max.is_finite() || min >= max {
            return Err(ValidationError::InvalidStateBounds {
                state: self.name.clone(),
                min,
                max,
            });
        }
        Ok((min, max))
    }
}

/// Checks that a state declares both bounds and that `min < max`.
///
/// # Errors
///
/// Returns `ValidationError::MissingStateBound` or
/// `ValidationError::InvalidStateBounds`.
pub fn validate_state(state: &StateBounds) -> Result<(), ValidationError> {
    state.range().map(|_| ())
}

/// Shape parameters of the likelihood curve.
///
/// Inside a state's range the likelihood falls linearly from `peak` at the
/// midpoint to `edge` at either bound. Outside it decays as
/// `edge * exp(-decay * distance / width)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StateInterpreter {
    pub peak: f64,
    pub edge: f64,
    pub decay: f64,
}

impl Default for StateInterpreter {
    fn default() -> Self {
        Self {
            peak: 1.0,
            edge: 0.5,
            decay: 3.0,
        }
    }
}

impl StateInterpreter {
    /// Likelihood of `measurement` under `state`.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::NonFiniteMeasurement` for NaN or infinite
    /// input, or the errors of [`validate_state`].
    pub fn calculate_likelihood(&self, measurement: f64, state: &StateBounds) -> Result<f64, ValidationError> {
        if !measurement.is_finite() {
            return Err(ValidationError::NonFiniteMeasurement { value: measurement });
        }
        let (min, max) = state.range()?;
        let width = max - min;

        if (min..=max).contains(&measurement) {
            let mid = min + width / 2.0;
            let half = width / 2.0;
            let offset = (measurement - mid).abs() / half;
            return Ok(self.peak - (self.peak - self.edge) * offset);
        }

        let distance = if measurement < min { min - measurement } else { measurement - max };
        Ok(self.edge * (-self.decay * distance / width).exp())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adult() -> StateBounds {
        StateBounds::new("adult", 18.0, 65.0)
    }

    #[test]
    fn test_validate_state() {
        assert!(validate_state(&adult()).is_ok());

        let missing = StateBounds {
            name: "open".into(),
            min: Some(1.0),
            max: None,
        };
        assert!(matches!(
            validate_state(&missing),
            Err(ValidationError::MissingStateBound { bound: "max", .. })
        ));

        let inverted = StateBounds::new("inverted", 5.0, 5.0);
        assert!(matches!(
            validate_state(&inverted),
            Err(ValidationError::InvalidStateBounds { .. })
        ));
    }

    #[test]
    fn test_midpoint_is_maximal() {
        let interp = StateInterpreter::default();
        let mid = interp.calculate_likelihood(41.5, &adult()).unwrap();
        let near_edge = interp.calculate_likelihood(20.0, &adult()).unwrap();
        let edge = interp.calculate_likelihood(18.0, &adult()).unwrap();
        assert!((mid - 1.0).abs() < 1e-12);
        assert!(mid > near_edge && near_edge > edge);
        assert!((edge - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_symmetric_inside() {
        let interp = StateInterpreter::default();
        let low = interp.calculate_likelihood(30.0, &adult()).unwrap();
        let high = interp.calculate_likelihood(53.0, &adult()).unwrap();
        assert!((low - high).abs() < 1e-12);
    }

    #[test]
    fn test_exponential_decay_outside() {
        let interp = StateInterpreter::default();
        let state = StateBounds::new("s", 0.0, 10.0);
        let d1 = interp.calculate_likelihood(11.0, &state).unwrap();
        let d2 = interp.calculate_likelihood(12.0, &state).unwrap();
        let below = interp.calculate_likelihood(-1.0, &state).unwrap();
        assert!(d1 < 0.5 && d2 < d1);
        assert!((d1 - below).abs() < 1e-12);
        assert!(((d2 / d1) - (d1 / 0.5)).abs() < 1e-12);
    }

    #[test]
    fn test_non_finite_measurement() {
        let interp = StateInterpreter::default();
        assert!(interp.calculate_likelihood(f64::NAN, &adult()).is_err());
        assert!(interp.calculate_likelihood(f64::INFINITY, &adult()).is_err());
    }
}
