//! Numeric measurements interpreted against declared state ranges.
//!
//! Each measured quantity is a [`MeasurementDimension`]: an observation
//! context whose states carry `[min, max]` bounds. Readings are turned into
//! per-state likelihoods by a [`StateInterpreter`] and folded into the
//! dimension's distribution. A [`MeasurementAggregator`] narrows the most
//! probable ranges of all informed dimensions into one [`RangeEstimate`].

mod aggregator;
mod interpreter;

pub use aggregator::{
    MeasurementAggregator, MeasurementDimension, MeasurementEstimate, MeasurementSuggestion,
    RangeEstimate, DEFAULT_ENTROPY_THRESHOLD,
};
pub use interpreter::{validate_state, StateBounds, StateInterpreter};
