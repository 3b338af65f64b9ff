//! Confidence ratings attached to belief contexts.
//!
//! A belief context never has "a confidence"; it has a history of ratings.
//! Revision appends a new rating and leaves earlier ones untouched, so the
//! latest rating is always the last element of the history.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Who produced a confidence rating.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RatingSource {
    /// Seeded when the belief context was created.
    Default,

    /// Computed by the revision engine.
    System,

    /// Supplied by the subject or an operator.
    Asserted {
        by: String,
    },
}

impl fmt::Display for RatingSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Default => write!(f, "default"),
            Self::System => write!(f, "system"),
            Self::Asserted { by } => write!(f, "asserted({by})"),
        }
    }
}

/// One entry in a belief context's confidence history.
///
/// # Examples
///
/// ```
/// use dialectic::ConfidenceRating;
///
/// let rating = ConfidenceRating::default_rating(0.8).unwrap();
/// assert!(rating.is_default);
/// assert!((rating.score() - 0.8).abs() < f64::EPSILON);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceRating {
    /// Confidence in [0.0, 1.0].
    score: f64,

    /// True for the rating seeded at creation time.
    pub is_default: bool,

    pub assessed_at: DateTime<Utc>,

    pub source: RatingSource,
}

impl ConfidenceRating {
    /// Minimum valid score.
    pub const MIN_SCORE: f64 = 0.0;

    /// Maximum valid score.
    pub const MAX_SCORE: f64 = 1.0;

    /// Creates a rating with validation.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::ConfidenceOutOfRange` if the score is not in [0.0, 1.0].
    pub fn new(score: f64, is_default: bool, source: RatingSource) -> Result<Self, ValidationError> {
        Self::validate_score(score)?;
        Ok(Self {
            score,
            is_default,
            assessed_at: Utc::now(),
            source,
        })
    }

    /// Creates the default rating a fresh belief context starts with.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::ConfidenceOutOfRange` if the score is not in [0.0, 1.0].
    pub fn default_rating(score: f64) -> Result<Self, ValidationError> {
        Self::new(score, true, RatingSource::Default)
    }

    /// Creates a rating computed by the revision engine.
    ///
    /// Scores are clamped rather than rejected: revision arithmetic on valid
    /// inputs can only drift outside the range by rounding.
    #[must_use]
    pub fn system(score: f64) -> Self {
        let score = if score.is_finite() {
            score.clamp(Self::MIN_SCORE, Self::MAX_SCORE)
        } else {
            Self::MIN_SCORE
        };
        Self {
            score,
            is_default: false,
            assessed_at: Utc::now(),
            source: RatingSource::System,
        }
    }

    pub const fn score(&self) -> f64 {
        self.score
    }

    pub fn is_high(&self) -> bool {
        self.score >= 0.8
    }

    pub fn is_low(&self) -> bool {
        self.score < 0.5
    }

    fn validate_score(score: f64) -> Result<(), ValidationError> {
        if score.is_nan() || !(Self::MIN_SCORE..=Self::MAX_SCORE).contains(&score) {
            return Err(ValidationError::ConfidenceOutOfRange { value: score });
        }
        Ok(())
    }
}

impl fmt::Display for ConfidenceRating {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2} ({})", self.score, self.source)
    }
}

/// Population variance of a set of scores, in [0.0, 0.25] for scores in [0, 1].
#[must_use]
pub fn variance(scores: &[f64]) -> f64 {
    if scores.len() < 2 {
        return 0.0;
    }
    #[allow(clippy::cast_precision_loss)]
    let n = scores.len() as f64;
    let mean = scores.iter().sum::<f64>() / n;
    scores.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / n
}
