#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Opportunity score discretization.
//!
//! Maps a tract's household income at age 35 to a 0-10 score using
//! fixed ascending breakpoints. The same breakpoints (plus a final
//! `60_000` stop) drive the tract fill color ramp, so the color a user
//! sees on the map always matches the score shown elsewhere.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Upper income bound (inclusive) for scores 0 through 9. Incomes above
/// the last breakpoint score [`MAX_SCORE`].
pub const INCOME_BREAKPOINTS: [f64; 10] = [
    10_000.0, 25_000.0, 28_000.0, 30_000.0, 32_000.0, 34_000.0, 36_000.0, 38_000.0, 41_000.0,
    45_000.0,
];

/// Income at which the color ramp reaches its last color.
pub const RAMP_CEILING: f64 = 60_000.0;

/// Highest possible score.
pub const MAX_SCORE: u8 = 10;

/// Ramp colors from score 0 (dark red) to score 10 (dark blue).
pub const SCORE_COLORS: [&str; 11] = [
    "#9b252f", "#b65441", "#d07e59", "#e5a979", "#f4d79e", "#fcfdc1", "#cdddb5", "#9dbda9",
    "#729d9d", "#4f7f8b", "#34687e",
];

/// A value outside `0..=MAX_SCORE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("score {0} is outside 0..=10")]
pub struct ScoreOutOfRange(pub u8);

/// A derived 0-10 opportunity score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub struct OpportunityScore(u8);

impl OpportunityScore {
    #[must_use]
    pub const fn value(self) -> u8 {
        self.0
    }

    /// Fill color for this score.
    #[must_use]
    pub const fn color(self) -> &'static str {
        let index = if self.0 > MAX_SCORE { MAX_SCORE } else { self.0 };
        SCORE_COLORS[index as usize]
    }
}

impl TryFrom<u8> for OpportunityScore {
    type Error = ScoreOutOfRange;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        if value > MAX_SCORE {
            return Err(ScoreOutOfRange(value));
        }
        Ok(Self(value))
    }
}

impl std::fmt::Display for OpportunityScore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<OpportunityScore> for u8 {
    fn from(score: OpportunityScore) -> Self {
        score.0
    }
}

/// Converts an income into an opportunity score.
///
/// Returns the index of the first breakpoint the income does not exceed,
/// or [`MAX_SCORE`] above the last one. `None` income yields `None`.
/// Negative and `NaN` incomes fall into the lowest bucket.
#[must_use]
pub fn score_from_income(income: Option<f64>) -> Option<OpportunityScore> {
    let income = income?;

    let index = INCOME_BREAKPOINTS
        .iter()
        .position(|&upper| income.is_nan() || income <= upper)
        .unwrap_or(INCOME_BREAKPOINTS.len());

    #[allow(clippy::cast_possible_truncation)]
    Some(OpportunityScore(index as u8))
}

/// Color for a raw score value, clamped to `0..=10`.
#[must_use]
pub fn score_color(score: i32) -> &'static str {
    #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
    let index = score.clamp(0, i32::from(MAX_SCORE)) as usize;
    SCORE_COLORS[index]
}

/// Stops for the tract fill color ramp: `(income, color)` pairs in
/// ascending income order.
#[must_use]
pub fn color_ramp(breakpoints: &[f64]) -> Vec<(f64, &'static str)> {
    breakpoints
        .iter()
        .copied()
        .chain(std::iter::once(RAMP_CEILING))
        .zip(SCORE_COLORS)
        .collect()
}
