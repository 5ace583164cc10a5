//! Review effort scoring.
//!
//! A pull request's score grows with its change size, but is damped by a
//! Gaussian bell of width [`DECAY_WIDTH`] so that a single enormous change
//! cannot dominate reviewer routing for weeks afterwards.

use serde::{Deserialize, Serialize};

/// Width of the Gaussian decay applied to the raw change magnitude.
pub const DECAY_WIDTH: f64 = 5000.0;

/// Line counts of a pull request as reported by the source-control host.
///
/// Either count may be missing from a webhook payload; missing counts score
/// as zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSize {
    pub additions: Option<u64>,
    pub deletions: Option<u64>,
}

impl ChangeSize {
    pub fn new(additions: Option<u64>, deletions: Option<u64>) -> Self {
        Self {
            additions,
            deletions,
        }
    }

    pub fn score(&self) -> u64 {
        score(self.additions, self.deletions)
    }
}

/// Compute the review effort score for a change.
///
/// `magnitude = add + |add - del| + del`, scaled by
/// `exp(-0.5 * (magnitude / 5000)^2)` and truncated toward zero.
pub fn score(additions: Option<u64>, deletions: Option<u64>) -> u64 {
    let add = additions.unwrap_or(0) as f64;
    let del = deletions.unwrap_or(0) as f64;

    let magnitude = add + (add - del).abs() + del;
    let scaled = decay_coefficient(magnitude) * magnitude;

    // `as` saturates and maps NaN to 0, so this can never go negative.
    scaled.trunc() as u64
}

fn decay_coefficient(magnitude: f64) -> f64 {
    (-0.5 * (magnitude / DECAY_WIDTH).powi(2)).exp()
}
