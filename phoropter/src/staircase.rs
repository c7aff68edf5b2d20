//! 1-up/2-down acuity staircase.
//!
//! Per-eye adaptive procedure that converges on the smallest letter line
//! the patient reads reliably. One incorrect response turns the staircase
//! toward easier (larger) letters; two consecutive correct responses turn
//! it toward harder (smaller) letters; the presentation index moves one
//! table step in the current direction on every trial. Direction changes
//! are counted as reversals and the procedure stops after six of them,
//! estimating threshold from the last four reversal points.
//!
//! Every transition produces a new state value; nothing is mutated in
//! place, so frozen snapshots can be read concurrently and replayed.

use serde::{Deserialize, Serialize};

use crate::Eye;

/// Acuity presentation table in logMAR, coarsest (largest letters) first.
pub const LOGMAR_STEPS: [f64; 12] = [
    1.0, 0.9, 0.8, 0.7, 0.6, 0.5, 0.4, 0.3, 0.2, 0.1, 0.0, -0.1,
];

/// Default starting position in [`LOGMAR_STEPS`].
pub const DEFAULT_START_INDEX: usize = 6;

/// Reversals required before the staircase is considered converged.
pub const STOP_REVERSALS: u32 = 6;

/// Reversals averaged for the threshold estimate.
const THRESHOLD_REVERSALS: usize = 4;

/// Trials inspected by the convergence-confidence heuristic.
const CONFIDENCE_WINDOW: usize = 6;

/// Direction of the staircase's last step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepDirection {
    /// Toward smaller letters (higher table index).
    Harder,
    /// Toward larger letters (lower table index).
    Easier,
}

/// One recorded acuity trial: the table index shown and the verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcuityTrial {
    /// Table index the line was presented at.
    pub size_index: usize,
    /// Whether the line was read correctly.
    pub correct: bool,
}

/// Immutable snapshot of a per-eye acuity staircase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StaircaseState {
    /// Eye under test.
    pub eye: Eye,
    /// Current position in [`LOGMAR_STEPS`].
    pub size_index: usize,
    /// Direction of the last step taken.
    pub direction: StepDirection,
    /// Direction changes recorded so far.
    pub reversals: u32,
    /// Every trial taken, oldest first.
    pub history: Vec<AcuityTrial>,
}

impl StaircaseState {
    /// Fresh staircase at `start_index`, stepping harder until the first
    /// incorrect response.
    pub fn init(eye: Eye, start_index: usize) -> Self {
        Self {
            eye,
            size_index: start_index.min(LOGMAR_STEPS.len() - 1),
            direction: StepDirection::Harder,
            reversals: 0,
            history: Vec::new(),
        }
    }

    /// Record one response and step the staircase.
    ///
    /// Returns the successor state; `self` is untouched. Once the staircase
    /// has converged further responses are ignored and the frozen state is
    /// returned unchanged.
    pub fn advance(&self, correct: bool) -> StaircaseState {
        if self.is_complete() {
            log::warn!(
                "acuity staircase for {:?} already converged; response ignored",
                self.eye
            );
            return self.clone();
        }

        let mut history = self.history.clone();
        history.push(AcuityTrial {
            size_index: self.size_index,
            correct,
        });

        let direction = next_direction(self.direction, &history);
        // The very first trial establishes a direction, it cannot reverse one.
        let reversed = direction != self.direction && history.len() > 1;
        let reversals = if reversed {
            self.reversals + 1
        } else {
            self.reversals
        };

        StaircaseState {
            eye: self.eye,
            size_index: step_index(self.size_index, direction),
            direction,
            reversals,
            history,
        }
    }

    /// Whether the stopping criterion ([`STOP_REVERSALS`]) has been met.
    pub fn is_complete(&self) -> bool {
        self.reversals >= STOP_REVERSALS
    }

    /// Best available acuity threshold estimate in logMAR.
    ///
    /// With fewer than four reversals this is just the value at the current
    /// index. Otherwise the history is replayed through the same direction
    /// rule `advance` applies, the presentation indices at the last four
    /// reversals are averaged, and the mean is rounded to the nearest table
    /// index (0.5 rounds away from zero).
    pub fn threshold(&self) -> f64 {
        let reversal_indices = self.reversal_indices();
        if reversal_indices.len() < THRESHOLD_REVERSALS {
            return LOGMAR_STEPS[self.size_index];
        }
        let tail = &reversal_indices[reversal_indices.len() - THRESHOLD_REVERSALS..];
        let mean = tail.iter().map(|&i| i as f64).sum::<f64>() / tail.len() as f64;
        let index = (mean.round() as usize).min(LOGMAR_STEPS.len() - 1);
        LOGMAR_STEPS[index]
    }

    /// Convergence confidence in [0, 1].
    ///
    /// A heuristic, not a statistical estimator: with at least six trials,
    /// the fraction read correctly over the last six is mapped onto fixed
    /// bands (the 1-up/2-down procedure targets roughly 71% correct at
    /// convergence). Fewer than six trials report a neutral 0.5.
    pub fn confidence(&self) -> f64 {
        if self.history.len() < CONFIDENCE_WINDOW {
            return 0.5;
        }
        let recent = &self.history[self.history.len() - CONFIDENCE_WINDOW..];
        let correct = recent.iter().filter(|t| t.correct).count();
        let ratio = correct as f64 / CONFIDENCE_WINDOW as f64;
        if (0.67..=0.83).contains(&ratio) {
            0.9
        } else if (0.5..0.67).contains(&ratio) {
            0.75
        } else if ratio > 0.83 {
            // Reading everything: the staircase has not pushed hard enough yet
            0.8
        } else {
            0.6
        }
    }

    /// Presentation index at each recorded reversal, oldest first.
    ///
    /// Recovered by folding the history through [`next_direction`], the
    /// same rule `advance` uses, so the replay agrees with the live
    /// reversal count on every reachable history.
    fn reversal_indices(&self) -> Vec<usize> {
        let mut out = Vec::new();
        let mut direction = StepDirection::Harder;
        for n in 1..=self.history.len() {
            let prefix = &self.history[..n];
            let next = next_direction(direction, prefix);
            if next != direction && n > 1 {
                out.push(prefix[n - 1].size_index);
            }
            direction = next;
        }
        out
    }
}

/// Direction implied by the newest trial in `history`.
///
/// One miss always turns the staircase easier; a correct response paired
/// with a correct response on the trial before turns it harder; anything
/// else keeps the previous direction.
fn next_direction(prev: StepDirection, history: &[AcuityTrial]) -> StepDirection {
    let last = match history.last() {
        Some(trial) => trial,
        None => return prev,
    };
    if !last.correct {
        StepDirection::Easier
    } else if history.len() >= 2 && history[history.len() - 2].correct {
        StepDirection::Harder
    } else {
        prev
    }
}

/// One table step in `direction`, clamped to the table bounds.
fn step_index(index: usize, direction: StepDirection) -> usize {
    match direction {
        StepDirection::Harder => (index + 1).min(LOGMAR_STEPS.len() - 1),
        StepDirection::Easier => index.saturating_sub(1),
    }
}

/// Rough spherical-equivalent estimate from an acuity threshold.
///
/// A fixed linear approximation, not a clinical conversion: acuity at or
/// better than logMAR 0.0 maps to plano, anything worse maps to
/// `-1.5 D per logMAR unit`, rounded to the nearest quarter diopter.
pub fn logmar_to_sphere(logmar: f64) -> f64 {
    if logmar <= 0.0 {
        return 0.0;
    }
    let diopters = -logmar * 1.5;
    (diopters * 4.0).round() / 4.0
}
