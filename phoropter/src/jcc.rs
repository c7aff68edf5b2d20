//! Jackson Cross Cylinder refinement.
//!
//! Per-eye two-phase binary search over astigmatism. The axis phase rotates
//! a probe axis toward whichever of two flipped presentations the patient
//! prefers, shrinking the rotation step after three consecutive identical
//! choices and handing over to the power phase once the finest step has
//! seen the same sustained agreement. The power phase walks cylinder
//! strength in quarter-diopter steps until the patient's preferences
//! stabilize or the cylinder leaves its useful range.
//!
//! States are immutable; `advance` returns a successor value.

use serde::{Deserialize, Serialize};

use crate::Eye;

/// Axis rotation step sizes in degrees, coarsest first.
pub const AXIS_STEPS: [i32; 3] = [15, 10, 5];

/// Cylinder adjustment per power-phase choice, in diopters.
pub const CYL_STEP: f64 = 0.25;

/// Strongest cylinder the procedure will prescribe.
pub const CYL_FLOOR: f64 = -2.0;

/// Cylinder strength the power phase starts from.
pub const START_CYL: f64 = -0.5;

/// Identical consecutive choices required to shrink the axis step, leave
/// the axis phase, or stop the power phase.
const CONSISTENT_RUN: usize = 3;

/// Trials inspected by the oscillation-confidence heuristic.
const CONFIDENCE_WINDOW: usize = 4;

/// Phase of the cross-cylinder search. Moves one way only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JccStage {
    /// Refining the cylinder axis.
    Axis,
    /// Refining the cylinder power.
    Power,
    /// Both refined; the state is frozen.
    Done,
}

/// The patient's pick between the two presented comparisons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Choice {
    /// "Image one", the flip at minus 45 degrees from the probe axis.
    First,
    /// "Image two", the flip at plus 45 degrees.
    Second,
}

impl Choice {
    /// Map a spoken "1" / "2" onto a choice. Anything else is rejected so
    /// the caller can discard the response instead of guessing.
    pub fn from_index(index: u8) -> Option<Choice> {
        match index {
            1 => Some(Choice::First),
            2 => Some(Choice::Second),
            _ => None,
        }
    }
}

/// One recorded comparison: the probe settings shown and the pick.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct JccTrial {
    /// Probe axis when the comparison was presented.
    pub axis_deg: i32,
    /// The patient's pick.
    pub choice: Choice,
    /// Cylinder power when the comparison was presented.
    pub cyl: f64,
}

/// Final axis/power pair reported by a cross-cylinder search.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct JccResult {
    /// Cylinder axis in degrees, in `[0, 180)`.
    pub axis_deg: i32,
    /// Cylinder power in diopters, a multiple of 0.25 in `[-2.0, 0]`.
    pub cyl: f64,
}

/// Immutable snapshot of a per-eye cross-cylinder search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JccState {
    /// Eye under test.
    pub eye: Eye,
    /// Current phase.
    pub stage: JccStage,
    /// Current probe axis in degrees, in `[0, 180)`.
    pub axis_deg: i32,
    /// Current axis rotation step.
    pub step_deg: i32,
    /// Current cylinder power.
    pub cyl: f64,
    /// Every comparison taken, oldest first.
    pub history: Vec<JccTrial>,
}

impl JccState {
    /// Fresh search probing `start_axis_deg` with the coarsest step.
    pub fn init(eye: Eye, start_axis_deg: i32) -> Self {
        Self {
            eye,
            stage: JccStage::Axis,
            axis_deg: start_axis_deg.rem_euclid(180),
            step_deg: AXIS_STEPS[0],
            cyl: START_CYL,
            history: Vec::new(),
        }
    }

    /// The two comparison orientations to present for the current probe,
    /// each 45 degrees to one side of it.
    pub fn flip_axes(&self) -> (i32, i32) {
        (
            (self.axis_deg - 45).rem_euclid(180),
            (self.axis_deg + 45).rem_euclid(180),
        )
    }

    /// Record one comparison choice and refine the search.
    ///
    /// Returns the successor state; `self` is untouched. A finished search
    /// ignores further choices and returns the frozen state unchanged.
    pub fn advance(&self, choice: Choice) -> JccState {
        match self.stage {
            JccStage::Axis => self.advance_axis(choice),
            JccStage::Power => self.advance_power(choice),
            JccStage::Done => {
                log::warn!(
                    "cross-cylinder search for {:?} already finished; choice ignored",
                    self.eye
                );
                self.clone()
            }
        }
    }

    fn advance_axis(&self, choice: Choice) -> JccState {
        let mut history = self.history.clone();
        history.push(JccTrial {
            axis_deg: self.axis_deg,
            choice,
            cyl: self.cyl,
        });

        let delta = match choice {
            Choice::First => -self.step_deg,
            Choice::Second => self.step_deg,
        };
        let axis_deg = (self.axis_deg + delta).rem_euclid(180);

        let replay = replay_axis(&history);
        let stage = if replay.exited {
            log::info!(
                "axis phase for {:?} settled at {} degrees; refining power",
                self.eye,
                axis_deg
            );
            JccStage::Power
        } else {
            JccStage::Axis
        };

        JccState {
            eye: self.eye,
            stage,
            axis_deg,
            step_deg: replay.step_deg,
            cyl: self.cyl,
            history,
        }
    }

    fn advance_power(&self, choice: Choice) -> JccState {
        let mut history = self.history.clone();
        history.push(JccTrial {
            axis_deg: self.axis_deg,
            choice,
            cyl: self.cyl,
        });

        let cyl = round_quarter(match choice {
            Choice::First => self.cyl - CYL_STEP,
            Choice::Second => self.cyl + CYL_STEP,
        });

        let axis_trials = replay_axis(&history).trials;
        let power_choices: Vec<Choice> = history[axis_trials..].iter().map(|t| t.choice).collect();
        let consistent = power_choices.len() >= CONSISTENT_RUN
            && power_choices[power_choices.len() - CONSISTENT_RUN..]
                .iter()
                .all(|&c| c == choice);

        let done = cyl.abs() >= CYL_FLOOR.abs() || cyl >= 0.0 || consistent;
        let (stage, cyl) = if done {
            (JccStage::Done, cyl.clamp(CYL_FLOOR, 0.0))
        } else {
            (JccStage::Power, cyl)
        };

        JccState {
            eye: self.eye,
            stage,
            axis_deg: self.axis_deg,
            step_deg: self.step_deg,
            cyl,
            history,
        }
    }

    /// Whether both phases have finished.
    pub fn is_complete(&self) -> bool {
        self.stage == JccStage::Done
    }

    /// Current best axis/power pair. Before `Done` this is the search's
    /// working value, reported as a best-effort estimate.
    pub fn result(&self) -> JccResult {
        JccResult {
            axis_deg: self.axis_deg,
            cyl: self.cyl.clamp(CYL_FLOOR, 0.0),
        }
    }

    /// Oscillation confidence in [0, 1].
    ///
    /// A heuristic: with at least four comparisons, counts choice flips
    /// over the last four; a patient who keeps switching sides is less
    /// certain. Fewer than four comparisons report a neutral 0.5.
    pub fn confidence(&self) -> f64 {
        if self.history.len() < CONFIDENCE_WINDOW {
            return 0.5;
        }
        let recent = &self.history[self.history.len() - CONFIDENCE_WINDOW..];
        let changes = recent
            .windows(2)
            .filter(|pair| pair[0].choice != pair[1].choice)
            .count();
        match changes {
            0 => 0.9,
            1 => 0.8,
            2 => 0.7,
            _ => 0.6,
        }
    }
}

/// Axis-phase progress recovered from the history.
struct AxisReplay {
    /// Step size after the replayed trials.
    step_deg: i32,
    /// Number of leading history entries that belong to the axis phase.
    trials: usize,
    /// Whether the axis phase concluded.
    exited: bool,
}

/// Fold the history through the axis-phase step rules.
///
/// Runs of identical choices are counted from scratch after every step
/// refinement, so each of 15, 10 and 5 degrees must earn its own three
/// consecutive identical choices; the run that completes at 5 degrees ends
/// the phase. Entries after that point belong to the power phase and are
/// not consumed here.
fn replay_axis(history: &[JccTrial]) -> AxisReplay {
    let mut step_idx = 0;
    let mut run = 0;
    let mut prev: Option<Choice> = None;
    for (n, trial) in history.iter().enumerate() {
        run = match prev {
            Some(p) if p == trial.choice => run + 1,
            _ => 1,
        };
        prev = Some(trial.choice);
        if run >= CONSISTENT_RUN {
            if step_idx + 1 < AXIS_STEPS.len() {
                step_idx += 1;
                run = 0;
                prev = None;
            } else {
                return AxisReplay {
                    step_deg: AXIS_STEPS[step_idx],
                    trials: n + 1,
                    exited: true,
                };
            }
        }
    }
    AxisReplay {
        step_deg: AXIS_STEPS[step_idx],
        trials: history.len(),
        exited: false,
    }
}

/// Snap a diopter value to the nearest quarter step.
fn round_quarter(diopters: f64) -> f64 {
    (diopters * 4.0).round() / 4.0
}
