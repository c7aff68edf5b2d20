//! Simulated patient response models.
//!
//! Patients answer the two kinds of questions the exam asks: "read this
//! line" and "which of these two looks clearer". The ideal model responds
//! from a known true refractive error with one human touch: when the two
//! comparisons look about the same it repeats its previous answer instead
//! of flipping a coin, which is also what lets the cross-cylinder
//! stopping rules fire. The noisy model layers seeded random lapses on
//! top for robustness runs.

use phoropter::jcc::{Choice, JccStage};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// A true refractive error for a simulated patient.
#[derive(Debug, Clone, Copy)]
pub struct RefractiveError {
    /// Smallest readable acuity level in logMAR.
    pub threshold_logmar: f64,
    /// True cylinder axis in degrees.
    pub axis_deg: i32,
    /// True cylinder power in diopters (non-positive).
    pub cyl: f64,
}

/// Trait for simulated patient behavior.
pub trait PatientModel: Send {
    /// Respond to a letter line presented at `logmar`; returns the raw
    /// transcript the speech layer would deliver.
    fn read_line(&mut self, logmar: f64, letters: &str) -> String;

    /// Pick between the two presented comparisons.
    fn choose_comparison(
        &mut self,
        stage: JccStage,
        axis1_deg: i32,
        axis2_deg: i32,
        cyl: f64,
    ) -> Choice;

    /// Get model description
    fn description(&self) -> &str;
}

/// Angular separation between two cylinder axes, in degrees.
fn axis_distance(a_deg: i32, b_deg: i32) -> i32 {
    let d = (a_deg - b_deg).rem_euclid(180);
    d.min(180 - d)
}

/// Deterministic responder with a known refractive error.
///
/// Reads a line verbatim when it is at or above the acuity threshold and
/// answers with filler otherwise. Comparison picks go to whichever option
/// sits closer to the true error; when the options are within the
/// indifference margin the previous answer is repeated.
pub struct IdealPatient {
    error: RefractiveError,
    /// Margin below which two comparisons look the same, degrees.
    axis_indifference_deg: i32,
    last_choice: Choice,
}

impl IdealPatient {
    pub fn new(error: RefractiveError) -> Self {
        Self {
            error,
            axis_indifference_deg: 16,
            last_choice: Choice::First,
        }
    }

    /// The true error this patient responds from.
    pub fn error(&self) -> RefractiveError {
        self.error
    }
}

impl PatientModel for IdealPatient {
    fn read_line(&mut self, logmar: f64, letters: &str) -> String {
        if logmar >= self.error.threshold_logmar {
            letters.to_string()
        } else {
            "um, I can't tell".to_string()
        }
    }

    fn choose_comparison(
        &mut self,
        stage: JccStage,
        axis1_deg: i32,
        axis2_deg: i32,
        cyl: f64,
    ) -> Choice {
        let choice = match stage {
            JccStage::Axis | JccStage::Done => {
                let d1 = axis_distance(axis1_deg, self.error.axis_deg);
                let d2 = axis_distance(axis2_deg, self.error.axis_deg);
                if (d1 - d2).abs() < self.axis_indifference_deg {
                    self.last_choice
                } else if d1 < d2 {
                    Choice::First
                } else {
                    Choice::Second
                }
            }
            JccStage::Power => {
                // Stronger is option one, weaker is option two
                let d1 = (cyl - 0.25 - self.error.cyl).abs();
                let d2 = (cyl + 0.25 - self.error.cyl).abs();
                if (d1 - d2).abs() < 1e-9 {
                    self.last_choice
                } else if d1 < d2 {
                    Choice::First
                } else {
                    Choice::Second
                }
            }
        };
        self.last_choice = choice;
        choice
    }

    fn description(&self) -> &str {
        "Ideal responder (deterministic, perseverates on indifference)"
    }
}

/// A patient that occasionally lapses: misreads a line or picks a random
/// comparison, with seeded randomness so runs are reproducible.
pub struct NoisyPatient {
    inner: IdealPatient,
    lapse_rate: f64,
    rng: ChaCha8Rng,
}

impl NoisyPatient {
    pub fn new(error: RefractiveError, lapse_rate: f64, seed: u64) -> Self {
        Self {
            inner: IdealPatient::new(error),
            lapse_rate: lapse_rate.clamp(0.0, 1.0),
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }
}

impl PatientModel for NoisyPatient {
    fn read_line(&mut self, logmar: f64, letters: &str) -> String {
        if self.rng.gen_bool(self.lapse_rate) {
            "uh".to_string()
        } else {
            self.inner.read_line(logmar, letters)
        }
    }

    fn choose_comparison(
        &mut self,
        stage: JccStage,
        axis1_deg: i32,
        axis2_deg: i32,
        cyl: f64,
    ) -> Choice {
        if self.rng.gen_bool(self.lapse_rate) {
            let choice = if self.rng.gen_range(0..2) == 0 {
                Choice::First
            } else {
                Choice::Second
            };
            // A lapse still anchors later perseveration
            self.inner.last_choice = choice;
            choice
        } else {
            self.inner.choose_comparison(stage, axis1_deg, axis2_deg, cyl)
        }
    }

    fn description(&self) -> &str {
        "Ideal responder with seeded random lapses"
    }
}
