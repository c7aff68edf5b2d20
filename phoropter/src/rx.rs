//! Final prescription assembly.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::jcc::JccState;
use crate::staircase::{logmar_to_sphere, StaircaseState, LOGMAR_STEPS};

/// Final spherocylindrical prescription for one eye.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EyePrescription {
    /// Spherical correction in diopters.
    pub sphere_d: f64,
    /// Cylindrical correction in diopters.
    pub cyl_d: f64,
    /// Cylinder axis in degrees.
    pub axis_deg: i32,
    /// Measured acuity threshold in logMAR.
    pub va_logmar: f64,
    /// Combined convergence confidence in [0, 1].
    pub confidence: f64,
}

/// Prescription for both eyes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExamSummary {
    /// Right eye.
    pub od: EyePrescription,
    /// Left eye.
    pub os: EyePrescription,
}

/// Assemble one eye's prescription from whatever procedure states exist.
///
/// Works on incomplete or missing procedures, reporting their best-effort
/// estimates: an absent staircase reports the starting presentation value
/// (what `threshold` would say before any trial), an absent search reports
/// no cylinder. Confidence averages the procedures that ran and is neutral
/// when none did.
pub fn summarize_eye(
    staircase: Option<&StaircaseState>,
    jcc: Option<&JccState>,
    start_index: usize,
) -> EyePrescription {
    let va_logmar = staircase
        .map(StaircaseState::threshold)
        .unwrap_or(LOGMAR_STEPS[start_index.min(LOGMAR_STEPS.len() - 1)]);
    let (cyl_d, axis_deg) = match jcc {
        Some(state) => {
            let result = state.result();
            (result.cyl, result.axis_deg)
        }
        None => (0.0, 0),
    };
    let confidence = match (staircase, jcc) {
        (Some(s), Some(j)) => (s.confidence() + j.confidence()) / 2.0,
        (Some(s), None) => s.confidence(),
        (None, Some(j)) => j.confidence(),
        (None, None) => 0.5,
    };
    EyePrescription {
        sphere_d: logmar_to_sphere(va_logmar),
        cyl_d,
        axis_deg,
        va_logmar,
        confidence,
    }
}

impl fmt::Display for EyePrescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:+.2} {:+.2} x{:03}  (VA {:.2} logMAR, confidence {:.2})",
            self.sphere_d, self.cyl_d, self.axis_deg, self.va_logmar, self.confidence
        )
    }
}
