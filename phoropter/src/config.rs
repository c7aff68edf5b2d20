use serde::{Deserialize, Serialize};

use crate::error::ExamError;
use crate::staircase::DEFAULT_START_INDEX;

/// Measured display geometry used to size stimuli.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DisplayCalibration {
    /// Patient-to-screen distance in centimeters.
    pub viewing_distance_cm: f64,
    /// Screen scale in pixels per centimeter.
    pub pixels_per_cm: f64,
}

impl DisplayCalibration {
    /// Reject non-finite or non-positive calibration numbers.
    pub fn validate(&self) -> Result<(), ExamError> {
        let ok = self.viewing_distance_cm.is_finite()
            && self.viewing_distance_cm > 0.0
            && self.pixels_per_cm.is_finite()
            && self.pixels_per_cm > 0.0;
        if ok {
            Ok(())
        } else {
            Err(ExamError::InvalidCalibration {
                viewing_distance_cm: self.viewing_distance_cm,
                pixels_per_cm: self.pixels_per_cm,
            })
        }
    }
}

/// Configuration for a refraction exam session.
///
/// The acuity table and the optotype alphabet are fixed design constants,
/// not configuration; only presentation and starting-point choices live
/// here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExamConfig {
    /// Display calibration, if already measured. When absent the exam
    /// requests calibration before anything else.
    pub calibration: Option<DisplayCalibration>,
    /// Letters per presented acuity line.
    pub letters_per_line: usize,
    /// Starting index into the acuity table.
    pub staircase_start_index: usize,
    /// Starting probe axis for cross-cylinder searches, degrees.
    pub jcc_start_axis_deg: i32,
}

impl Default for ExamConfig {
    fn default() -> Self {
        Self {
            calibration: None,
            letters_per_line: 5,
            staircase_start_index: DEFAULT_START_INDEX,
            jcc_start_axis_deg: 90,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_calibration_validation() {
        let good = DisplayCalibration {
            viewing_distance_cm: 100.0,
            pixels_per_cm: 37.8,
        };
        assert!(good.validate().is_ok());

        for (distance, scale) in [(0.0, 37.8), (-10.0, 37.8), (100.0, 0.0), (f64::NAN, 37.8)] {
            let bad = DisplayCalibration {
                viewing_distance_cm: distance,
                pixels_per_cm: scale,
            };
            assert!(matches!(
                bad.validate(),
                Err(ExamError::InvalidCalibration { .. })
            ));
        }
    }

    #[test]
    fn test_default_config() {
        let config = ExamConfig::default();
        assert!(config.calibration.is_none());
        assert_eq!(config.letters_per_line, 5);
        assert_eq!(config.staircase_start_index, DEFAULT_START_INDEX);
        assert_eq!(config.jcc_start_axis_deg, 90);
    }
}
