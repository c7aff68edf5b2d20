use thiserror::Error;

/// Errors produced by the exam engine.
///
/// Expected exam conditions (unparseable speech, out-of-range responses,
/// estimates requested before enough trials) never error; they degrade to
/// documented defaults. Only caller contract violations surface here.
#[derive(Error, Debug)]
pub enum ExamError {
    /// Display calibration numbers failed validation.
    #[error("invalid display calibration: {viewing_distance_cm} cm viewing distance, {pixels_per_cm} px/cm")]
    InvalidCalibration {
        /// Measured patient-to-screen distance.
        viewing_distance_cm: f64,
        /// Measured screen scale.
        pixels_per_cm: f64,
    },
}
