//! Runner for executing a whole exam against a simulated patient.
//!
//! Drives the engine's decision loop: calibrates, relays each presented
//! stimulus to the patient model, feeds the patient's answer back as a
//! response event, and collects results. A turn cap bounds the run so a
//! patient whose answers never satisfy a stopping criterion still ends
//! with a best-effort prescription.

use std::sync::{Arc, Mutex};

use phoropter::callback::ExamCallbackEvent;
use phoropter::router::{Capability, DecisionArgs, ExamStage};
use phoropter::rx::ExamSummary;
use phoropter::staircase::LOGMAR_STEPS;
use phoropter::{ExamEvent, RefractionExam};

use crate::patient::PatientModel;

/// Calibration the runner reports to the exam: one meter from the screen
/// at a 96 dpi scale.
pub const VIEWING_DISTANCE_CM: f64 = 100.0;
pub const PIXELS_PER_CM: f64 = 37.8;

/// Results from a runner execution.
#[derive(Debug, Clone)]
pub struct ExamRunResults {
    /// Patient turns consumed (calibration included).
    pub turns: usize,
    /// Acuity lines presented and answered.
    pub acuity_trials: usize,
    /// Cross-cylinder comparisons presented and answered.
    pub comparison_trials: usize,
    /// Whether the exam reached its complete stage before the cap.
    pub completed: bool,
    /// Stage the exam ended in.
    pub final_stage: ExamStage,
    /// Final (possibly best-effort) prescription.
    pub summary: ExamSummary,
    /// All events emitted during the run.
    pub events: Vec<ExamCallbackEvent>,
    /// Any errors encountered during execution.
    pub errors: Vec<String>,
}

/// Run an exam to completion or the turn cap.
///
/// # Arguments
/// * `exam` - Exam session to drive
/// * `patient` - Patient model answering the stimuli
/// * `max_turns` - Hard cap on patient turns
pub fn run_exam<P: PatientModel + ?Sized>(
    exam: &mut RefractionExam,
    patient: &mut P,
    max_turns: usize,
) -> Result<ExamRunResults, Box<dyn std::error::Error>> {
    let events = Arc::new(Mutex::new(Vec::new()));
    let events_clone = events.clone();
    let callback_id = exam.register_callback(move |event| {
        events_clone.lock().unwrap().push(event.clone());
    });

    let mut results = ExamRunResults {
        turns: 0,
        acuity_trials: 0,
        comparison_trials: 0,
        completed: false,
        final_stage: exam.stage(),
        summary: exam.summary(),
        events: Vec::new(),
        errors: Vec::new(),
    };

    log::info!("running exam against: {}", patient.description());

    while results.turns < max_turns {
        let decision = exam.decision();
        match (decision.capability, decision.args) {
            (Capability::Calibrate, _) => {
                exam.process_event(ExamEvent::CalibrationMeasured {
                    viewing_distance_cm: VIEWING_DISTANCE_CM,
                    pixels_per_cm: PIXELS_PER_CM,
                })?;
            }
            (
                Capability::StaircaseNext,
                DecisionArgs::AcuityLine {
                    eye,
                    letters,
                    size_index,
                    ..
                },
            ) => {
                let logmar = LOGMAR_STEPS[size_index.min(LOGMAR_STEPS.len() - 1)];
                let raw = patient.read_line(logmar, &letters);
                exam.process_event(ExamEvent::LineSpoken { eye, raw })?;
                results.acuity_trials += 1;
            }
            (
                Capability::JccNext,
                DecisionArgs::CylComparison {
                    eye,
                    stage,
                    axis1_deg,
                    axis2_deg,
                    cyl,
                },
            ) => {
                let choice = patient.choose_comparison(stage, axis1_deg, axis2_deg, cyl);
                exam.process_event(ExamEvent::ComparisonChosen { eye, choice })?;
                results.comparison_trials += 1;
            }
            (Capability::Summary, _) => {
                results.completed = exam.stage() == ExamStage::Complete;
                break;
            }
            (capability, args) => {
                // The session should never hand the runner anything else;
                // bail rather than spin.
                results
                    .errors
                    .push(format!("unhandled decision {capability:?} with {args:?}"));
                break;
            }
        }
        results.turns += 1;
    }

    if results.turns >= max_turns {
        log::warn!("exam hit the {max_turns}-turn cap before completing");
    }

    results.final_stage = exam.stage();
    results.summary = exam.summary();
    results.events = events.lock().unwrap().clone();

    exam.deregister_callback(callback_id);

    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patient::{IdealPatient, RefractiveError};
    use phoropter::config::ExamConfig;

    #[test]
    fn test_runner_completes_and_cleans_up() {
        let mut exam = RefractionExam::new(ExamConfig::default());
        let mut patient = IdealPatient::new(RefractiveError {
            threshold_logmar: 0.2,
            axis_deg: 60,
            cyl: -1.25,
        });

        assert_eq!(exam.callback_count(), 0);
        let results = run_exam(&mut exam, &mut patient, 400).unwrap();
        assert_eq!(exam.callback_count(), 0, "runner should deregister");

        assert!(results.completed);
        assert_eq!(results.final_stage, ExamStage::Complete);
        assert!(results.acuity_trials > 0);
        assert!(results.comparison_trials > 0);
        assert_eq!(
            results.turns,
            1 + results.acuity_trials + results.comparison_trials
        );
        assert!(!results.events.is_empty());
        assert!(results.errors.is_empty());
    }

    #[test]
    fn test_runner_respects_turn_cap() {
        let mut exam = RefractionExam::new(ExamConfig::default());
        let mut patient = IdealPatient::new(RefractiveError {
            threshold_logmar: 0.2,
            axis_deg: 60,
            cyl: -1.25,
        });
        let results = run_exam(&mut exam, &mut patient, 5).unwrap();
        assert!(!results.completed);
        assert_eq!(results.turns, 5);
        // A capped run still reports a best-effort prescription
        assert!(results.summary.od.confidence >= 0.0);
    }
}
