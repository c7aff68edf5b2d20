//! PHOROPTER - adaptive refraction exam engine.
//!
//! Drives an unattended, voice-mediated refraction exam from discrete
//! patient responses. A 1-up/2-down staircase converges on each eye's
//! acuity threshold, a two-phase Jackson Cross Cylinder search refines
//! astigmatism axis and power, and a stage router sequences the procedures
//! across both eyes: calibration -> sphere(OD) -> sphere(OS) -> jcc(OD) ->
//! jcc(OS) -> summary.
//!
//! The engine consumes only structured response events and calibration
//! numbers and emits only structured state and decisions; speech I/O,
//! rendering, and persistence belong to the host. Controller states are
//! immutable values, so a frozen snapshot is always safe to read, replay,
//! or serialize.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

pub mod callback;
pub mod config;
pub mod error;
pub mod jcc;
pub mod optotype;
pub mod router;
pub mod rx;
pub mod staircase;

use serde::{Deserialize, Serialize};

use crate::callback::{CallbackId, ExamCallback, ExamCallbackEvent};
use crate::config::{DisplayCalibration, ExamConfig};
use crate::error::ExamError;
use crate::jcc::{Choice, JccState};
use crate::router::{Capability, CylProgress, DecisionArgs, ExamContext, ExamStage, SphereProgress, ToolDecision};
use crate::rx::ExamSummary;
use crate::staircase::{StaircaseState, LOGMAR_STEPS};

/// Which eye a procedure instance belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Eye {
    /// Oculus dexter, the right eye.
    #[serde(rename = "OD")]
    Od,
    /// Oculus sinister, the left eye.
    #[serde(rename = "OS")]
    Os,
}

impl Eye {
    /// The fellow eye.
    pub fn other(self) -> Eye {
        match self {
            Eye::Od => Eye::Os,
            Eye::Os => Eye::Od,
        }
    }
}

/// Inputs the exam session consumes, one per patient turn.
#[derive(Debug, Clone)]
pub enum ExamEvent {
    /// Display calibration was measured by the host.
    CalibrationMeasured {
        viewing_distance_cm: f64,
        pixels_per_cm: f64,
    },
    /// Raw transcript of the patient reading the line on screen.
    LineSpoken { eye: Eye, raw: String },
    /// An externally scored read-back verdict.
    LineScored { eye: Eye, correct: bool },
    /// The patient picked one of the two presented comparisons.
    ComparisonChosen { eye: Eye, choice: Choice },
}

/// A whole-exam session: owns the per-eye controller states, the current
/// stage, and the last presented stimulus, and turns each incoming event
/// into the next host-facing decision.
///
/// The controllers themselves stay pure; this type is the mutable shell
/// that threads their immutable states from one event to the next.
pub struct RefractionExam {
    config: ExamConfig,
    stage: ExamStage,
    staircase_od: Option<StaircaseState>,
    staircase_os: Option<StaircaseState>,
    jcc_od: Option<JccState>,
    jcc_os: Option<JccState>,
    /// Letters currently on screen, if a line has been presented.
    current_line: Option<Vec<char>>,
    awaiting_speech: bool,
    /// The decision the host should act on next.
    pending: ToolDecision,
    /// Registered callbacks
    callbacks: Arc<Mutex<HashMap<CallbackId, ExamCallback>>>,
    /// Next callback ID
    next_callback_id: Arc<Mutex<CallbackId>>,
}

impl RefractionExam {
    /// Create a new session. If the config carries calibration already the
    /// exam skips straight to the first staircase; otherwise the first
    /// decision requests calibration.
    pub fn new(config: ExamConfig) -> Self {
        let mut exam = Self {
            config,
            stage: ExamStage::Idle,
            staircase_od: None,
            staircase_os: None,
            jcc_od: None,
            jcc_os: None,
            current_line: None,
            awaiting_speech: false,
            pending: ToolDecision {
                capability: Capability::Calibrate,
                args: DecisionArgs::None,
                rationale: String::new(),
                next_prompt: None,
            },
            callbacks: Arc::new(Mutex::new(HashMap::new())),
            next_callback_id: Arc::new(Mutex::new(0)),
        };
        exam.refresh();
        exam
    }

    /// Register a callback for exam events
    pub fn register_callback<F>(&self, callback: F) -> CallbackId
    where
        F: Fn(&ExamCallbackEvent) + Send + Sync + 'static,
    {
        let mut callbacks = self.callbacks.lock().unwrap();
        let mut next_id = self.next_callback_id.lock().unwrap();

        let callback_id = *next_id;
        *next_id += 1;

        callbacks.insert(callback_id, Arc::new(callback));
        callback_id
    }

    /// Deregister a callback
    pub fn deregister_callback(&self, callback_id: CallbackId) -> bool {
        let mut callbacks = self.callbacks.lock().unwrap();
        callbacks.remove(&callback_id).is_some()
    }

    /// Get the number of registered callbacks
    pub fn callback_count(&self) -> usize {
        self.callbacks.lock().unwrap().len()
    }

    /// Emit an event to all registered callbacks
    fn emit_event(&self, event: &ExamCallbackEvent) {
        let callbacks = self.callbacks.lock().unwrap();
        for callback in callbacks.values() {
            callback(event);
        }
    }

    /// Process one event and return the next host-facing decision.
    ///
    /// Events that do not apply to the current stage are logged and
    /// ignored; the session state is unchanged and the previous decision
    /// is returned again. Only malformed calibration numbers error.
    pub fn process_event(&mut self, event: ExamEvent) -> Result<ToolDecision, ExamError> {
        match (self.stage, event) {
            (
                ExamStage::Idle | ExamStage::Calibration,
                ExamEvent::CalibrationMeasured {
                    viewing_distance_cm,
                    pixels_per_cm,
                },
            ) => {
                let calibration = DisplayCalibration {
                    viewing_distance_cm,
                    pixels_per_cm,
                };
                calibration.validate()?;
                log::info!(
                    "display calibrated: {viewing_distance_cm:.1} cm viewing distance, {pixels_per_cm:.2} px/cm"
                );
                self.config.calibration = Some(calibration);
                self.advance_stage(Capability::Calibrate);
                self.refresh();
            }

            (ExamStage::SphereOd, ExamEvent::LineSpoken { eye, raw }) if eye == Eye::Od => {
                self.apply_line_spoken(eye, &raw)
            }
            (ExamStage::SphereOs, ExamEvent::LineSpoken { eye, raw }) if eye == Eye::Os => {
                self.apply_line_spoken(eye, &raw)
            }
            (ExamStage::SphereOd, ExamEvent::LineScored { eye, correct }) if eye == Eye::Od => {
                self.apply_line_scored(eye, correct)
            }
            (ExamStage::SphereOs, ExamEvent::LineScored { eye, correct }) if eye == Eye::Os => {
                self.apply_line_scored(eye, correct)
            }
            (ExamStage::JccOd, ExamEvent::ComparisonChosen { eye, choice }) if eye == Eye::Od => {
                self.apply_comparison(eye, choice)
            }
            (ExamStage::JccOs, ExamEvent::ComparisonChosen { eye, choice }) if eye == Eye::Os => {
                self.apply_comparison(eye, choice)
            }

            // Anything else, including a response tagged with the wrong
            // eye, is a turn the exam did not ask for
            (stage, event) => {
                log::warn!("event {event:?} ignored during stage {stage:?}");
            }
        }
        Ok(self.pending.clone())
    }

    /// The decision the host should act on next. Stable between events.
    pub fn decision(&self) -> ToolDecision {
        self.pending.clone()
    }

    /// Current exam stage.
    pub fn stage(&self) -> ExamStage {
        self.stage
    }

    /// The router's read-only snapshot of this session.
    pub fn context(&self) -> ExamContext {
        ExamContext {
            calibrated: self.config.calibration.is_some(),
            stage: self.stage,
            sphere_od: sphere_progress(&self.staircase_od),
            sphere_os: sphere_progress(&self.staircase_os),
            jcc_od: cyl_progress(&self.jcc_od),
            jcc_os: cyl_progress(&self.jcc_os),
            awaiting_speech: self.awaiting_speech,
        }
    }

    /// Frozen or in-flight staircase state for an eye.
    pub fn staircase(&self, eye: Eye) -> Option<&StaircaseState> {
        match eye {
            Eye::Od => self.staircase_od.as_ref(),
            Eye::Os => self.staircase_os.as_ref(),
        }
    }

    /// Frozen or in-flight cross-cylinder state for an eye.
    pub fn jcc(&self, eye: Eye) -> Option<&JccState> {
        match eye {
            Eye::Od => self.jcc_od.as_ref(),
            Eye::Os => self.jcc_os.as_ref(),
        }
    }

    /// Session configuration.
    pub fn config(&self) -> &ExamConfig {
        &self.config
    }

    /// Best-effort prescription from whatever procedure states exist.
    pub fn summary(&self) -> ExamSummary {
        ExamSummary {
            od: rx::summarize_eye(
                self.staircase_od.as_ref(),
                self.jcc_od.as_ref(),
                self.config.staircase_start_index,
            ),
            os: rx::summarize_eye(
                self.staircase_os.as_ref(),
                self.jcc_os.as_ref(),
                self.config.staircase_start_index,
            ),
        }
    }

    /// Score raw speech against the line on screen and fold the verdict
    /// into the active staircase.
    fn apply_line_spoken(&mut self, eye: Eye, raw: &str) {
        let shown = match self.current_line.take() {
            Some(line) => line,
            None => {
                log::warn!("spoken response with no line on screen; ignored");
                return;
            }
        };
        let spoken = optotype::parse_spoken_letters(raw);
        let score = optotype::score_line(&shown, &spoken);
        log::debug!(
            "read-back scored {}/{} ({})",
            score.matches,
            score.total,
            if score.correct { "pass" } else { "fail" }
        );
        self.apply_acuity_verdict(eye, score.correct);
    }

    /// Fold an externally scored verdict into the active staircase.
    fn apply_line_scored(&mut self, eye: Eye, correct: bool) {
        self.current_line = None;
        self.apply_acuity_verdict(eye, correct);
    }

    fn apply_acuity_verdict(&mut self, eye: Eye, correct: bool) {
        let state = match self.staircase(eye) {
            Some(state) => state.clone(),
            None => {
                log::warn!("acuity verdict for {eye:?} with no staircase running; ignored");
                return;
            }
        };
        let next = state.advance(correct);
        self.emit_event(&ExamCallbackEvent::AcuityTrialRecorded {
            eye,
            size_index: state.size_index,
            correct,
            reversals: next.reversals,
        });
        let completed = next.is_complete();
        if completed {
            log::info!(
                "acuity staircase for {eye:?} converged at {:.2} logMAR after {} trials",
                next.threshold(),
                next.history.len()
            );
        }
        self.set_staircase(eye, next);
        self.awaiting_speech = false;
        if completed {
            self.emit_event(&ExamCallbackEvent::ProcedureComplete {
                eye,
                stage: self.stage,
            });
        }
        self.refresh();
    }

    fn apply_comparison(&mut self, eye: Eye, choice: Choice) {
        let state = match self.jcc(eye) {
            Some(state) => state.clone(),
            None => {
                log::warn!("comparison choice for {eye:?} with no search running; ignored");
                return;
            }
        };
        let next = state.advance(choice);
        self.emit_event(&ExamCallbackEvent::ComparisonRecorded {
            eye,
            axis_deg: state.axis_deg,
            choice,
            cyl: state.cyl,
            stage: state.stage,
        });
        let completed = next.is_complete();
        if completed {
            let result = next.result();
            log::info!(
                "cross-cylinder search for {eye:?} finished: {:.2} D at {} degrees",
                result.cyl,
                result.axis_deg
            );
        }
        self.set_jcc(eye, next);
        self.awaiting_speech = false;
        if completed {
            self.emit_event(&ExamCallbackEvent::ProcedureComplete {
                eye,
                stage: self.stage,
            });
        }
        self.refresh();
    }

    /// Re-run the router until it lands on a decision the host must act
    /// on, applying engine-internal steps (procedure initialization,
    /// stimulus generation) along the way.
    ///
    /// A normal chain applies at most two internal steps before producing
    /// a host decision; the iteration bound keeps a malformed context from
    /// spinning.
    fn refresh(&mut self) {
        for _ in 0..8 {
            let decision = router::decide(&self.context());
            match (decision.capability, &decision.args) {
                (Capability::StaircaseInit, DecisionArgs::Eye { eye }) => {
                    let eye = *eye;
                    self.set_staircase(
                        eye,
                        StaircaseState::init(eye, self.config.staircase_start_index),
                    );
                    self.advance_stage(Capability::StaircaseInit);
                }
                (Capability::JccInit, DecisionArgs::Eye { eye }) => {
                    let eye = *eye;
                    self.set_jcc(eye, JccState::init(eye, self.config.jcc_start_axis_deg));
                    self.advance_stage(Capability::JccInit);
                }
                (Capability::StaircaseNext, DecisionArgs::Eye { eye }) => {
                    let eye = *eye;
                    self.pending = self.present_line(eye);
                    self.awaiting_speech = true;
                    return;
                }
                (Capability::JccNext, DecisionArgs::Eye { eye }) => {
                    let eye = *eye;
                    self.pending = self.present_comparison(eye);
                    self.awaiting_speech = true;
                    return;
                }
                (Capability::Summary, _) => {
                    if matches!(self.stage, ExamStage::JccOs | ExamStage::Balance) {
                        self.advance_stage(Capability::Summary);
                    }
                    self.pending = router::decide(&self.context());
                    return;
                }
                _ => {
                    self.pending = decision;
                    return;
                }
            }
        }
        log::error!("router failed to settle on a host decision; falling back to summary");
        self.pending = ToolDecision {
            capability: Capability::Summary,
            args: DecisionArgs::None,
            rationale: "exam state did not settle; produce the best-effort prescription"
                .to_string(),
            next_prompt: None,
        };
    }

    /// Apply a completed capability to the stage lookup table.
    fn advance_stage(&mut self, completed: Capability) {
        let next = router::next_stage(self.stage, completed);
        if next != self.stage {
            log::info!("exam stage {:?} -> {:?}", self.stage, next);
            let from = self.stage;
            self.stage = next;
            self.emit_event(&ExamCallbackEvent::StageChanged { from, to: next });
            if next == ExamStage::Complete {
                self.emit_event(&ExamCallbackEvent::ExamComplete {
                    summary: self.summary(),
                });
            }
        }
    }

    /// Generate and record the next acuity line, returning the decision
    /// that presents it.
    fn present_line(&mut self, eye: Eye) -> ToolDecision {
        let size_index = self
            .staircase(eye)
            .map(|s| s.size_index)
            .unwrap_or(self.config.staircase_start_index)
            .min(LOGMAR_STEPS.len() - 1);
        let logmar = LOGMAR_STEPS[size_index];
        let letter_height_px = match self.config.calibration {
            Some(cal) => {
                optotype::letter_size_pixels(logmar, cal.viewing_distance_cm, cal.pixels_per_cm)
            }
            None => optotype::MIN_LETTER_PX,
        };
        let letters = optotype::generate_line(self.config.letters_per_line);
        let spaced = letters
            .iter()
            .map(char::to_string)
            .collect::<Vec<_>>()
            .join(" ");
        self.current_line = Some(letters);
        ToolDecision {
            capability: Capability::StaircaseNext,
            args: DecisionArgs::AcuityLine {
                eye,
                letters: spaced,
                size_index,
                letter_height_px,
            },
            rationale: "the staircase has not converged; present the next line".to_string(),
            next_prompt: Some("Read the letters on the screen, left to right.".to_string()),
        }
    }

    /// Build the decision that presents the next flipped-lens comparison.
    fn present_comparison(&self, eye: Eye) -> ToolDecision {
        let state = match self.jcc(eye) {
            Some(state) => state.clone(),
            None => JccState::init(eye, self.config.jcc_start_axis_deg),
        };
        let (axis1_deg, axis2_deg) = state.flip_axes();
        let prompt = match state.stage {
            jcc::JccStage::Power => "Which is sharper with this lens: one, or two?",
            _ => "Which looks clearer: one, or two?",
        };
        ToolDecision {
            capability: Capability::JccNext,
            args: DecisionArgs::CylComparison {
                eye,
                stage: state.stage,
                axis1_deg,
                axis2_deg,
                cyl: state.cyl,
            },
            rationale: "the cross-cylinder search has not finished; present the next comparison"
                .to_string(),
            next_prompt: Some(prompt.to_string()),
        }
    }

    fn set_staircase(&mut self, eye: Eye, state: StaircaseState) {
        match eye {
            Eye::Od => self.staircase_od = Some(state),
            Eye::Os => self.staircase_os = Some(state),
        }
    }

    fn set_jcc(&mut self, eye: Eye, state: JccState) {
        match eye {
            Eye::Od => self.jcc_od = Some(state),
            Eye::Os => self.jcc_os = Some(state),
        }
    }
}

fn sphere_progress(state: &Option<StaircaseState>) -> SphereProgress {
    state
        .as_ref()
        .map(|s| SphereProgress {
            complete: s.is_complete(),
            reversals: s.reversals,
        })
        .unwrap_or_default()
}

fn cyl_progress(state: &Option<JccState>) -> CylProgress {
    state
        .as_ref()
        .map(|s| CylProgress {
            complete: s.is_complete(),
            stage: s.stage,
        })
        .unwrap_or_default()
}
