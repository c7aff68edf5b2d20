//! Exam stage routing.
//!
//! The router is the pure decision layer of the exam: given a read-only
//! snapshot of exam progress it names the next capability the host should
//! invoke, gates capabilities on stage preconditions, and maps completed
//! capabilities onto stage transitions. It never holds state of its own
//! and never fails: a snapshot it does not recognize routes to summary
//! generation, so an unattended exam always ends with a result.

use serde::{Deserialize, Serialize};

use crate::jcc::JccStage;
use crate::Eye;

/// Exam stages, in exam order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", from = "String")]
pub enum ExamStage {
    /// Nothing has happened yet.
    Idle,
    /// Display calibration is being measured.
    Calibration,
    /// Acuity staircase, right eye.
    SphereOd,
    /// Acuity staircase, left eye.
    SphereOs,
    /// Cross-cylinder search, right eye.
    JccOd,
    /// Cross-cylinder search, left eye.
    JccOs,
    /// Optional binocular balance pass.
    Balance,
    /// All procedures finished.
    Complete,
    /// Catch-all for snapshots whose stage tag this build does not
    /// recognize; routed straight to summary.
    Unknown,
}

impl From<String> for ExamStage {
    /// Decode a wire tag, mapping anything unrecognized to [`Unknown`]
    /// instead of failing, so snapshots from newer builds still route.
    ///
    /// [`Unknown`]: ExamStage::Unknown
    fn from(tag: String) -> Self {
        match tag.as_str() {
            "idle" => ExamStage::Idle,
            "calibration" => ExamStage::Calibration,
            "sphere_od" => ExamStage::SphereOd,
            "sphere_os" => ExamStage::SphereOs,
            "jcc_od" => ExamStage::JccOd,
            "jcc_os" => ExamStage::JccOs,
            "balance" => ExamStage::Balance,
            "complete" => ExamStage::Complete,
            _ => ExamStage::Unknown,
        }
    }
}

/// The closed set of capabilities the router can request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Capability {
    /// Capture the patient's next utterance.
    #[serde(rename = "speech-capture")]
    SpeechCapture,
    /// Speak a prompt to the patient.
    #[serde(rename = "speech-synthesis")]
    SpeechSynthesis,
    /// Start an acuity staircase for one eye.
    #[serde(rename = "staircase.init")]
    StaircaseInit,
    /// Present the next staircase line.
    #[serde(rename = "staircase.next")]
    StaircaseNext,
    /// Start a cross-cylinder search for one eye.
    #[serde(rename = "jcc.init")]
    JccInit,
    /// Present the next cross-cylinder comparison.
    #[serde(rename = "jcc.next")]
    JccNext,
    /// Measure display calibration.
    #[serde(rename = "calibrate")]
    Calibrate,
    /// Run the binocular balance pass.
    #[serde(rename = "balance")]
    Balance,
    /// Produce the final prescription summary.
    #[serde(rename = "summary")]
    Summary,
}

/// Acuity staircase progress as the router sees it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SphereProgress {
    /// Whether the staircase has converged.
    pub complete: bool,
    /// Reversals recorded so far.
    pub reversals: u32,
}

/// Cross-cylinder progress as the router sees it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CylProgress {
    /// Whether the search has finished.
    pub complete: bool,
    /// Phase the search is in.
    pub stage: JccStage,
}

impl Default for CylProgress {
    fn default() -> Self {
        Self {
            complete: false,
            stage: JccStage::Axis,
        }
    }
}

/// Read-only snapshot of the whole exam, owned by the session layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExamContext {
    /// Whether display calibration numbers are available.
    pub calibrated: bool,
    /// Current exam stage.
    pub stage: ExamStage,
    /// Right-eye staircase progress.
    pub sphere_od: SphereProgress,
    /// Left-eye staircase progress.
    pub sphere_os: SphereProgress,
    /// Right-eye cross-cylinder progress.
    pub jcc_od: CylProgress,
    /// Left-eye cross-cylinder progress.
    pub jcc_os: CylProgress,
    /// Whether the exam is waiting on patient speech.
    pub awaiting_speech: bool,
}

impl ExamContext {
    fn sphere(&self, eye: Eye) -> SphereProgress {
        match eye {
            Eye::Od => self.sphere_od,
            Eye::Os => self.sphere_os,
        }
    }

    fn jcc(&self, eye: Eye) -> CylProgress {
        match eye {
            Eye::Od => self.jcc_od,
            Eye::Os => self.jcc_os,
        }
    }
}

/// Arguments attached to a [`ToolDecision`], one closed shape per need.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DecisionArgs {
    /// The capability takes no arguments.
    None,
    /// The eye the capability should operate on.
    Eye {
        /// Target eye.
        eye: Eye,
    },
    /// A letter line to present for acuity testing.
    AcuityLine {
        /// Target eye.
        eye: Eye,
        /// Letters to render, space separated.
        letters: String,
        /// Presentation table index the line belongs to.
        size_index: usize,
        /// Rendered letter height.
        letter_height_px: u32,
    },
    /// A flipped-lens comparison to present.
    CylComparison {
        /// Target eye.
        eye: Eye,
        /// Phase of the search the comparison refines.
        stage: JccStage,
        /// Orientation of image one.
        axis1_deg: i32,
        /// Orientation of image two.
        axis2_deg: i32,
        /// Cylinder power behind the comparison.
        cyl: f64,
    },
}

/// The router's output: the capability to invoke next, its arguments, a
/// human-readable rationale, and optionally the next prompt to speak.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDecision {
    /// Capability to invoke.
    pub capability: Capability,
    /// Arguments for it.
    pub args: DecisionArgs,
    /// Why the router chose it.
    pub rationale: String,
    /// Prompt to surface to the patient, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_prompt: Option<String>,
}

impl ToolDecision {
    fn new(capability: Capability, args: DecisionArgs, rationale: &str) -> Self {
        Self {
            capability,
            args,
            rationale: rationale.to_string(),
            next_prompt: None,
        }
    }

    fn with_prompt(mut self, prompt: &str) -> Self {
        self.next_prompt = Some(prompt.to_string());
        self
    }
}

/// Decide the next capability for the given exam snapshot.
///
/// Total over every snapshot: unrecognized or inconsistent stages fall
/// back to summary generation rather than failing, so the exam always
/// produces a result.
pub fn decide(ctx: &ExamContext) -> ToolDecision {
    if !ctx.calibrated {
        return ToolDecision::new(
            Capability::Calibrate,
            DecisionArgs::None,
            "display calibration is required before any stimulus can be sized",
        )
        .with_prompt("Let's set up the screen before we check your vision.");
    }

    match ctx.stage {
        ExamStage::Idle | ExamStage::Calibration => ToolDecision::new(
            Capability::StaircaseInit,
            DecisionArgs::Eye { eye: Eye::Od },
            "calibration is done; begin acuity testing with the right eye",
        )
        .with_prompt("Cover your left eye. We'll read some letters with the right."),

        ExamStage::SphereOd | ExamStage::SphereOs => {
            let eye = if ctx.stage == ExamStage::SphereOd {
                Eye::Od
            } else {
                Eye::Os
            };
            if !ctx.sphere(eye).complete {
                decide_sphere_step(ctx, eye)
            } else if !ctx.sphere(eye.other()).complete {
                ToolDecision::new(
                    Capability::StaircaseInit,
                    DecisionArgs::Eye { eye: eye.other() },
                    "this eye's staircase has converged; start the other eye",
                )
                .with_prompt("Now switch: cover the other eye.")
            } else {
                ToolDecision::new(
                    Capability::JccInit,
                    DecisionArgs::Eye { eye: Eye::Od },
                    "both acuity staircases have converged; begin astigmatism testing",
                )
                .with_prompt("Next we'll compare pairs of images. Cover your left eye again.")
            }
        }

        ExamStage::JccOd | ExamStage::JccOs => {
            let eye = if ctx.stage == ExamStage::JccOd {
                Eye::Od
            } else {
                Eye::Os
            };
            if !ctx.jcc(eye).complete {
                decide_jcc_step(ctx, eye)
            } else if !ctx.jcc(eye.other()).complete {
                ToolDecision::new(
                    Capability::JccInit,
                    DecisionArgs::Eye { eye: eye.other() },
                    "this eye's cross-cylinder search is done; start the other eye",
                )
                .with_prompt("Now switch: cover the other eye.")
            } else {
                summary_decision("both cross-cylinder searches are done; produce the prescription")
            }
        }

        ExamStage::Balance | ExamStage::Complete => {
            summary_decision("all procedures are finished; produce the prescription")
        }

        ExamStage::Unknown => {
            log::warn!("unrecognized exam stage in context; falling back to summary");
            summary_decision("exam state was not recognized; produce the best-effort prescription")
        }
    }
}

fn decide_sphere_step(ctx: &ExamContext, eye: Eye) -> ToolDecision {
    if ctx.awaiting_speech {
        ToolDecision::new(
            Capability::SpeechCapture,
            DecisionArgs::Eye { eye },
            "a letter line is on screen; listen for the patient reading it",
        )
    } else {
        ToolDecision::new(
            Capability::StaircaseNext,
            DecisionArgs::Eye { eye },
            "the staircase has not converged; present the next line",
        )
        .with_prompt("Read the letters on the screen, left to right.")
    }
}

fn decide_jcc_step(ctx: &ExamContext, eye: Eye) -> ToolDecision {
    if ctx.awaiting_speech {
        ToolDecision::new(
            Capability::SpeechCapture,
            DecisionArgs::Eye { eye },
            "a comparison is on screen; listen for the patient's pick",
        )
    } else {
        ToolDecision::new(
            Capability::JccNext,
            DecisionArgs::Eye { eye },
            "the cross-cylinder search has not finished; present the next comparison",
        )
        .with_prompt("Which looks clearer: one, or two?")
    }
}

fn summary_decision(rationale: &str) -> ToolDecision {
    ToolDecision::new(Capability::Summary, DecisionArgs::None, rationale)
        .with_prompt("That's everything. Let me put your results together.")
}

/// Whether `capability` may be invoked against the given snapshot.
///
/// A fixed precondition table; capabilities the current stage has no use
/// for are refused rather than erroring downstream.
pub fn can_invoke(capability: Capability, ctx: &ExamContext) -> bool {
    let sphere_stage = matches!(ctx.stage, ExamStage::SphereOd | ExamStage::SphereOs);
    let jcc_stage = matches!(ctx.stage, ExamStage::JccOd | ExamStage::JccOs);
    match capability {
        Capability::Calibrate => true,
        Capability::SpeechSynthesis => true,
        Capability::Summary => true,
        Capability::SpeechCapture => ctx.calibrated && (sphere_stage || jcc_stage),
        Capability::StaircaseInit => {
            ctx.calibrated
                && (sphere_stage || matches!(ctx.stage, ExamStage::Idle | ExamStage::Calibration))
        }
        Capability::StaircaseNext => ctx.calibrated && sphere_stage,
        Capability::JccInit => {
            ctx.calibrated && (jcc_stage || ctx.stage == ExamStage::SphereOs)
        }
        Capability::JccNext => ctx.calibrated && jcc_stage,
        Capability::Balance => {
            ctx.jcc_od.complete
                && ctx.jcc_os.complete
                && matches!(ctx.stage, ExamStage::JccOs | ExamStage::Balance)
        }
    }
}

/// Stage reached after `completed` finishes during `stage`.
///
/// A pure lookup table; combinations it does not name leave the stage
/// unchanged, so replaying a completion is a harmless no-op.
pub fn next_stage(stage: ExamStage, completed: Capability) -> ExamStage {
    use Capability::*;
    use ExamStage::*;
    match (stage, completed) {
        (Idle, Calibrate) => Calibration,
        (Idle, StaircaseInit) => SphereOd,
        (Calibration, StaircaseInit) => SphereOd,
        (SphereOd, StaircaseInit) => SphereOs,
        (SphereOs, JccInit) => JccOd,
        (JccOd, JccInit) => JccOs,
        (JccOs, Capability::Balance) => ExamStage::Balance,
        (JccOs, Summary) => Complete,
        (ExamStage::Balance, Summary) => Complete,
        _ => stage,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn calibrated_ctx(stage: ExamStage) -> ExamContext {
        ExamContext {
            calibrated: true,
            stage,
            sphere_od: SphereProgress::default(),
            sphere_os: SphereProgress::default(),
            jcc_od: CylProgress::default(),
            jcc_os: CylProgress::default(),
            awaiting_speech: false,
        }
    }

    fn done_sphere() -> SphereProgress {
        SphereProgress {
            complete: true,
            reversals: 6,
        }
    }

    fn done_jcc() -> CylProgress {
        CylProgress {
            complete: true,
            stage: JccStage::Done,
        }
    }

    #[test]
    fn test_uncalibrated_requests_calibration() {
        let mut ctx = calibrated_ctx(ExamStage::Idle);
        ctx.calibrated = false;
        let decision = decide(&ctx);
        assert_eq!(decision.capability, Capability::Calibrate);
        assert!(decision.next_prompt.is_some());
    }

    #[test]
    fn test_just_calibrated_starts_right_eye() {
        let decision = decide(&calibrated_ctx(ExamStage::Calibration));
        assert_eq!(decision.capability, Capability::StaircaseInit);
        assert_eq!(decision.args, DecisionArgs::Eye { eye: Eye::Od });
    }

    #[test]
    fn test_sphere_stage_presents_or_listens() {
        let mut ctx = calibrated_ctx(ExamStage::SphereOd);
        let decision = decide(&ctx);
        assert_eq!(decision.capability, Capability::StaircaseNext);

        ctx.awaiting_speech = true;
        let decision = decide(&ctx);
        assert_eq!(decision.capability, Capability::SpeechCapture);
    }

    #[test]
    fn test_sphere_complete_switches_eye_then_jcc() {
        let mut ctx = calibrated_ctx(ExamStage::SphereOd);
        ctx.sphere_od = done_sphere();
        let decision = decide(&ctx);
        assert_eq!(decision.capability, Capability::StaircaseInit);
        assert_eq!(decision.args, DecisionArgs::Eye { eye: Eye::Os });

        ctx.stage = ExamStage::SphereOs;
        ctx.sphere_os = done_sphere();
        let decision = decide(&ctx);
        assert_eq!(decision.capability, Capability::JccInit);
        assert_eq!(decision.args, DecisionArgs::Eye { eye: Eye::Od });
    }

    #[test]
    fn test_jcc_complete_switches_eye_then_summary() {
        let mut ctx = calibrated_ctx(ExamStage::JccOd);
        ctx.jcc_od = done_jcc();
        let decision = decide(&ctx);
        assert_eq!(decision.capability, Capability::JccInit);
        assert_eq!(decision.args, DecisionArgs::Eye { eye: Eye::Os });

        ctx.stage = ExamStage::JccOs;
        ctx.jcc_os = done_jcc();
        let decision = decide(&ctx);
        assert_eq!(decision.capability, Capability::Summary);
    }

    #[test]
    fn test_terminal_stages_request_summary() {
        for stage in [ExamStage::Balance, ExamStage::Complete, ExamStage::Unknown] {
            let decision = decide(&calibrated_ctx(stage));
            assert_eq!(decision.capability, Capability::Summary);
        }
    }

    #[test]
    fn test_unknown_stage_tag_decodes_to_fallback() {
        // Forward compatibility: a snapshot from a build with stages this
        // one does not know must still route somewhere safe.
        let stage: ExamStage = serde_json::from_str("\"red_green_refinement\"").unwrap();
        assert_eq!(stage, ExamStage::Unknown);
        let decision = decide(&calibrated_ctx(stage));
        assert_eq!(decision.capability, Capability::Summary);
    }

    #[test]
    fn test_can_invoke_gating() {
        let idle = calibrated_ctx(ExamStage::Idle);
        assert!(can_invoke(Capability::Calibrate, &idle));
        assert!(can_invoke(Capability::StaircaseInit, &idle));
        assert!(!can_invoke(Capability::StaircaseNext, &idle));
        assert!(!can_invoke(Capability::JccNext, &idle));
        assert!(can_invoke(Capability::Summary, &idle));

        let mut uncalibrated = calibrated_ctx(ExamStage::SphereOd);
        uncalibrated.calibrated = false;
        assert!(!can_invoke(Capability::StaircaseNext, &uncalibrated));
        assert!(!can_invoke(Capability::SpeechCapture, &uncalibrated));

        let sphere = calibrated_ctx(ExamStage::SphereOd);
        assert!(can_invoke(Capability::StaircaseNext, &sphere));
        assert!(can_invoke(Capability::SpeechCapture, &sphere));
        assert!(!can_invoke(Capability::JccNext, &sphere));

        let jcc = calibrated_ctx(ExamStage::JccOs);
        assert!(can_invoke(Capability::JccNext, &jcc));
        assert!(!can_invoke(Capability::StaircaseNext, &jcc));
    }

    #[test]
    fn test_balance_requires_both_eyes_done() {
        let mut ctx = calibrated_ctx(ExamStage::JccOs);
        assert!(!can_invoke(Capability::Balance, &ctx));
        ctx.jcc_od = done_jcc();
        ctx.jcc_os = done_jcc();
        assert!(can_invoke(Capability::Balance, &ctx));
    }

    #[test]
    fn test_next_stage_table() {
        use Capability::*;
        use ExamStage::*;
        assert_eq!(next_stage(Idle, Calibrate), Calibration);
        assert_eq!(next_stage(Calibration, StaircaseInit), SphereOd);
        assert_eq!(next_stage(SphereOd, StaircaseInit), SphereOs);
        assert_eq!(next_stage(SphereOs, JccInit), JccOd);
        assert_eq!(next_stage(JccOd, JccInit), JccOs);
        assert_eq!(next_stage(JccOs, Summary), Complete);
        assert_eq!(next_stage(JccOs, Capability::Balance), ExamStage::Balance);
        assert_eq!(next_stage(ExamStage::Balance, Summary), Complete);
    }

    #[test]
    fn test_next_stage_unmatched_is_identity() {
        use Capability::*;
        use ExamStage::*;
        assert_eq!(next_stage(SphereOd, JccInit), SphereOd);
        assert_eq!(next_stage(Complete, Summary), Complete);
        assert_eq!(next_stage(Idle, SpeechCapture), Idle);
        // Replaying a completion that was already applied changes nothing
        assert_eq!(next_stage(SphereOs, StaircaseInit), SphereOs);
    }

    #[test]
    fn test_capability_wire_names() {
        let json = serde_json::to_string(&Capability::StaircaseNext).unwrap();
        assert_eq!(json, "\"staircase.next\"");
        let json = serde_json::to_string(&Capability::SpeechCapture).unwrap();
        assert_eq!(json, "\"speech-capture\"");
        let back: Capability = serde_json::from_str("\"jcc.init\"").unwrap();
        assert_eq!(back, Capability::JccInit);
    }

    #[test]
    fn test_decision_serializes_without_empty_prompt() {
        let decision = ToolDecision::new(
            Capability::Summary,
            DecisionArgs::None,
            "exam finished",
        );
        let json = serde_json::to_string(&decision).unwrap();
        assert!(!json.contains("next_prompt"));
    }

    #[test]
    fn test_context_round_trips_through_json() {
        let mut ctx = calibrated_ctx(ExamStage::JccOd);
        ctx.sphere_od = done_sphere();
        let json = serde_json::to_string(&ctx).unwrap();
        let back: ExamContext = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ctx);
    }
}
