use std::sync::Arc;

use crate::jcc::{Choice, JccStage};
use crate::router::ExamStage;
use crate::rx::ExamSummary;
use crate::Eye;

/// Events emitted for external observers of an exam session.
#[derive(Debug, Clone)]
pub enum ExamCallbackEvent {
    /// The exam moved to a new stage.
    StageChanged {
        from: ExamStage,
        to: ExamStage,
    },
    /// An acuity trial was scored and folded into the staircase.
    AcuityTrialRecorded {
        eye: Eye,
        size_index: usize,
        correct: bool,
        reversals: u32,
    },
    /// A cross-cylinder comparison was folded into the search.
    ComparisonRecorded {
        eye: Eye,
        axis_deg: i32,
        choice: Choice,
        cyl: f64,
        stage: JccStage,
    },
    /// A per-eye procedure reached its stopping criterion.
    ProcedureComplete { eye: Eye, stage: ExamStage },
    /// The whole exam finished.
    ExamComplete { summary: ExamSummary },
}

/// Callback ID for registration/deregistration.
pub type CallbackId = u64;

/// Callback function type.
pub type ExamCallback = Arc<dyn Fn(&ExamCallbackEvent) + Send + Sync>;
