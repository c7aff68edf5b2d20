//! Phoropter harness for testing and simulation.
//!
//! Provides simulated patients and a runner that drives the exam engine
//! end to end, for integration tests and demonstrations. The harness plays
//! the role of the excluded voice/rendering layers: it answers the
//! engine's decisions the way a patient with a known refractive error
//! would.

pub mod patient;
pub mod runner;

pub use patient::{IdealPatient, NoisyPatient, PatientModel, RefractiveError};
pub use runner::{run_exam, ExamRunResults};
