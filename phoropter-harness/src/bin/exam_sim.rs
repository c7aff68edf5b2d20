//! Run a simulated refraction exam from the command line.
//!
//! Builds a patient with a known refractive error, drives the full exam
//! against it, and prints the trial record and final prescription so the
//! engine's convergence can be eyeballed:
//!
//! ```text
//! exam_sim --threshold-logmar 0.3 --axis 35 --cyl -1.0 --lapse-rate 0.05
//! ```

use anyhow::Result;
use clap::Parser;
use phoropter::callback::ExamCallbackEvent;
use phoropter::config::ExamConfig;
use phoropter::RefractionExam;
use phoropter_harness::{run_exam, IdealPatient, NoisyPatient, PatientModel, RefractiveError};

#[derive(Parser, Debug)]
#[command(name = "exam_sim", about = "Simulate an unattended refraction exam")]
struct Args {
    /// True acuity threshold in logMAR
    #[arg(long, default_value_t = 0.2, allow_negative_numbers = true)]
    threshold_logmar: f64,

    /// True cylinder axis in degrees
    #[arg(long, default_value_t = 60)]
    axis: i32,

    /// True cylinder power in diopters (non-positive)
    #[arg(long, default_value_t = -1.25, allow_negative_numbers = true)]
    cyl: f64,

    /// Probability of a lapsed (random) response per turn
    #[arg(long, default_value_t = 0.0)]
    lapse_rate: f64,

    /// RNG seed for lapses
    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// Hard cap on patient turns
    #[arg(long, default_value_t = 400)]
    max_turns: usize,

    /// Print every recorded trial
    #[arg(long)]
    verbose: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let error = RefractiveError {
        threshold_logmar: args.threshold_logmar,
        axis_deg: args.axis,
        cyl: args.cyl,
    };

    let mut patient: Box<dyn PatientModel> = if args.lapse_rate > 0.0 {
        Box::new(NoisyPatient::new(error, args.lapse_rate, args.seed))
    } else {
        Box::new(IdealPatient::new(error))
    };

    let mut exam = RefractionExam::new(ExamConfig::default());
    let results = run_exam(&mut exam, patient.as_mut(), args.max_turns)
        .map_err(|e| anyhow::anyhow!("exam run failed: {e}"))?;

    if args.verbose {
        for event in &results.events {
            match event {
                ExamCallbackEvent::AcuityTrialRecorded {
                    eye,
                    size_index,
                    correct,
                    reversals,
                } => println!(
                    "  [{eye:?}] line at index {size_index}: {} ({reversals} reversals)",
                    if *correct { "read" } else { "missed" }
                ),
                ExamCallbackEvent::ComparisonRecorded {
                    eye,
                    axis_deg,
                    choice,
                    cyl,
                    stage,
                } => println!(
                    "  [{eye:?}] {stage:?} comparison at {axis_deg} deg / {cyl:+.2} D: {choice:?}"
                ),
                ExamCallbackEvent::StageChanged { from, to } => {
                    println!("  stage {from:?} -> {to:?}")
                }
                _ => {}
            }
        }
    }

    println!();
    println!("true error:  {:+.2} logMAR, {:+.2} D x{:03}", args.threshold_logmar, args.cyl, args.axis);
    println!(
        "exam:        {} turns ({} lines, {} comparisons), {}",
        results.turns,
        results.acuity_trials,
        results.comparison_trials,
        if results.completed {
            "completed"
        } else {
            "capped before completion"
        }
    );
    println!("OD:          {}", results.summary.od);
    println!("OS:          {}", results.summary.os);

    for error in &results.errors {
        log::error!("{error}");
    }

    Ok(())
}
