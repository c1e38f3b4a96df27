//! Terminal rendering of the run report and exit-code mapping.

use archup_core::report::RunReport;
use archup_core::step::StepOutcome;
use colored::Colorize;

/// Exit codes, one per failure class.
pub mod exit_code {
    pub const SUCCESS: i32 = 0;
    pub const REQUIRED_STEP_FAILED: i32 = 1;
    pub const CONFIG_ERROR: i32 = 2;
    pub const ALREADY_RUNNING: i32 = 3;
    pub const INTERRUPTED: i32 = 4;
}

pub fn print_report(report: &RunReport) {
    for entry in report.entries() {
        let padded = format!("{:<8}", entry.outcome.kind());
        let tag = match entry.outcome {
            StepOutcome::Succeeded => padded.green().bold(),
            StepOutcome::Skipped(_) => padded.yellow(),
            StepOutcome::Failed(_) => padded.red().bold(),
            StepOutcome::NotAttempted(_) => padded.red(),
        };
        match entry.outcome.detail() {
            Some(detail) => println!("{}{} — {}", tag, entry.step, detail),
            None => println!("{}{}", tag, entry.step),
        }
    }

    let counts = report.counts();
    println!(
        "\nSummary: {} ok, {} skipped, {} failed, {} blocked",
        counts.ok, counts.skipped, counts.failed, counts.blocked
    );

    let failures = report.required_failures();
    if !failures.is_empty() {
        let names: Vec<&str> = failures.iter().map(|e| e.step.as_str()).collect();
        eprintln!(
            "{} required steps did not complete: {}",
            "error:".red().bold(),
            names.join(", ")
        );
        eprintln!(
            "fix the cause and re-run; completed steps are idempotent and will be skipped"
        );
    }
}

pub fn exit_code_for(report: &RunReport, interrupted: bool) -> i32 {
    if interrupted {
        return exit_code::INTERRUPTED;
    }
    if report.succeeded() {
        exit_code::SUCCESS
    } else {
        exit_code::REQUIRED_STEP_FAILED
    }
}
