//! Run report: the ordered, immutable record of outcomes for one run.
//!
//! Entries are appended in execution order and never modified afterwards.
//! The report can be rendered as summary lines and persisted as one JSON
//! object per line with a stable field order (timestamp, step, outcome,
//! detail).

use crate::step::StepOutcome;
use anyhow::Context;
use serde::Serialize;
use std::fs;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

fn now_unix_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[derive(Debug, Clone)]
pub struct ReportEntry {
    pub at_unix_ms: u64,
    pub step: String,
    pub required: bool,
    pub outcome: StepOutcome,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OutcomeCounts {
    pub ok: usize,
    pub skipped: usize,
    pub failed: usize,
    pub blocked: usize,
}

#[derive(Debug)]
pub struct RunReport {
    pub started_at_unix_ms: u64,
    pub ended_at_unix_ms: Option<u64>,
    entries: Vec<ReportEntry>,
}

impl Default for RunReport {
    fn default() -> Self {
        Self::new()
    }
}

impl RunReport {
    pub fn new() -> Self {
        Self {
            started_at_unix_ms: now_unix_ms(),
            ended_at_unix_ms: None,
            entries: Vec::new(),
        }
    }

    pub(crate) fn record(&mut self, step: &str, required: bool, outcome: StepOutcome) {
        self.entries.push(ReportEntry {
            at_unix_ms: now_unix_ms(),
            step: step.to_string(),
            required,
            outcome,
        });
    }

    pub(crate) fn finalize(&mut self) {
        self.ended_at_unix_ms = Some(now_unix_ms());
    }

    pub fn entries(&self) -> &[ReportEntry] {
        &self.entries
    }

    pub fn counts(&self) -> OutcomeCounts {
        let mut counts = OutcomeCounts::default();
        for entry in &self.entries {
            match entry.outcome {
                StepOutcome::Succeeded => counts.ok += 1,
                StepOutcome::Skipped(_) => counts.skipped += 1,
                StepOutcome::Failed(_) => counts.failed += 1,
                StepOutcome::NotAttempted(_) => counts.blocked += 1,
            }
        }
        counts
    }

    /// Required steps that failed or never ran. These determine the
    /// overall process exit status; optional failures do not.
    pub fn required_failures(&self) -> Vec<&ReportEntry> {
        self.entries
            .iter()
            .filter(|e| {
                e.required
                    && matches!(
                        e.outcome,
                        StepOutcome::Failed(_) | StepOutcome::NotAttempted(_)
                    )
            })
            .collect()
    }

    pub fn succeeded(&self) -> bool {
        self.required_failures().is_empty()
    }

    /// Plain-text rendering: one tagged line per step in execution order,
    /// then the per-category counts and any required failures.
    pub fn summary_lines(&self) -> Vec<String> {
        let mut lines = Vec::with_capacity(self.entries.len() + 2);
        for entry in &self.entries {
            match entry.outcome.detail() {
                Some(detail) => {
                    lines.push(format!("{:<8}{} — {}", entry.outcome.kind(), entry.step, detail))
                }
                None => lines.push(format!("{:<8}{}", entry.outcome.kind(), entry.step)),
            }
        }
        let counts = self.counts();
        lines.push(format!(
            "Summary: {} ok, {} skipped, {} failed, {} blocked",
            counts.ok, counts.skipped, counts.failed, counts.blocked
        ));
        let failures = self.required_failures();
        if !failures.is_empty() {
            let names: Vec<&str> = failures.iter().map(|e| e.step.as_str()).collect();
            lines.push(format!("Required steps failed: {}", names.join(", ")));
        }
        lines
    }

    /// Persists the report as JSON lines, atomically (write + rename).
    pub fn write_log(&self, path: &Path) -> anyhow::Result<()> {
        #[derive(Serialize)]
        struct LogLine<'a> {
            at_unix_ms: u64,
            step: &'a str,
            required: bool,
            outcome: &'a str,
            detail: Option<&'a str>,
        }

        let mut payload = String::new();
        for entry in &self.entries {
            let line = LogLine {
                at_unix_ms: entry.at_unix_ms,
                step: &entry.step,
                required: entry.required,
                outcome: entry.outcome.kind(),
                detail: entry.outcome.detail(),
            };
            payload.push_str(
                &serde_json::to_string(&line).context("failed to serialize report entry")?,
            );
            payload.push('\n');
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("failed to create report directory: {}", parent.display())
            })?;
        }
        let tmp = path.with_extension("log.tmp");
        fs::write(&tmp, payload).with_context(|| format!("failed to write {}", tmp.display()))?;
        fs::rename(&tmp, path)
            .with_context(|| format!("failed to atomically replace report: {}", path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample_report() -> RunReport {
        let mut report = RunReport::new();
        report.record("update", true, StepOutcome::Succeeded);
        report.record(
            "mirrors",
            false,
            StepOutcome::Failed("reflector exploded".to_string()),
        );
        report.record(
            "fonts",
            false,
            StepOutcome::Skipped("already installed".to_string()),
        );
        report.record(
            "gaming",
            false,
            StepOutcome::NotAttempted("blocked by dependency 'multilib-repo'".to_string()),
        );
        report.finalize();
        report
    }

    #[test]
    fn counts_and_success_reflect_outcomes() {
        let report = sample_report();
        let counts = report.counts();
        assert_eq!(counts.ok, 1);
        assert_eq!(counts.skipped, 1);
        assert_eq!(counts.failed, 1);
        assert_eq!(counts.blocked, 1);
        // The only failure is optional, so the run still counts as good.
        assert!(report.succeeded());
    }

    #[test]
    fn required_failures_drive_success() {
        let mut report = RunReport::new();
        report.record("update", true, StepOutcome::Failed("boom".to_string()));
        report.finalize();
        assert!(!report.succeeded());
        assert_eq!(report.required_failures()[0].step, "update");
    }

    #[test]
    fn summary_lines_tag_each_step_in_order() {
        let lines = sample_report().summary_lines();
        assert!(lines[0].starts_with("OK"));
        assert!(lines[0].contains("update"));
        assert!(lines[1].starts_with("FAIL"));
        assert!(lines[2].starts_with("SKIP"));
        assert!(lines[3].starts_with("BLOCKED"));
        assert_eq!(lines[4], "Summary: 1 ok, 1 skipped, 1 failed, 1 blocked");
    }

    #[test]
    fn log_lines_have_stable_field_order() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("report").join("run.log");
        sample_report().write_log(&path).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 4);
        for line in &lines {
            assert!(line.starts_with("{\"at_unix_ms\":"), "line: {line}");
            let value: serde_json::Value = serde_json::from_str(line).unwrap();
            assert!(value.get("step").is_some());
            assert!(value.get("outcome").is_some());
        }
        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["step"], "update");
        assert_eq!(first["outcome"], "OK");
        assert_eq!(first["detail"], serde_json::Value::Null);
        let second: serde_json::Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(second["outcome"], "FAIL");
        assert_eq!(second["detail"], "reflector exploded");
    }
}
