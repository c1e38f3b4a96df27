//! Step model: one named, idempotent unit of system mutation.

use crate::caps::Capabilities;
use anyhow::Result;

pub type StepAction = Box<dyn Fn(&dyn Capabilities) -> Result<()>>;

/// Returns `Some(reason)` when the step's target state already holds and
/// the action should not run.
pub type SkipCheck = Box<dyn Fn(&dyn Capabilities) -> Result<Option<String>>>;

pub struct Step {
    pub name: String,
    pub description: String,
    /// Failure of a required step halts the run; optional failures are
    /// recorded and execution continues.
    pub required: bool,
    pub depends_on: Vec<String>,
    pub action: StepAction,
    pub skip_check: Option<SkipCheck>,
}

impl Step {
    pub fn new<F>(name: impl Into<String>, description: impl Into<String>, action: F) -> Self
    where
        F: Fn(&dyn Capabilities) -> Result<()> + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            required: false,
            depends_on: Vec::new(),
            action: Box::new(action),
            skip_check: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn after(mut self, deps: &[&str]) -> Self {
        self.depends_on = deps.iter().map(|d| d.to_string()).collect();
        self
    }

    pub fn skip_when<F>(mut self, check: F) -> Self
    where
        F: Fn(&dyn Capabilities) -> Result<Option<String>> + 'static,
    {
        self.skip_check = Some(Box::new(check));
        self
    }
}

/// Outcome of one step. Immutable once recorded in the run report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    Succeeded,
    Skipped(String),
    Failed(String),
    NotAttempted(String),
}

impl StepOutcome {
    pub fn kind(&self) -> &'static str {
        match self {
            StepOutcome::Succeeded => "OK",
            StepOutcome::Skipped(_) => "SKIP",
            StepOutcome::Failed(_) => "FAIL",
            StepOutcome::NotAttempted(_) => "BLOCKED",
        }
    }

    pub fn detail(&self) -> Option<&str> {
        match self {
            StepOutcome::Succeeded => None,
            StepOutcome::Skipped(reason) => Some(reason),
            StepOutcome::Failed(error) => Some(error),
            StepOutcome::NotAttempted(reason) => Some(reason),
        }
    }
}
