//! Sequential step execution with per-step outcomes.
//!
//! Steps run strictly one at a time: they mutate shared, non-transactional
//! resources (the package database, single config files), so serialized
//! execution with idempotent adapters is the whole safety story.

use crate::caps::Capabilities;
use crate::registry::StepRegistry;
use crate::report::RunReport;
use crate::step::{Step, StepOutcome};
use archup_error::{RunError, RunResult};
use log::{error, info, warn};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Which steps a run should attempt.
#[derive(Debug, Clone, Default)]
pub struct Selection {
    /// Restrict the run to these steps plus their transitive dependencies.
    pub only: Option<Vec<String>>,
    /// Disable optional steps (unless explicitly named in `only`).
    pub skip_optional: bool,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RunPolicy {
    pub dry_run: bool,
    pub continue_on_required_failure: bool,
}

pub struct ExecutionEngine<'a> {
    caps: &'a dyn Capabilities,
    policy: RunPolicy,
    interrupt: Option<Arc<AtomicBool>>,
}

impl<'a> ExecutionEngine<'a> {
    pub fn new(caps: &'a dyn Capabilities, policy: RunPolicy) -> Self {
        Self {
            caps,
            policy,
            interrupt: None,
        }
    }

    /// Checked between steps; when set, the remaining steps are recorded
    /// as not attempted and the report is still produced.
    pub fn with_interrupt_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.interrupt = Some(flag);
        self
    }

    fn interrupted(&self) -> bool {
        self.interrupt
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::SeqCst))
    }

    pub fn run(&self, registry: &StepRegistry, selection: &Selection) -> RunResult<RunReport> {
        let order = registry.topological_order()?;
        let disabled = resolve_disabled(registry, selection)?;

        let mut report = RunReport::new();
        let mut recorded: HashMap<String, StepOutcome> = HashMap::new();
        let mut halted: Option<String> = None;

        for idx in order {
            let step = &registry.steps()[idx];
            let outcome = self.outcome_for(step, registry, &disabled, &recorded, &halted);

            match &outcome {
                StepOutcome::Succeeded => info!("[OK] {}", step.name),
                StepOutcome::Skipped(reason) => info!("[SKIP] {} — {}", step.name, reason),
                StepOutcome::Failed(err) => {
                    error!("[FAIL] {} — {}", step.name, err);
                    if step.required && !self.policy.continue_on_required_failure {
                        halted = Some(step.name.clone());
                    }
                }
                StepOutcome::NotAttempted(reason) => warn!("[BLOCKED] {} — {}", step.name, reason),
            }

            recorded.insert(step.name.clone(), outcome.clone());
            report.record(&step.name, step.required, outcome);
        }

        report.finalize();
        Ok(report)
    }

    fn outcome_for(
        &self,
        step: &Step,
        registry: &StepRegistry,
        disabled: &HashMap<String, String>,
        recorded: &HashMap<String, StepOutcome>,
        halted: &Option<String>,
    ) -> StepOutcome {
        if self.policy.dry_run {
            return StepOutcome::Skipped("dry-run".to_string());
        }
        if self.interrupted() {
            return StepOutcome::NotAttempted("interrupted by signal".to_string());
        }
        if let Some(name) = halted {
            return StepOutcome::NotAttempted(format!("halted: required step '{name}' failed"));
        }
        if let Some(reason) = disabled.get(&step.name) {
            return StepOutcome::Skipped(reason.clone());
        }
        if let Some(blocker) = self.blocking_dependency(step, registry, recorded) {
            return StepOutcome::NotAttempted(format!("blocked by dependency '{blocker}'"));
        }
        if let Some(check) = &step.skip_check {
            match check(self.caps) {
                Ok(Some(reason)) => return StepOutcome::Skipped(reason),
                Ok(None) => {}
                // A broken skip check must not suppress the mutation.
                Err(err) => warn!("skip check for {} failed: {err:#}", step.name),
            }
        }
        match (step.action)(self.caps) {
            Ok(()) => StepOutcome::Succeeded,
            Err(err) => StepOutcome::Failed(format!("{err:#}")),
        }
    }

    /// A step is blocked when a required dependency failed, or when a
    /// dependency itself never ran; skipped dependencies count as
    /// satisfied (their target state already holds).
    fn blocking_dependency<'s>(
        &self,
        step: &'s Step,
        registry: &StepRegistry,
        recorded: &HashMap<String, StepOutcome>,
    ) -> Option<&'s str> {
        for dep in &step.depends_on {
            match recorded.get(dep.as_str()) {
                Some(StepOutcome::Failed(_)) => {
                    if registry.get(dep).map(|d| d.required).unwrap_or(false) {
                        return Some(dep.as_str());
                    }
                }
                Some(StepOutcome::NotAttempted(_)) => return Some(dep.as_str()),
                _ => {}
            }
        }
        None
    }
}

/// Maps each de-selected step to its skip reason. Steps named in `only`
/// keep their transitive dependency closure enabled; `skip_optional`
/// drops optional steps that were not explicitly asked for.
fn resolve_disabled(
    registry: &StepRegistry,
    selection: &Selection,
) -> RunResult<HashMap<String, String>> {
    let mut disabled: HashMap<String, String> = HashMap::new();

    let explicit: HashSet<&str> = selection
        .only
        .iter()
        .flatten()
        .map(String::as_str)
        .collect();

    if let Some(only) = &selection.only {
        for name in only {
            if !registry.contains(name) {
                return Err(RunError::UnknownStep(name.clone()));
            }
        }
        let mut keep: HashSet<&str> = HashSet::new();
        let mut queue: VecDeque<&str> = only.iter().map(String::as_str).collect();
        while let Some(name) = queue.pop_front() {
            if !keep.insert(name) {
                continue;
            }
            if let Some(step) = registry.get(name) {
                for dep in &step.depends_on {
                    queue.push_back(dep);
                }
            }
        }
        for step in registry.steps() {
            if !keep.contains(step.name.as_str()) {
                disabled.insert(step.name.clone(), "not selected".to_string());
            }
        }
    }

    if selection.skip_optional {
        for step in registry.steps() {
            if !step.required
                && !explicit.contains(step.name.as_str())
                && !disabled.contains_key(&step.name)
            {
                disabled.insert(step.name.clone(), "optional steps disabled".to_string());
            }
        }
    }

    Ok(disabled)
}
