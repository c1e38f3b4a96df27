//! Step registry: named steps, dependency validation, deterministic
//! topological ordering.

use crate::step::Step;
use archup_error::{RegistryError, RegistryResult};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

#[derive(Default)]
pub struct StepRegistry {
    steps: Vec<Step>,
    index: HashMap<String, usize>,
}

impl std::fmt::Debug for StepRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepRegistry")
            .field("steps", &self.steps.iter().map(|s| &s.name).collect::<Vec<_>>())
            .field("index", &self.index)
            .finish()
    }
}

impl StepRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomic construction: registers every step, then validates the whole
    /// graph. On error nothing is produced, so callers never observe a
    /// partially-registered registry.
    pub fn from_steps(steps: Vec<Step>) -> RegistryResult<Self> {
        let mut registry = Self::new();
        for step in steps {
            registry.register(step)?;
        }
        registry.validate()?;
        Ok(registry)
    }

    pub fn register(&mut self, step: Step) -> RegistryResult<()> {
        if self.index.contains_key(&step.name) {
            return Err(RegistryError::DuplicateName(step.name));
        }
        self.index.insert(step.name.clone(), self.steps.len());
        self.steps.push(step);
        Ok(())
    }

    pub fn validate(&self) -> RegistryResult<()> {
        for step in &self.steps {
            for dep in &step.depends_on {
                if !self.index.contains_key(dep) {
                    return Err(RegistryError::UnknownDependency {
                        step: step.name.clone(),
                        dependency: dep.clone(),
                    });
                }
            }
        }
        self.topological_order().map(|_| ())
    }

    /// Kahn's algorithm over the dependency DAG. The ready set is a
    /// min-heap keyed by registration index, so ties always resolve in
    /// registration order and the result is identical across runs.
    pub fn topological_order(&self) -> RegistryResult<Vec<usize>> {
        let n = self.steps.len();
        let mut indegree = vec![0usize; n];
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); n];
        for (i, step) in self.steps.iter().enumerate() {
            for dep in &step.depends_on {
                let Some(&d) = self.index.get(dep.as_str()) else {
                    return Err(RegistryError::UnknownDependency {
                        step: step.name.clone(),
                        dependency: dep.clone(),
                    });
                };
                indegree[i] += 1;
                dependents[d].push(i);
            }
        }

        let mut ready: BinaryHeap<Reverse<usize>> = indegree
            .iter()
            .enumerate()
            .filter(|(_, &deg)| deg == 0)
            .map(|(i, _)| Reverse(i))
            .collect();
        let mut order = Vec::with_capacity(n);
        while let Some(Reverse(i)) = ready.pop() {
            order.push(i);
            for &dependent in &dependents[i] {
                indegree[dependent] -= 1;
                if indegree[dependent] == 0 {
                    ready.push(Reverse(dependent));
                }
            }
        }

        if order.len() != n {
            let cycle: Vec<String> = indegree
                .iter()
                .enumerate()
                .filter(|(_, &deg)| deg > 0)
                .map(|(i, _)| self.steps[i].name.clone())
                .collect();
            return Err(RegistryError::CyclicDependency(cycle));
        }
        Ok(order)
    }

    /// Numbered plan lines in execution order, for `--plan` output.
    pub fn execution_plan(&self) -> RegistryResult<Vec<String>> {
        let order = self.topological_order()?;
        let mut lines = Vec::with_capacity(order.len() + 1);
        lines.push("Execution plan:".to_string());
        for (pos, idx) in order.iter().enumerate() {
            let step = &self.steps[*idx];
            let marker = if step.required { "required" } else { "optional" };
            lines.push(format!(
                "{:02}. {} ({}) — {}",
                pos + 1,
                step.name,
                marker,
                step.description
            ));
        }
        Ok(lines)
    }

    pub fn get(&self, name: &str) -> Option<&Step> {
        self.index.get(name).map(|&i| &self.steps[i])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop(name: &str) -> Step {
        Step::new(name, "test step", |_| Ok(()))
    }

    #[test]
    fn duplicate_name_is_rejected() {
        let mut registry = StepRegistry::new();
        registry.register(noop("a")).unwrap();
        let err = registry.register(noop("a")).unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateName(name) if name == "a"));
    }

    #[test]
    fn unknown_dependency_fails_validation() {
        let err =
            StepRegistry::from_steps(vec![noop("a").after(&["missing"])]).unwrap_err();
        match err {
            RegistryError::UnknownDependency { step, dependency } => {
                assert_eq!(step, "a");
                assert_eq!(dependency, "missing");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn two_step_cycle_fails_validation() {
        let err = StepRegistry::from_steps(vec![
            noop("a").after(&["b"]),
            noop("b").after(&["a"]),
        ])
        .unwrap_err();
        match err {
            RegistryError::CyclicDependency(members) => {
                assert!(members.contains(&"a".to_string()));
                assert!(members.contains(&"b".to_string()));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn self_dependency_is_a_cycle() {
        let err = StepRegistry::from_steps(vec![noop("a").after(&["a"])]).unwrap_err();
        assert!(matches!(err, RegistryError::CyclicDependency(_)));
    }

    #[test]
    fn order_respects_dependencies() {
        let registry = StepRegistry::from_steps(vec![
            noop("c").after(&["b"]),
            noop("b").after(&["a"]),
            noop("a"),
        ])
        .unwrap();
        let order = registry.topological_order().unwrap();
        let names: Vec<&str> = order
            .iter()
            .map(|&i| registry.steps()[i].name.as_str())
            .collect();
        assert_eq!(names, vec!["a", "b", "c"]);
    }

    #[test]
    fn ties_break_in_registration_order() {
        // No edges at all: the order must be exactly the registration order.
        let registry =
            StepRegistry::from_steps(vec![noop("z"), noop("m"), noop("a")]).unwrap();
        let order = registry.topological_order().unwrap();
        let names: Vec<&str> = order
            .iter()
            .map(|&i| registry.steps()[i].name.as_str())
            .collect();
        assert_eq!(names, vec!["z", "m", "a"]);
    }

    #[test]
    fn diamond_order_is_deterministic() {
        let build = || {
            StepRegistry::from_steps(vec![
                noop("root"),
                noop("left").after(&["root"]),
                noop("right").after(&["root"]),
                noop("join").after(&["left", "right"]),
            ])
            .unwrap()
        };
        let names = |registry: &StepRegistry| -> Vec<String> {
            registry
                .topological_order()
                .unwrap()
                .iter()
                .map(|&i| registry.steps()[i].name.clone())
                .collect()
        };
        let first = names(&build());
        assert_eq!(first, vec!["root", "left", "right", "join"]);
        // Identical input yields an identical order, call after call.
        assert_eq!(first, names(&build()));
        assert_eq!(first, names(&build()));
    }

    #[test]
    fn execution_plan_numbers_steps() {
        let registry =
            StepRegistry::from_steps(vec![noop("a").required(), noop("b").after(&["a"])])
                .unwrap();
        let lines = registry.execution_plan().unwrap();
        assert_eq!(lines[0], "Execution plan:");
        assert!(lines[1].starts_with("01. a (required)"));
        assert!(lines[2].starts_with("02. b (optional)"));
    }
}
