//! Fake capability adapters for testing.
//!
//! Records every mutation without touching the system, and models just
//! enough state (installed packages, enabled units, group membership,
//! file contents) that the query-before-mutate adapters behave like the
//! real thing across repeated runs.

use super::{AccountOps, FileOps, PackageOps, ProcessOps, ServiceOps};
use archup_error::{CapError, CapResult};
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Operation records for testing and verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    Install { packages: Vec<String> },
    FullUpgrade,
    RefreshDatabases,
    EnableRepo { name: String },
    EnableUnit { unit: String },
    AppendLine { path: PathBuf, line: String },
    ReplacePattern { path: PathBuf, pattern: String },
    AddUserToGroup { user: String, group: String },
    SetLoginShell { user: String, shell: String },
    Command { program: String, args: Vec<String> },
}

#[derive(Debug, Default)]
struct FakeState {
    operations: Vec<Operation>,
    installed: HashSet<String>,
    enabled_repos: HashSet<String>,
    units: HashSet<String>,
    enabled_units: HashSet<String>,
    groups: HashMap<String, HashSet<String>>,
    shells: HashMap<String, String>,
    files: HashMap<PathBuf, String>,
    fail_package_ops: bool,
    fail_units: HashSet<String>,
    fail_commands: bool,
}

/// Fake capability bundle that records operations without executing them.
#[derive(Debug, Clone, Default)]
pub struct FakeCaps {
    state: Arc<Mutex<FakeState>>,
}

impl FakeCaps {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-marks a package as installed.
    pub fn with_installed(self, package: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .installed
            .insert(package.to_string());
        self
    }

    /// Registers an existing (but disabled) systemd unit.
    pub fn with_unit(self, unit: &str) -> Self {
        self.state.lock().unwrap().units.insert(unit.to_string());
        self
    }

    /// Seeds the in-memory file model.
    pub fn seed_file(&self, path: &Path, contents: &str) {
        self.state
            .lock()
            .unwrap()
            .files
            .insert(path.to_path_buf(), contents.to_string());
    }

    /// Makes every package operation fail with a command error.
    pub fn fail_package_ops(&self) {
        self.state.lock().unwrap().fail_package_ops = true;
    }

    /// Makes `ensure_enabled` fail for the named unit.
    pub fn fail_unit(&self, unit: &str) {
        self.state.lock().unwrap().fail_units.insert(unit.to_string());
    }

    /// Makes `run_command` fail.
    pub fn fail_commands(&self) {
        self.state.lock().unwrap().fail_commands = true;
    }

    pub fn operations(&self) -> Vec<Operation> {
        self.state.lock().unwrap().operations.clone()
    }

    pub fn operation_count(&self) -> usize {
        self.state.lock().unwrap().operations.len()
    }

    pub fn has_operation(&self, check: impl Fn(&Operation) -> bool) -> bool {
        self.state.lock().unwrap().operations.iter().any(check)
    }

    pub fn file_contents(&self, path: &Path) -> Option<String> {
        self.state.lock().unwrap().files.get(path).cloned()
    }

    fn record(&self, op: Operation) {
        self.state.lock().unwrap().operations.push(op);
    }

    fn command_failed(program: &str) -> CapError {
        CapError::CommandFailed {
            program: program.to_string(),
            code: Some(1),
            stderr: "simulated failure".to_string(),
        }
    }
}

impl PackageOps for FakeCaps {
    fn is_installed(&self, package: &str) -> CapResult<bool> {
        Ok(self.state.lock().unwrap().installed.contains(package))
    }

    fn ensure_installed(&self, packages: &[&str]) -> CapResult<()> {
        if self.state.lock().unwrap().fail_package_ops {
            return Err(Self::command_failed("pacman"));
        }
        let missing: Vec<String> = {
            let state = self.state.lock().unwrap();
            packages
                .iter()
                .filter(|p| !state.installed.contains(**p))
                .map(|p| p.to_string())
                .collect()
        };
        if missing.is_empty() {
            return Ok(());
        }
        let mut state = self.state.lock().unwrap();
        for pkg in &missing {
            state.installed.insert(pkg.clone());
        }
        state.operations.push(Operation::Install { packages: missing });
        Ok(())
    }

    fn full_upgrade(&self) -> CapResult<()> {
        if self.state.lock().unwrap().fail_package_ops {
            return Err(Self::command_failed("pacman"));
        }
        self.record(Operation::FullUpgrade);
        Ok(())
    }

    fn refresh_databases(&self) -> CapResult<()> {
        if self.state.lock().unwrap().fail_package_ops {
            return Err(Self::command_failed("pacman"));
        }
        self.record(Operation::RefreshDatabases);
        Ok(())
    }

    fn enable_repo(&self, name: &str) -> CapResult<()> {
        if self.state.lock().unwrap().fail_package_ops {
            return Err(Self::command_failed("pacman"));
        }
        {
            let mut state = self.state.lock().unwrap();
            if !state.enabled_repos.insert(name.to_string()) {
                return Ok(());
            }
        }
        self.record(Operation::EnableRepo {
            name: name.to_string(),
        });
        Ok(())
    }
}

impl ServiceOps for FakeCaps {
    fn unit_exists(&self, unit: &str) -> CapResult<bool> {
        Ok(self.state.lock().unwrap().units.contains(unit))
    }

    fn is_enabled(&self, unit: &str) -> CapResult<bool> {
        Ok(self.state.lock().unwrap().enabled_units.contains(unit))
    }

    fn ensure_enabled(&self, unit: &str) -> CapResult<()> {
        {
            let state = self.state.lock().unwrap();
            if state.fail_units.contains(unit) {
                return Err(Self::command_failed("systemctl"));
            }
            if !state.units.contains(unit) {
                return Err(CapError::ServiceNotFound(unit.to_string()));
            }
            if state.enabled_units.contains(unit) {
                return Ok(());
            }
        }
        self.state
            .lock()
            .unwrap()
            .enabled_units
            .insert(unit.to_string());
        self.record(Operation::EnableUnit {
            unit: unit.to_string(),
        });
        Ok(())
    }
}

impl FileOps for FakeCaps {
    fn ensure_line_in_file(&self, path: &Path, line: &str) -> CapResult<bool> {
        let mut state = self.state.lock().unwrap();
        let contents = state.files.entry(path.to_path_buf()).or_default();
        if contents.lines().any(|l| l.trim() == line.trim()) {
            return Ok(false);
        }
        if !contents.is_empty() && !contents.ends_with('\n') {
            contents.push('\n');
        }
        contents.push_str(line);
        contents.push('\n');
        state.operations.push(Operation::AppendLine {
            path: path.to_path_buf(),
            line: line.to_string(),
        });
        Ok(true)
    }

    fn ensure_pattern_replaced(
        &self,
        path: &Path,
        pattern: &str,
        replacement: &str,
    ) -> CapResult<bool> {
        let re = Regex::new(pattern).map_err(|err| CapError::Parse(err.to_string()))?;
        let mut state = self.state.lock().unwrap();
        let Some(contents) = state.files.get(path) else {
            return Err(CapError::Io(io::Error::new(
                io::ErrorKind::NotFound,
                format!("{} not seeded in FakeCaps", path.display()),
            )));
        };
        if !re.is_match(contents) {
            return Ok(false);
        }
        let updated = re.replace_all(contents, replacement).into_owned();
        if updated == *contents {
            return Ok(false);
        }
        state.files.insert(path.to_path_buf(), updated);
        state.operations.push(Operation::ReplacePattern {
            path: path.to_path_buf(),
            pattern: pattern.to_string(),
        });
        Ok(true)
    }
}

impl AccountOps for FakeCaps {
    fn user_in_group(&self, user: &str, group: &str) -> CapResult<bool> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .groups
            .get(group)
            .is_some_and(|members| members.contains(user)))
    }

    fn add_user_to_group(&self, user: &str, group: &str) -> CapResult<()> {
        let mut state = self.state.lock().unwrap();
        let inserted = state
            .groups
            .entry(group.to_string())
            .or_default()
            .insert(user.to_string());
        if inserted {
            state.operations.push(Operation::AddUserToGroup {
                user: user.to_string(),
                group: group.to_string(),
            });
        }
        Ok(())
    }

    fn ensure_login_shell(&self, user: &str, shell: &str) -> CapResult<()> {
        let mut state = self.state.lock().unwrap();
        if state.shells.get(user).is_some_and(|s| s == shell) {
            return Ok(());
        }
        state.shells.insert(user.to_string(), shell.to_string());
        state.operations.push(Operation::SetLoginShell {
            user: user.to_string(),
            shell: shell.to_string(),
        });
        Ok(())
    }
}

impl ProcessOps for FakeCaps {
    fn run_command(&self, program: &str, args: &[&str]) -> CapResult<()> {
        if self.state.lock().unwrap().fail_commands {
            return Err(Self::command_failed(program));
        }
        self.record(Operation::Command {
            program: program.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ensure_installed_records_only_missing() {
        let caps = FakeCaps::new().with_installed("git");
        caps.ensure_installed(&["git", "htop"]).unwrap();
        assert_eq!(
            caps.operations(),
            vec![Operation::Install {
                packages: vec!["htop".to_string()]
            }]
        );

        // Everything present now: a second call records nothing.
        caps.ensure_installed(&["git", "htop"]).unwrap();
        assert_eq!(caps.operation_count(), 1);
    }

    #[test]
    fn ensure_enabled_models_missing_and_enabled_units() {
        let caps = FakeCaps::new().with_unit("docker.service");
        let err = caps.ensure_enabled("ghost.service").unwrap_err();
        assert!(matches!(err, CapError::ServiceNotFound(_)));

        caps.ensure_enabled("docker.service").unwrap();
        caps.ensure_enabled("docker.service").unwrap();
        assert_eq!(
            caps.operations(),
            vec![Operation::EnableUnit {
                unit: "docker.service".to_string()
            }]
        );
    }

    #[test]
    fn file_model_tracks_appends_and_replacements() {
        let caps = FakeCaps::new();
        let path = Path::new("/etc/demo.conf");
        assert!(caps.ensure_line_in_file(path, "key=1").unwrap());
        assert!(!caps.ensure_line_in_file(path, "key=1").unwrap());
        assert_eq!(caps.file_contents(path).unwrap(), "key=1\n");

        caps.seed_file(Path::new("/etc/sudoers"), "# %wheel ALL=(ALL:ALL) ALL\n");
        assert!(caps
            .ensure_pattern_replaced(
                Path::new("/etc/sudoers"),
                r"(?m)^#\s*(%wheel.*)$",
                "$1"
            )
            .unwrap());
        assert!(caps
            .file_contents(Path::new("/etc/sudoers"))
            .unwrap()
            .starts_with("%wheel"));
    }

    #[test]
    fn group_membership_is_idempotent() {
        let caps = FakeCaps::new();
        caps.add_user_to_group("alice", "docker").unwrap();
        caps.add_user_to_group("alice", "docker").unwrap();
        assert_eq!(caps.operation_count(), 1);
        assert!(caps.user_in_group("alice", "docker").unwrap());
    }

    #[test]
    fn failure_injection_applies_to_package_ops() {
        let caps = FakeCaps::new();
        caps.fail_package_ops();
        assert!(caps.ensure_installed(&["git"]).is_err());
        assert!(caps.full_upgrade().is_err());
        assert_eq!(caps.operation_count(), 0);
    }
}
