//! Real capability adapters for an Arch Linux host.
//!
//! Adapters shell out to the system tools (`pacman`, `systemctl`,
//! `usermod`, ...) with a per-command timeout. Each binary can be
//! overridden through an environment variable so tests can substitute
//! recording stubs.

use super::process::{output_with_timeout, status_with_timeout};
use super::{AccountOps, FileOps, PackageOps, ProcessOps, ServiceOps};
use archup_error::{CapError, CapResult};
use log::{debug, info};
use regex::Regex;
use std::env;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::time::Duration;

const PACMAN_BIN_ENV: &str = "ARCHUP_PACMAN_BIN";
const SYSTEMCTL_BIN_ENV: &str = "ARCHUP_SYSTEMCTL_BIN";
const USERMOD_BIN_ENV: &str = "ARCHUP_USERMOD_BIN";
const GETENT_BIN_ENV: &str = "ARCHUP_GETENT_BIN";
const CHSH_BIN_ENV: &str = "ARCHUP_CHSH_BIN";

const DEFAULT_PACMAN_CONF: &str = "/etc/pacman.conf";

fn bin_from_env(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

pub struct LinuxCaps {
    timeout: Duration,
    pacman_conf: PathBuf,
}

impl LinuxCaps {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            pacman_conf: PathBuf::from(DEFAULT_PACMAN_CONF),
        }
    }

    pub fn with_pacman_conf(mut self, path: PathBuf) -> Self {
        self.pacman_conf = path;
        self
    }

    fn query(&self, program: &str, args: &[&str]) -> CapResult<Output> {
        let mut cmd = Command::new(program);
        cmd.args(args);
        output_with_timeout(program, &mut cmd, self.timeout)
    }

    fn run_checked(&self, program: &str, args: &[&str]) -> CapResult<()> {
        let out = self.query(program, args)?;
        if !out.status.success() {
            return Err(CapError::CommandFailed {
                program: program.to_string(),
                code: out.status.code(),
                stderr: String::from_utf8_lossy(&out.stderr).trim().to_string(),
            });
        }
        Ok(())
    }
}

impl PackageOps for LinuxCaps {
    fn is_installed(&self, package: &str) -> CapResult<bool> {
        // `pacman -Qq <pkg>` exits non-zero when the package is absent.
        let out = self.query(&bin_from_env(PACMAN_BIN_ENV, "pacman"), &["-Qq", package])?;
        Ok(out.status.success())
    }

    fn ensure_installed(&self, packages: &[&str]) -> CapResult<()> {
        let mut missing = Vec::new();
        for pkg in packages {
            if !self.is_installed(pkg)? {
                missing.push(*pkg);
            }
        }
        if missing.is_empty() {
            debug!("all {} requested packages already installed", packages.len());
            return Ok(());
        }
        info!("installing {} packages: {}", missing.len(), missing.join(" "));
        let pacman = bin_from_env(PACMAN_BIN_ENV, "pacman");
        let mut args = vec!["-S", "--noconfirm", "--needed"];
        args.extend(missing.iter().copied());
        self.run_checked(&pacman, &args)
    }

    fn full_upgrade(&self) -> CapResult<()> {
        info!("running full system upgrade");
        self.run_checked(
            &bin_from_env(PACMAN_BIN_ENV, "pacman"),
            &["-Syu", "--noconfirm"],
        )
    }

    fn refresh_databases(&self) -> CapResult<()> {
        self.run_checked(&bin_from_env(PACMAN_BIN_ENV, "pacman"), &["-Sy"])
    }

    fn enable_repo(&self, name: &str) -> CapResult<()> {
        if enable_repo_section(&self.pacman_conf, name)? {
            info!("enabled [{name}] in {}", self.pacman_conf.display());
            self.refresh_databases()?;
        } else {
            debug!("[{name}] already enabled in {}", self.pacman_conf.display());
        }
        Ok(())
    }
}

impl ServiceOps for LinuxCaps {
    fn unit_exists(&self, unit: &str) -> CapResult<bool> {
        // `systemctl cat` exits non-zero when no unit file matches.
        let out = self.query(&bin_from_env(SYSTEMCTL_BIN_ENV, "systemctl"), &["cat", "--", unit])?;
        Ok(out.status.success())
    }

    fn is_enabled(&self, unit: &str) -> CapResult<bool> {
        let out = self.query(
            &bin_from_env(SYSTEMCTL_BIN_ENV, "systemctl"),
            &["is-enabled", "--quiet", "--", unit],
        )?;
        Ok(out.status.success())
    }

    fn ensure_enabled(&self, unit: &str) -> CapResult<()> {
        if !self.unit_exists(unit)? {
            return Err(CapError::ServiceNotFound(unit.to_string()));
        }
        if self.is_enabled(unit)? {
            debug!("unit {unit} already enabled");
            return Ok(());
        }
        info!("enabling unit {unit}");
        self.run_checked(
            &bin_from_env(SYSTEMCTL_BIN_ENV, "systemctl"),
            &["enable", "--now", "--", unit],
        )
    }
}

impl FileOps for LinuxCaps {
    fn ensure_line_in_file(&self, path: &Path, line: &str) -> CapResult<bool> {
        let contents = if path.exists() {
            fs::read_to_string(path)?
        } else {
            String::new()
        };
        if contents.lines().any(|l| l.trim() == line.trim()) {
            return Ok(false);
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new().append(true).create(true).open(path)?;
        if !contents.is_empty() && !contents.ends_with('\n') {
            writeln!(file)?;
        }
        writeln!(file, "{line}")?;
        Ok(true)
    }

    fn ensure_pattern_replaced(
        &self,
        path: &Path,
        pattern: &str,
        replacement: &str,
    ) -> CapResult<bool> {
        let contents = fs::read_to_string(path)?;
        let re = Regex::new(pattern).map_err(|err| CapError::Parse(err.to_string()))?;
        if !re.is_match(&contents) {
            return Ok(false);
        }
        let updated = re.replace_all(&contents, replacement).into_owned();
        if updated == contents {
            return Ok(false);
        }
        fs::write(path, updated)?;
        Ok(true)
    }
}

impl AccountOps for LinuxCaps {
    fn user_in_group(&self, user: &str, group: &str) -> CapResult<bool> {
        let out = self.query(&bin_from_env(GETENT_BIN_ENV, "getent"), &["group", group])?;
        if !out.status.success() {
            return Ok(false);
        }
        let stdout = String::from_utf8(out.stdout)?;
        // group:x:gid:member1,member2,...
        let members = stdout
            .lines()
            .next()
            .and_then(|line| line.rsplit(':').next())
            .unwrap_or("");
        Ok(members.split(',').any(|m| m.trim() == user))
    }

    fn add_user_to_group(&self, user: &str, group: &str) -> CapResult<()> {
        if self.user_in_group(user, group)? {
            debug!("{user} already in group {group}");
            return Ok(());
        }
        info!("adding {user} to group {group}");
        self.run_checked(&bin_from_env(USERMOD_BIN_ENV, "usermod"), &["-aG", group, user])
    }

    fn ensure_login_shell(&self, user: &str, shell: &str) -> CapResult<()> {
        let out = self.query(&bin_from_env(GETENT_BIN_ENV, "getent"), &["passwd", user])?;
        if !out.status.success() {
            return Err(CapError::Other(format!("user {user} not found")));
        }
        let stdout = String::from_utf8(out.stdout)?;
        let current = stdout
            .lines()
            .next()
            .and_then(|line| line.rsplit(':').next())
            .unwrap_or("")
            .trim();
        if current == shell {
            debug!("{user} login shell already {shell}");
            return Ok(());
        }
        info!("setting login shell of {user} to {shell}");
        self.run_checked(&bin_from_env(CHSH_BIN_ENV, "chsh"), &["-s", shell, user])
    }
}

impl ProcessOps for LinuxCaps {
    fn run_command(&self, program: &str, args: &[&str]) -> CapResult<()> {
        let mut cmd = Command::new(program);
        cmd.args(args);
        let status = status_with_timeout(program, &mut cmd, self.timeout)?;
        if !status.success() {
            return Err(CapError::CommandFailed {
                program: program.to_string(),
                code: status.code(),
                stderr: String::new(),
            });
        }
        Ok(())
    }
}

/// Uncomments a `#[name]` repository header and the commented `Include`
/// lines directly below it. Returns false when the section is already
/// active, errors when no such section exists at all.
fn enable_repo_section(conf: &Path, name: &str) -> CapResult<bool> {
    let contents = fs::read_to_string(conf)?;
    let header = format!("[{name}]");
    if contents.lines().any(|l| l.trim() == header) {
        return Ok(false);
    }

    let commented = format!("#[{name}]");
    let mut in_section = false;
    let mut changed = false;
    let mut lines = Vec::new();
    for line in contents.lines() {
        let trimmed = line.trim();
        if trimmed == commented {
            lines.push(header.clone());
            in_section = true;
            changed = true;
            continue;
        }
        if in_section {
            if let Some(rest) = trimmed.strip_prefix('#') {
                let rest = rest.trim_start();
                if rest.starts_with("Include") {
                    lines.push(rest.to_string());
                    continue;
                }
            }
            in_section = false;
        }
        lines.push(line.to_string());
    }
    if !changed {
        return Err(CapError::Parse(format!(
            "repository section [{name}] not found in {}",
            conf.display()
        )));
    }
    let mut payload = lines.join("\n");
    payload.push('\n');
    fs::write(conf, payload)?;
    Ok(true)
}
