//! Read-only host checks run before any mutation.
//!
//! Nothing here touches the system: the checks verify that the host is
//! an Arch install with enough free disk, the tools the adapters shell
//! out to, and a reachable package mirror.

use anyhow::{anyhow, bail, Context, Result};
use libc::statvfs;
use log::info;
use std::env;
use std::ffi::CString;
use std::fs;
use std::net::{TcpStream, ToSocketAddrs};
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

const MIN_DISK_GB: u64 = 8;
const NETWORK_TIMEOUT_SECS: u64 = 3;

const OS_RELEASE_ENV: &str = "ARCHUP_OS_RELEASE_PATH";
const SKIP_NETWORK_ENV: &str = "ARCHUP_SKIP_NETWORK_CHECK";
const MIN_DISK_ENV: &str = "ARCHUP_MIN_DISK_GB";

// CI hosts come with arbitrary amounts of free space; the env override
// lets test harnesses pin the requirement.
fn min_disk_requirement() -> u64 {
    if let Ok(value) = env::var(MIN_DISK_ENV) {
        if let Ok(parsed) = value.parse::<u64>() {
            return parsed;
        }
    }
    MIN_DISK_GB
}

#[derive(Clone, Debug)]
pub struct PreflightConfig {
    pub min_disk_gb: u64,
    pub disk_space_path: PathBuf,
    pub network_endpoint: Option<(String, u16)>,
    pub required_binaries: Vec<String>,
}

impl Default for PreflightConfig {
    fn default() -> Self {
        Self {
            min_disk_gb: min_disk_requirement(),
            disk_space_path: PathBuf::from("/"),
            network_endpoint: Some(("archlinux.org".to_string(), 443)),
            required_binaries: vec![
                "pacman".to_string(),
                "systemctl".to_string(),
                "getent".to_string(),
                "usermod".to_string(),
            ],
        }
    }
}

pub fn run(cfg: &PreflightConfig) -> Result<()> {
    info!("preflight checks");

    check_os_release()?;
    check_disk_space(&cfg.disk_space_path, cfg.min_disk_gb)?;
    check_binaries(&cfg.required_binaries)?;
    if cfg.network_endpoint.is_some() {
        if env::var_os(SKIP_NETWORK_ENV).is_some() {
            info!("skipping network check ({SKIP_NETWORK_ENV})");
        } else {
            check_network(cfg)?;
        }
    }

    info!("preflight complete");
    Ok(())
}

fn check_os_release() -> Result<()> {
    // CI/test runs happen on all sorts of hosts; allow tests to point the
    // check at a fixture. In production this defaults to `/etc/os-release`.
    let path = env::var_os(OS_RELEASE_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("/etc/os-release"));
    let content = fs::read_to_string(&path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let id = parse_os_release_id(&content)
        .ok_or_else(|| anyhow!("missing ID= in {}", path.display()))?;
    if id != "arch" {
        bail!("archup requires Arch Linux, found '{id}'");
    }
    Ok(())
}

fn parse_os_release_id(content: &str) -> Option<String> {
    content
        .lines()
        .find_map(|line| line.strip_prefix("ID="))
        .map(|v| v.trim().trim_matches('"').to_string())
        .filter(|v| !v.is_empty())
}

fn check_disk_space(path: &Path, min_gb: u64) -> Result<()> {
    let available = available_bytes(path)?;
    let available_gb = available as f64 / (1024.0 * 1024.0 * 1024.0);
    if available_gb < min_gb as f64 {
        bail!(
            "Insufficient disk space at {}: {:.1} GiB available ({} GiB required)",
            path.display(),
            available_gb,
            min_gb
        );
    }
    Ok(())
}

fn check_binaries(bins: &[String]) -> Result<()> {
    let path = env::var_os("PATH").unwrap_or_default();
    let entries = env::split_paths(&path).collect::<Vec<_>>();
    for bin in bins {
        let Some(found) = find_in_paths(bin, &entries) else {
            bail!("Required binary '{}' not found in PATH", bin);
        };
        ensure_executable(&found).with_context(|| {
            format!(
                "Required binary '{}' was found at {} but is not executable",
                bin,
                found.display()
            )
        })?;
    }
    Ok(())
}

fn ensure_executable(path: &Path) -> Result<()> {
    let md = fs::metadata(path).with_context(|| format!("failed to stat {}", path.display()))?;
    if !md.is_file() {
        bail!("{} is not a regular file", path.display());
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if md.permissions().mode() & 0o111 == 0 {
            bail!("{} is not executable", path.display());
        }
    }
    Ok(())
}

fn find_in_paths(binary: &str, paths: &[PathBuf]) -> Option<PathBuf> {
    paths
        .iter()
        .map(|dir| dir.join(binary))
        .find(|candidate| candidate.exists())
}

fn check_network(cfg: &PreflightConfig) -> Result<()> {
    if let Some((host, port)) = &cfg.network_endpoint {
        let addr_str = format!("{host}:{port}");
        let addrs = addr_str
            .to_socket_addrs()
            .with_context(|| format!("failed to resolve {}", addr_str))?;
        let timeout = Duration::from_secs(NETWORK_TIMEOUT_SECS);
        for addr in addrs {
            if TcpStream::connect_timeout(&addr, timeout).is_ok() {
                return Ok(());
            }
        }
        bail!("Network check to {} timed out", addr_str);
    }
    Ok(())
}

#[allow(clippy::unnecessary_cast)]
fn available_bytes(path: &Path) -> Result<u64> {
    let c_path = CString::new(path.as_os_str().as_bytes())
        .map_err(|_| anyhow!("invalid path for disk space check"))?;
    let mut stat: statvfs = unsafe { std::mem::zeroed() };
    let result = unsafe { statvfs(c_path.as_ptr(), &mut stat) };
    if result != 0 {
        bail!("failed to stat filesystem {}", path.display());
    }
    Ok(stat.f_bavail as u64 * stat.f_frsize as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_env::{self, EnvVarGuard, PathGuard};
    use tempfile::tempdir;

    #[test]
    fn parse_os_release_id_handles_quotes() {
        assert_eq!(
            parse_os_release_id("NAME=\"Arch Linux\"\nID=arch\n"),
            Some("arch".to_string())
        );
        assert_eq!(
            parse_os_release_id("ID=\"fedora\"\nVERSION_ID=43\n"),
            Some("fedora".to_string())
        );
        assert_eq!(parse_os_release_id("NAME=x\n"), None);
    }

    #[test]
    fn os_release_check_rejects_other_distros() {
        let _lock = test_env::lock();
        let tmp = tempdir().unwrap();
        let fixture = tmp.path().join("os-release");
        fs::write(&fixture, "NAME=\"Fedora Linux\"\nID=fedora\n").unwrap();
        let _guard = EnvVarGuard::new(OS_RELEASE_ENV, fixture.as_os_str());

        let err = check_os_release().unwrap_err();
        assert!(err.to_string().contains("requires Arch Linux"));
    }

    #[test]
    fn os_release_check_accepts_arch() {
        let _lock = test_env::lock();
        let tmp = tempdir().unwrap();
        let fixture = tmp.path().join("os-release");
        fs::write(&fixture, "NAME=\"Arch Linux\"\nID=arch\nBUILD_ID=rolling\n").unwrap();
        let _guard = EnvVarGuard::new(OS_RELEASE_ENV, fixture.as_os_str());

        check_os_release().unwrap();
    }

    #[test]
    fn check_binaries_fails_when_missing() {
        let _lock = test_env::lock();
        let tmp = tempdir().unwrap();
        let _guard = PathGuard::replace(tmp.path());
        let err = check_binaries(&["pacman".to_string()]).unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn check_binaries_requires_executable_bit() {
        let _lock = test_env::lock();
        let tmp = tempdir().unwrap();
        let bin_dir = tmp.path().join("bin");
        fs::create_dir_all(&bin_dir).unwrap();
        fs::write(bin_dir.join("pacman"), "").unwrap();

        let _guard = PathGuard::replace(&bin_dir);
        let err = check_binaries(&["pacman".to_string()]).unwrap_err();
        assert!(err.to_string().contains("not executable"));
    }

    #[test]
    fn check_binaries_accepts_executable_stub() {
        let _lock = test_env::lock();
        let tmp = tempdir().unwrap();
        let bin_dir = tmp.path().join("bin");
        fs::create_dir_all(&bin_dir).unwrap();
        test_env::write_executable(&bin_dir.join("pacman"), "#!/bin/sh\n");

        let _guard = PathGuard::replace(&bin_dir);
        check_binaries(&["pacman".to_string()]).unwrap();
    }

    #[test]
    fn available_bytes_positive() {
        let dir = tempdir().unwrap();
        assert!(available_bytes(dir.path()).unwrap() > 0);
    }
}
