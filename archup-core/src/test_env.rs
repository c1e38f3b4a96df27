//! Shared helpers for tests that mutate process-wide state.

use once_cell::sync::Lazy;
use std::ffi::{OsStr, OsString};
use std::fs;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

/// Global lock to serialize tests that mutate process-wide environment
/// variables (e.g. PATH or the adapter binary overrides).
static ENV_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

pub struct EnvLockGuard(#[allow(dead_code)] MutexGuard<'static, ()>);

pub fn lock() -> EnvLockGuard {
    let guard = match ENV_LOCK.lock() {
        Ok(g) => g,
        Err(poisoned) => poisoned.into_inner(),
    };
    EnvLockGuard(guard)
}

pub struct EnvVarGuard {
    key: String,
    original: Option<OsString>,
}

impl EnvVarGuard {
    pub fn new(key: impl Into<String>, value: impl AsRef<OsStr>) -> Self {
        let key = key.into();
        let original = std::env::var_os(&key);
        std::env::set_var(&key, value);
        Self { key, original }
    }
}

impl Drop for EnvVarGuard {
    fn drop(&mut self) {
        if let Some(ref original) = self.original {
            std::env::set_var(&self.key, original);
        } else {
            std::env::remove_var(&self.key);
        }
    }
}

pub struct PathGuard(Option<OsString>);

impl PathGuard {
    /// Prepends `extra` to PATH for the guard's lifetime.
    pub fn new(extra: &Path) -> Self {
        let original = std::env::var_os("PATH");
        let mut paths = vec![extra.to_path_buf()];
        if let Some(ref orig) = original {
            paths.extend(std::env::split_paths(orig));
        }
        let joined = std::env::join_paths(paths).unwrap();
        std::env::set_var("PATH", &joined);
        Self(original)
    }

    /// Replaces PATH entirely with `only`.
    pub fn replace(only: &Path) -> Self {
        let original = std::env::var_os("PATH");
        std::env::set_var("PATH", only.as_os_str());
        Self(original)
    }
}

impl Drop for PathGuard {
    fn drop(&mut self) {
        if let Some(ref original) = self.0 {
            std::env::set_var("PATH", original);
        } else {
            std::env::remove_var("PATH");
        }
    }
}

pub fn write_executable(path: &Path, content: &str) {
    fs::write(path, content).expect("write script");
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = fs::metadata(path).expect("metadata").permissions();
        perms.set_mode(0o755);
        fs::set_permissions(path, perms).expect("set perms");
    }
}
