use std::io;
use std::path::PathBuf;
use thiserror::Error;

pub type CapResult<T> = Result<T, CapError>;
pub type RegistryResult<T> = Result<T, RegistryError>;
pub type RunResult<T> = Result<T, RunError>;

/// Failures raised by capability adapters (package manager, service
/// manager, file editor, accounts). The engine converts these into
/// per-step `Failed` outcomes; they never abort the process on their own.
#[derive(Error, Debug)]
pub enum CapError {
    #[error("Command failed: {program} (exit={code:?}): {stderr}")]
    CommandFailed {
        program: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("Command timed out: {program} after {timeout_secs}s")]
    CommandTimeout { program: String, timeout_secs: u64 },

    #[error("Service unit not found: {0}")]
    ServiceNotFound(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("UTF-8 decode error: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("{0}")]
    Other(String),
}

/// Registry construction errors. All of these are fatal before any
/// system mutation occurs.
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Duplicate step name: {0}")]
    DuplicateName(String),

    #[error("Step '{step}' depends on unknown step '{dependency}'")]
    UnknownDependency { step: String, dependency: String },

    #[error("Dependency cycle involving steps: {}", .0.join(", "))]
    CyclicDependency(Vec<String>),
}

/// Run-setup failures, surfaced before the first step executes.
#[derive(Error, Debug)]
pub enum RunError {
    #[error("Another archup run holds the lock at {}", .0.display())]
    AlreadyRunning(PathBuf),

    #[error("Unknown step requested: {0}")]
    UnknownStep(String),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}
