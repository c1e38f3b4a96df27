//! Capability adapters: interfaces to the external mutation surfaces a
//! provisioning run touches (package manager, service manager, file
//! editor, accounts, raw commands).
//!
//! Every operation is idempotent and queries current state before
//! mutating, so a run can be repeated safely. Real and fake
//! implementations are provided; steps only ever see the traits.

pub mod fake;
pub mod linux;
pub mod process;

pub use fake::{FakeCaps, Operation};
pub use linux::LinuxCaps;

use archup_error::CapResult;
use std::path::Path;

/// Package-manager capability.
pub trait PackageOps {
    fn is_installed(&self, package: &str) -> CapResult<bool>;

    /// Installs whatever subset of `packages` is missing; a no-op when
    /// everything is already present.
    fn ensure_installed(&self, packages: &[&str]) -> CapResult<()>;

    fn full_upgrade(&self) -> CapResult<()>;

    fn refresh_databases(&self) -> CapResult<()>;

    /// Enables a disabled repository section in the package-manager
    /// configuration and refreshes the databases. A no-op when the
    /// section is already enabled.
    fn enable_repo(&self, name: &str) -> CapResult<()>;
}

/// Service-manager capability.
pub trait ServiceOps {
    fn unit_exists(&self, unit: &str) -> CapResult<bool>;

    fn is_enabled(&self, unit: &str) -> CapResult<bool>;

    /// Enables and starts a unit. Fails with `CapError::ServiceNotFound`
    /// when no unit file exists; a no-op when already enabled.
    fn ensure_enabled(&self, unit: &str) -> CapResult<()>;
}

/// Config-file editing capability.
pub trait FileOps {
    /// Appends `line` unless an identical line is already present.
    /// Creates the file (and parent directories) when missing. Returns
    /// whether the file changed.
    fn ensure_line_in_file(&self, path: &Path, line: &str) -> CapResult<bool>;

    /// Rewrites every match of `pattern` with `replacement`. A no-op
    /// when nothing matches (which is how a previous run's rewrite stays
    /// idempotent). Returns whether the file changed.
    fn ensure_pattern_replaced(
        &self,
        path: &Path,
        pattern: &str,
        replacement: &str,
    ) -> CapResult<bool>;
}

/// User/group capability.
pub trait AccountOps {
    fn user_in_group(&self, user: &str, group: &str) -> CapResult<bool>;

    fn add_user_to_group(&self, user: &str, group: &str) -> CapResult<()>;

    fn ensure_login_shell(&self, user: &str, shell: &str) -> CapResult<()>;
}

/// Raw command escape hatch for steps with no dedicated surface
/// (AUR helper build, mirror ranking).
pub trait ProcessOps {
    fn run_command(&self, program: &str, args: &[&str]) -> CapResult<()>;
}

/// Complete capability bundle handed to step actions.
pub trait Capabilities: PackageOps + ServiceOps + FileOps + AccountOps + ProcessOps {}

/// Automatically implement Capabilities for any type implementing all
/// required traits.
impl<T> Capabilities for T where T: PackageOps + ServiceOps + FileOps + AccountOps + ProcessOps {}
