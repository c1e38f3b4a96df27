//! archup core library.
//!
//! `archup-core` holds the provisioning-step engine for a one-shot Arch
//! Linux bootstrap: the step registry, the sequential execution engine,
//! idempotent capability adapters, and the run report, plus the builtin
//! step catalogue driven by higher-level binaries.

pub mod caps;
pub mod catalogue;
pub mod engine;
pub mod lock;
pub mod logging;
pub mod preflight;
pub mod registry;
pub mod report;
pub mod step;

#[cfg(test)]
pub mod test_env;
