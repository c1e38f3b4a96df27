//! archup installer binary crate.
//!
//! The binary wires the core engine to the terminal: flag parsing,
//! colored status output, exit-code mapping, and signal handling.

pub mod cli;
pub mod output;
