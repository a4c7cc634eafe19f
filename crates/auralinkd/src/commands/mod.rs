//! Subcommand implementations.

pub mod devices;
pub mod dump;
pub mod run;
