//! Subcommand implementations

pub mod exec;
pub mod shell;
pub mod status;
