//! Subcommand implementations

pub mod offline;
pub mod online;
