//! CLI commands

pub mod apply;
pub mod diff;
pub mod upgrade_state;
