//! CLI subcommands

pub mod deploy;
pub mod eval;
pub mod model;
