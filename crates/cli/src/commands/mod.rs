//! CLI subcommands

pub mod simulate;
pub mod status;
pub mod upstream;
