//! Command-line interface module.
//!
//! Command definitions (clap) and output formatting.

mod commands;
mod output;

pub use commands::{Cli, Commands, OutputFormat, StateCommands};
pub use output::OutputFormatter;
