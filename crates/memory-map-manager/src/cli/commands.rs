//! CLI command definitions.
//!
//! This module defines the structure of all CLI subcommands.

use clap::{Args, ValueEnum};

use crate::logging::Verbosity;

/// Generate command arguments.
#[derive(Debug, Clone, Default, Args)]
pub struct GenerateCommand {
    /// Leave the generator version out of generated C banners
    #[arg(long)]
    pub hide_version: bool,
}

/// Check command arguments.
#[derive(Debug, Clone, Default, Args)]
pub struct CheckCommand {
    /// Output as JSON
    #[arg(short, long)]
    pub json: bool,
}

/// Log levels accepted by `--loglevel`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    /// Debug and above
    Debug,
    /// Info and above
    Info,
    /// Warnings and errors
    Warning,
    /// Errors only
    Error,
    /// Errors only, same as `error`
    Fatal,
    /// Errors only, same as `error`
    Critical,
}

impl From<LogLevel> for Verbosity {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Debug => Self::Verbose,
            LogLevel::Info => Self::Normal,
            LogLevel::Warning => Self::Warn,
            LogLevel::Error | LogLevel::Fatal | LogLevel::Critical => Self::Quiet,
        }
    }
}
