//! Command-line interface for the memory map manager.
//!
//! This module provides the CLI structure for the `mmm-gen` binary.

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

pub use commands::{CheckCommand, GenerateCommand, LogLevel};

use crate::config::DEFAULT_CONFIG_FILE;
use crate::logging::Verbosity;

/// mmm-gen - Generate C, CSV and configuration files from memory map
/// descriptions
///
/// Reads the generator configuration, merges the listed map descriptions,
/// resolves them into flat memory maps and writes the outputs to the
/// configured directories.
#[derive(Debug, Parser)]
#[command(name = "mmm-gen")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to the generator configuration
    #[arg(short = 'p', long, global = true, value_name = "FILE", default_value = DEFAULT_CONFIG_FILE)]
    pub cfg_path: PathBuf,

    /// Clean the generated directories before generation. Be careful!
    #[arg(short = 'C', long, global = true)]
    pub clean: bool,

    /// Log level, overrides -v
    #[arg(long, value_enum, global = true)]
    pub loglevel: Option<LogLevel>,

    /// Increase verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// The command to execute, `generate` when omitted
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Available commands.
#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Import, resolve and write every output
    Generate(GenerateCommand),

    /// Resolve only and print an overview of the maps
    Check(CheckCommand),
}

impl Cli {
    /// Get the verbosity level based on flags.
    #[must_use]
    pub fn verbosity(&self) -> Verbosity {
        if self.quiet {
            Verbosity::Quiet
        } else if let Some(level) = self.loglevel {
            level.into()
        } else {
            match self.verbose {
                0 => Verbosity::Normal,
                1 => Verbosity::Verbose,
                _ => Verbosity::Trace,
            }
        }
    }

    /// The command to run.
    #[must_use]
    pub fn subcommand(&self) -> Command {
        self.command
            .clone()
            .unwrap_or_else(|| Command::Generate(GenerateCommand::default()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    fn cli(verbose: u8, quiet: bool, loglevel: Option<LogLevel>) -> Cli {
        Cli {
            cfg_path: PathBuf::from(DEFAULT_CONFIG_FILE),
            clean: false,
            loglevel,
            verbose,
            quiet,
            command: None,
        }
    }

    #[test]
    fn test_cli_debug() {
        let cli = Cli::command();
        assert_eq!(cli.get_name(), "mmm-gen");
    }

    #[test]
    fn test_cli_verify() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_verbosity_quiet() {
        assert_eq!(cli(0, true, None).verbosity(), Verbosity::Quiet);
        assert_eq!(cli(2, true, Some(LogLevel::Debug)).verbosity(), Verbosity::Quiet);
    }

    #[test]
    fn test_verbosity_counts() {
        assert_eq!(cli(0, false, None).verbosity(), Verbosity::Normal);
        assert_eq!(cli(1, false, None).verbosity(), Verbosity::Verbose);
        assert_eq!(cli(2, false, None).verbosity(), Verbosity::Trace);
    }

    #[test]
    fn test_verbosity_loglevel() {
        assert_eq!(cli(2, false, Some(LogLevel::Warning)).verbosity(), Verbosity::Warn);
        assert_eq!(cli(0, false, Some(LogLevel::Error)).verbosity(), Verbosity::Quiet);
        assert_eq!(cli(0, false, Some(LogLevel::Debug)).verbosity(), Verbosity::Verbose);
    }

    #[test]
    fn test_parse_defaults() {
        let cli = Cli::try_parse_from(["mmm-gen"]).unwrap();
        assert_eq!(cli.cfg_path, PathBuf::from("main.yaml"));
        assert!(!cli.clean);
        assert!(matches!(cli.subcommand(), Command::Generate(GenerateCommand { hide_version: false })));
    }

    #[test]
    fn test_parse_generate_flags() {
        let args = ["mmm-gen", "-p", "cfg/other.yaml", "-C", "--loglevel", "warning", "generate", "--hide-version"];
        let cli = Cli::try_parse_from(args).unwrap();
        assert_eq!(cli.cfg_path, PathBuf::from("cfg/other.yaml"));
        assert!(cli.clean);
        assert_eq!(cli.loglevel, Some(LogLevel::Warning));
        assert!(matches!(cli.subcommand(), Command::Generate(GenerateCommand { hide_version: true })));
    }

    #[test]
    fn test_parse_check() {
        let cli = Cli::try_parse_from(["mmm-gen", "check", "--json", "-v"]).unwrap();
        assert!(matches!(cli.subcommand(), Command::Check(CheckCommand { json: true })));
        assert_eq!(cli.verbose, 1);
    }

    #[test]
    fn test_parse_error_level_aliases() {
        for level in ["fatal", "critical"] {
            let cli = Cli::try_parse_from(["mmm-gen", "--loglevel", level]).unwrap();
            assert_eq!(cli.verbosity(), Verbosity::Quiet, "{level}");
        }
    }

    #[test]
    fn test_parse_rejects_unknown_loglevel() {
        assert!(Cli::try_parse_from(["mmm-gen", "--loglevel", "trace"]).is_err());
    }
}
