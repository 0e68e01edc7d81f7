//! `mmm-gen` - CLI for the memory map manager
//!
//! This binary loads the generator configuration, then either generates every
//! output or checks that the descriptions resolve.

#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

use clap::Parser;
use tracing::info;

use memory_map_manager::cli::{CheckCommand, Cli, Command, GenerateCommand};
use memory_map_manager::{
    generate, init_logging, load, GenerateOptions, GeneratorConfig, Importer, Summary,
};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    init_logging(cli.verbosity());
    info!("Starting memory_map_manager");
    info!("Using {} for importer", cli.cfg_path.display());

    let config = GeneratorConfig::load_from(&cli.cfg_path)?;

    match cli.subcommand() {
        Command::Generate(cmd) => handle_generate(&config, cli.clean, &cmd),
        Command::Check(cmd) => handle_check(&config, &cmd),
    }
}

fn handle_generate(
    config: &GeneratorConfig,
    clean: bool,
    cmd: &GenerateCommand,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut importer = Importer::new(config.conflict_policy());
    let options = GenerateOptions {
        clean,
        hide_version: cmd.hide_version,
    };
    let report = generate(config, &mut importer, options)?;
    if report.has_outputs {
        println!("SUCCESS");
    }
    Ok(())
}

fn handle_check(
    config: &GeneratorConfig,
    cmd: &CheckCommand,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut importer = Importer::new(config.conflict_policy());
    let (_, resolved) = load(config, &mut importer)?;
    let summary = Summary::from_config(&resolved);

    if cmd.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!("{} {}", summary.app_name, summary.version);
        println!("----------------");
        for map in &summary.maps {
            println!(
                "Map {:<16} type {:<16} {:>6} bytes {:>6} records",
                map.name, map.ty, map.size, map.records
            );
        }
        println!();
        println!("Hash:    {}", summary.full_hash);
        println!("FW hash: {}", summary.fw_hash);
        println!("SW hash: {}", summary.sw_hash);
    }
    Ok(())
}
