//! The generation pipeline: import, resolve, export and write.

use std::path::PathBuf;

use serde::Serialize;
use tracing::{info, warn};

use crate::config::GeneratorConfig;
use crate::error::Result;
use crate::export::Exporter;
use crate::importer::{ConflictPrompt, Description, Importer};
use crate::model::MemoryMapConfig;
use crate::output::{write_files, CFG_EXTENSIONS, CSV_EXTENSIONS, C_EXTENSIONS};
use crate::resolver::resolve;

/// Options of a generation run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GenerateOptions {
    /// Delete previously generated files first.
    pub clean: bool,
    /// Leave the generator version out of C banners.
    pub hide_version: bool,
}

/// Overview of one resolved map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MapSummary {
    /// Map name.
    pub name: String,
    /// Root typedef.
    #[serde(rename = "type")]
    pub ty: String,
    /// Size in bytes.
    pub size: usize,
    /// Number of records.
    pub records: usize,
}

/// Overview of a resolved description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Summary {
    /// Application name.
    pub app_name: String,
    /// Interface version.
    pub version: String,
    /// Maps in description order.
    pub maps: Vec<MapSummary>,
    /// Hash over every record.
    pub full_hash: String,
    /// Hash over the firmware layout.
    pub fw_hash: String,
    /// Hash over the layout and descriptions.
    pub sw_hash: String,
}

impl Summary {
    /// Summarize a resolved configuration.
    #[must_use]
    pub fn from_config(cfg: &MemoryMapConfig) -> Self {
        let meta = &cfg.metadata;
        Self {
            app_name: meta.app_name.clone(),
            version: meta.version.clone(),
            maps: cfg
                .maps
                .iter()
                .map(|m| MapSummary {
                    name: m.name.clone(),
                    ty: m.ty.clone(),
                    size: m.size,
                    records: m.records.len(),
                })
                .collect(),
            full_hash: meta.full_hash.clone(),
            fw_hash: meta.fw_hash.clone(),
            sw_hash: meta.sw_hash.clone(),
        }
    }
}

/// Result of a generation run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerateReport {
    /// What was generated from.
    pub summary: Summary,
    /// Every file written.
    pub written: Vec<PathBuf>,
    /// Whether any output directory was configured.
    pub has_outputs: bool,
}

/// Import and resolve the configured description files.
///
/// # Errors
///
/// Returns an error if a file cannot be imported or the merged description
/// does not resolve.
pub fn load<P: ConflictPrompt>(
    config: &GeneratorConfig,
    importer: &mut Importer<P>,
) -> Result<(Description, MemoryMapConfig)> {
    info!(files = config.files.len(), "Importing map descriptions");
    let description = importer.import_files(&config.files)?;
    let resolved = resolve(&description)?;
    Ok((description, resolved))
}

/// Run the whole pipeline and write into the configured directories.
///
/// Logs a warning and writes nothing when no output directory is set.
///
/// # Errors
///
/// Returns an error if loading, exporting or writing fails.
pub fn generate<P: ConflictPrompt>(
    config: &GeneratorConfig,
    importer: &mut Importer<P>,
    options: GenerateOptions,
) -> Result<GenerateReport> {
    let (description, resolved) = load(config, importer)?;
    let exporter = Exporter::new(&resolved, Some(&description), options.hide_version);

    let mut written = Vec::new();
    if let Some(dir) = &config.c_dir {
        written.extend(write_files(&exporter.gen_c_files()?, dir, options.clean, C_EXTENSIONS)?);
    }
    if let Some(dir) = &config.csv_dir {
        written.extend(write_files(
            &exporter.gen_csv_files()?,
            dir,
            options.clean,
            CSV_EXTENSIONS,
        )?);
    }
    if let Some(dir) = &config.cfg_dir {
        written.extend(write_files(
            &exporter.gen_cfg_files()?,
            dir,
            options.clean,
            CFG_EXTENSIONS,
        )?);
    }

    let has_outputs = config.has_outputs();
    if !has_outputs {
        warn!("No directories to output specified");
    }
    Ok(GenerateReport {
        summary: Summary::from_config(&resolved),
        written,
        has_outputs,
    })
}
