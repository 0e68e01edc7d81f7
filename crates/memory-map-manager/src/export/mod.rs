//! Rendering of a resolved memory map into output files.
//!
//! An [`Exporter`] turns a [`MemoryMapConfig`] into three groups of files:
//! C sources, CSV documentation and configuration snapshots. Each group is
//! returned as a [`Files`] map from file name to contents; writing them is
//! left to [`crate::output`].

mod c;
mod cfg;
mod csv;

pub use cfg::INPUT_CFG_FILE;

use std::collections::BTreeMap;

use crate::importer::Description;
use crate::model::MemoryMapConfig;

/// Generated files by name.
pub type Files = BTreeMap<String, String>;

/// Renders output files from a resolved configuration.
#[derive(Debug, Clone, Copy)]
pub struct Exporter<'a> {
    cfg: &'a MemoryMapConfig,
    input: Option<&'a Description>,
    hide_version: bool,
}

impl<'a> Exporter<'a> {
    /// Create an exporter.
    ///
    /// `input` is the merged description, snapshotted by
    /// [`gen_cfg_files`](Self::gen_cfg_files). With `hide_version` the C
    /// banners leave out the generator version so outputs stay stable across
    /// releases.
    #[must_use]
    pub fn new(cfg: &'a MemoryMapConfig, input: Option<&'a Description>, hide_version: bool) -> Self {
        Self {
            cfg,
            input,
            hide_version,
        }
    }
}
