//! `memory_map_manager` - Generate C memory maps from YAML descriptions
//!
//! This library merges memory map description files, resolves typedefs,
//! bitfields, enums and defines into flat byte-addressed maps, and renders
//! them as C headers and sources, CSV documentation and configuration
//! snapshots.

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

pub mod cli;
pub mod config;
pub mod error;
pub mod export;
pub mod expr;
pub mod importer;
pub mod logging;
pub mod model;
pub mod output;
pub mod pipeline;
pub mod primitive;
pub mod resolver;

pub use config::GeneratorConfig;
pub use error::{Error, Result};
pub use export::{Exporter, Files};
pub use importer::{ConflictPolicy, ConflictPrompt, Description, Importer, StdinPrompt};
pub use logging::init_logging;
pub use model::MemoryMapConfig;
pub use pipeline::{generate, load, GenerateOptions, GenerateReport, Summary};
pub use resolver::{resolve, Resolver};

/// Version of the generator, shown in generated C banners.
pub const MMM_VERSION: &str = env!("CARGO_PKG_VERSION");
