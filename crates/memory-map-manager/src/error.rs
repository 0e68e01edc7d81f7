//! Error types for the memory map manager.
//!
//! This module defines all error types used throughout the crate, from loading
//! the generator configuration through resolving the memory map description
//! to writing the generated files.

use std::path::PathBuf;
use thiserror::Error;

use crate::expr::ExprError;

/// The main error type for memory map manager operations.
#[derive(Error, Debug)]
pub enum Error {
    // === Configuration Errors ===
    /// Failed to load the generator configuration.
    #[error("failed to load configuration: {0}")]
    ConfigLoad(Box<figment::Error>),

    /// The generator configuration file does not exist.
    #[error("configuration file not found: {path}")]
    ConfigNotFound {
        /// Path that was looked up.
        path: PathBuf,
    },

    /// Configuration validation failed.
    #[error("invalid configuration: {message}")]
    ConfigValidation {
        /// Description of the validation failure.
        message: String,
    },

    // === Input Errors ===
    /// A map description file could not be read.
    #[error("failed to read {path}: {source}")]
    InputRead {
        /// Path of the description file.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    /// A map description file is not valid YAML.
    #[error("failed to parse {path}: {source}")]
    InputParse {
        /// Path of the description file.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: serde_yaml::Error,
    },

    /// A map description file has an unexpected structure.
    #[error("invalid description in {path}: {message}")]
    InputStructure {
        /// Path of the description file.
        path: PathBuf,
        /// Description of the problem.
        message: String,
    },

    /// Two description files define the same key.
    #[error("conflicting configuration {key}: {existing} with new value {new}!")]
    Conflict {
        /// The conflicting key.
        key: String,
        /// The value that was already known.
        existing: String,
        /// The value that would replace it.
        new: String,
    },

    /// An entry of a section does not have the expected shape.
    #[error("invalid {section} entry '{name}': {source}")]
    InvalidEntry {
        /// Section the entry belongs to.
        section: &'static str,
        /// Name of the entry.
        name: String,
        /// The underlying error.
        #[source]
        source: serde_json::Error,
    },

    /// A required section is missing from the description.
    #[error("missing required section: {0}")]
    MissingSection(&'static str),

    // === Resolution Errors ===
    /// An expression could not be evaluated.
    #[error("cannot evaluate {context}: {source}")]
    Eval {
        /// What was being evaluated.
        context: String,
        /// The underlying error.
        #[source]
        source: ExprError,
    },

    /// Entries could not be resolved because of missing or circular dependencies.
    #[error("cannot resolve {kind} {names:?} due to missing definition/circular dependency{detail}")]
    Unresolved {
        /// Kind of entry (defines, typedefs, references).
        kind: &'static str,
        /// Names of the unresolved entries.
        names: Vec<String>,
        /// Additional detail, already formatted.
        detail: String,
    },

    /// An element name appears twice in the same owner.
    #[error("duplicate record {name} in {owner}")]
    Duplicate {
        /// The duplicated name.
        name: String,
        /// The enum, bitfield or typedef containing it.
        owner: String,
    },

    /// The same name is used by two kinds of types.
    #[error("conflicting names ({names:?}) between {first} and {second}")]
    NameConflict {
        /// The clashing names.
        names: Vec<String>,
        /// First kind of type.
        first: &'static str,
        /// Second kind of type.
        second: &'static str,
    },

    /// A type name is not a primitive, enum, bitfield or typedef.
    #[error("{ty} type for {context} does not exist")]
    UnknownType {
        /// The unknown type name.
        ty: String,
        /// Where it was referenced.
        context: String,
    },

    /// A value is outside what its definition allows.
    #[error("invalid {kind} '{name}': {message}")]
    InvalidDefinition {
        /// Kind of definition (enum, bitfield, typedef, metadata).
        kind: &'static str,
        /// Name of the definition.
        name: String,
        /// Description of the problem.
        message: String,
    },

    /// A permission refers to an unknown user or is out of range.
    #[error("invalid {permission} in {record}: {message}")]
    InvalidPermission {
        /// `read_permission` or `write_permission`.
        permission: &'static str,
        /// The record name.
        record: String,
        /// Description of the problem.
        message: String,
    },

    /// A map name is not defined.
    #[error("map {0} not defined in maps")]
    UnknownMap(String),

    /// An override could not be applied.
    #[error("override {selector}: {message}")]
    Override {
        /// The override key.
        selector: String,
        /// Description of the problem.
        message: String,
    },

    /// An override regex is invalid.
    #[error("invalid override pattern: {0}")]
    Regex(#[from] regex::Error),

    // === I/O Errors ===
    /// File system operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to create an output directory.
    #[error("failed to create directory {path}: {source}")]
    DirectoryCreate {
        /// Path that couldn't be created.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    /// Failed to write a generated file.
    #[error("failed to write {path}: {source}")]
    FileWrite {
        /// Path of the file.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    // === Serialization Errors ===
    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML serialization failed.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Formatting generated text failed.
    #[error("formatting error: {0}")]
    Format(#[from] std::fmt::Error),

    // === Generic Errors ===
    /// An internal error occurred (bug).
    #[error("internal error: {0}")]
    Internal(String),
}

/// A specialized Result type for memory map manager operations.
pub type Result<T> = std::result::Result<T, Error>;

impl From<figment::Error> for Error {
    fn from(err: figment::Error) -> Self {
        Self::ConfigLoad(Box::new(err))
    }
}

impl Error {
    /// Create an evaluation error with context.
    #[must_use]
    pub fn eval(context: impl Into<String>, source: ExprError) -> Self {
        Self::Eval {
            context: context.into(),
            source,
        }
    }

    /// Create an invalid definition error.
    #[must_use]
    pub fn invalid(kind: &'static str, name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidDefinition {
            kind,
            name: name.into(),
            message: message.into(),
        }
    }

    /// Create a duplicate element error.
    #[must_use]
    pub fn duplicate(name: impl Into<String>, owner: impl Into<String>) -> Self {
        Self::Duplicate {
            name: name.into(),
            owner: owner.into(),
        }
    }

    /// Create an override error.
    #[must_use]
    pub fn override_error(selector: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Override {
            selector: selector.into(),
            message: message.into(),
        }
    }

    /// Create a new internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Check if this error is a conflict between description files.
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    /// Check if this error comes from a missing or circular dependency.
    #[must_use]
    pub fn is_unresolved(&self) -> bool {
        matches!(self, Self::Unresolved { .. })
    }

    /// Check if this error is a value or range problem in a definition.
    #[must_use]
    pub fn is_invalid_definition(&self) -> bool {
        matches!(
            self,
            Self::InvalidDefinition { .. } | Self::InvalidPermission { .. }
        )
    }
}
