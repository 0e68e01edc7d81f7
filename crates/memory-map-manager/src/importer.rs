//! Loading and merging of memory map description files.
//!
//! Each description file is a YAML mapping of sections. Files are merged
//! section by section and key by key; what happens when two files define the
//! same key is decided by a [`ConflictPolicy`] and, when prompting, a
//! [`ConflictPrompt`].

use std::fmt;
use std::io::{self, BufRead, Write};
use std::path::Path;

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::model::{sort_keys, Props};

/// Sections a description file may contain.
pub const SECTIONS: [&str; 7] = [
    "metadata",
    "defines",
    "enums",
    "bitfields",
    "typedefs",
    "generated_maps",
    "overrides",
];

/// A merged memory map description.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Description {
    sections: Props,
}

impl Description {
    /// Build a description from already merged sections.
    #[must_use]
    pub fn from_sections(sections: Props) -> Self {
        Self { sections }
    }

    /// Look up a section.
    #[must_use]
    pub fn section(&self, name: &str) -> Option<&Props> {
        self.sections.get(name).and_then(Value::as_object)
    }

    /// Check if no file contributed any section.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }

    /// Serialize the description as YAML with keys sorted.
    ///
    /// # Errors
    ///
    /// Returns an error if a value cannot be represented in YAML.
    pub fn to_yaml(&self) -> Result<String> {
        let sorted = sort_keys(Value::Object(self.sections.clone()));
        Ok(serde_yaml::to_string(&sorted)?)
    }
}

/// Source of answers when asking whether to overwrite a conflicting key.
pub trait ConflictPrompt: fmt::Debug {
    /// Show `question` and return the answer, without the line ending.
    ///
    /// # Errors
    ///
    /// Returns an error if the answer cannot be read.
    fn ask(&mut self, question: &str) -> io::Result<String>;
}

/// Prompt on the terminal.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdinPrompt;

impl ConflictPrompt for StdinPrompt {
    fn ask(&mut self, question: &str) -> io::Result<String> {
        let mut stdout = io::stdout().lock();
        write!(stdout, "{question}")?;
        stdout.flush()?;
        let mut answer = String::new();
        io::stdin().lock().read_line(&mut answer)?;
        Ok(answer.trim_end_matches(['\r', '\n']).to_string())
    }
}

/// How conflicting keys are handled.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ConflictPolicy {
    /// Ask for every conflict.
    pub prompt: bool,
    /// Let the later file win, or make overwriting the default answer.
    pub overwrite: bool,
}

/// Reads description files and merges them into one [`Description`].
#[derive(Debug)]
pub struct Importer<P = StdinPrompt> {
    policy: ConflictPolicy,
    prompt: P,
}

impl Importer<StdinPrompt> {
    /// Create an importer that prompts on the terminal.
    #[must_use]
    pub fn new(policy: ConflictPolicy) -> Self {
        Self::with_prompt(policy, StdinPrompt)
    }
}

impl<P: ConflictPrompt> Importer<P> {
    /// Create an importer with a custom prompt.
    #[must_use]
    pub fn with_prompt(policy: ConflictPolicy, prompt: P) -> Self {
        Self { policy, prompt }
    }

    /// Read and merge description files in order.
    ///
    /// # Errors
    ///
    /// Returns an error if a file cannot be read or parsed, has an unknown
    /// section, or conflicts with an earlier file under a failing policy.
    pub fn import_files<T: AsRef<Path>>(&mut self, files: &[T]) -> Result<Description> {
        let mut merged = Props::new();
        for file in files {
            let path = file.as_ref();
            info!(file = %path.display(), "Importing map description");
            let sections = load_file(path)?;
            self.merge(&mut merged, sections)?;
        }
        debug!(sections = merged.len(), "Merged map descriptions");
        Ok(Description::from_sections(merged))
    }

    fn merge(&mut self, merged: &mut Props, sections: Props) -> Result<()> {
        for (section, entries) in sections {
            let Value::Object(entries) = entries else {
                continue;
            };
            let known = merged
                .entry(section.clone())
                .or_insert_with(|| Value::Object(Props::new()));
            let Value::Object(known) = known else {
                return Err(Error::internal(format!("section {section} is not a mapping")));
            };
            for (key, new) in entries {
                let Some(existing) = known.get(&key) else {
                    known.insert(key, new);
                    continue;
                };
                let path = format!("{section}.{key}");
                if self.resolve_conflict(&path, existing, &new)? {
                    debug!(key = %path, "Overwriting conflicting key");
                    known.insert(key, new);
                }
            }
        }
        Ok(())
    }

    /// Decide whether `new` replaces `existing`.
    fn resolve_conflict(&mut self, key: &str, existing: &Value, new: &Value) -> Result<bool> {
        if !self.policy.prompt {
            if self.policy.overwrite {
                return Ok(true);
            }
            return Err(Error::Conflict {
                key: key.to_string(),
                existing: existing.to_string(),
                new: new.to_string(),
            });
        }

        let choices = if self.policy.overwrite { "Y/n" } else { "y/N" };
        let question =
            format!("Conflict detected for {key}: {existing}\nOverwrite with {new} [{choices}]? ");
        loop {
            let answer = self.prompt.ask(&question)?;
            match answer.trim().to_ascii_uppercase().as_str() {
                "" => return Ok(self.policy.overwrite),
                "Y" => return Ok(true),
                "N" => return Ok(false),
                other => warn!(answer = %other, "Invalid selection"),
            }
        }
    }
}

fn structure_error(path: &Path, message: impl Into<String>) -> Error {
    Error::InputStructure {
        path: path.to_path_buf(),
        message: message.into(),
    }
}

/// Read one description file and check its sections.
fn load_file(path: &Path) -> Result<Props> {
    let text = std::fs::read_to_string(path).map_err(|source| Error::InputRead {
        path: path.to_path_buf(),
        source,
    })?;
    if text.trim().is_empty() {
        return Ok(Props::new());
    }
    let value: Value = serde_yaml::from_str(&text).map_err(|source| Error::InputParse {
        path: path.to_path_buf(),
        source,
    })?;

    let mut sections = match value {
        Value::Object(map) => map,
        Value::Null => Props::new(),
        other => {
            return Err(structure_error(path, format!("expected a mapping, got {other}")));
        }
    };
    for (name, section) in &mut sections {
        if !SECTIONS.contains(&name.as_str()) {
            return Err(structure_error(path, format!("unknown section {name}")));
        }
        match section {
            Value::Object(_) => {}
            Value::Null => *section = Value::Object(Props::new()),
            _ => return Err(structure_error(path, format!("section {name} must be a mapping"))),
        }
    }
    Ok(sections)
}
