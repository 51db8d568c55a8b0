//! Compile Flags
//!
//! Extracts predefined macros from compiler flag files (`-DNAME`,
//! `-DNAME=VALUE`) kept in the project's predefine directory.

use std::fs;
use std::path::Path;

use cdefine_core::{Definition, DEFAULT_TOKEN};
use thiserror::Error;
use tracing::{debug, warn};

use super::scanner::is_identifier;

/// Errors that can occur while reading flags
#[derive(Debug, Error)]
pub enum FlagsError {
    #[error("Failed to read flags file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Invalid define: {0}")]
    InvalidDefine(String),
}

impl From<FlagsError> for cdefine_core::Error {
    fn from(err: FlagsError) -> Self {
        match err {
            FlagsError::IoError(e) => cdefine_core::Error::Io(e),
            FlagsError::InvalidDefine(s) => {
                cdefine_core::Error::Config(format!("invalid define: {}", s))
            }
        }
    }
}

/// A predefined macro
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MacroDefinition {
    pub name: String,
    pub value: String,
}

impl MacroDefinition {
    /// A macro that is simply defined
    pub fn defined(name: &str) -> Self {
        Self::with_value(name, DEFAULT_TOKEN)
    }

    pub fn with_value(name: &str, value: &str) -> Self {
        Self {
            name: name.to_string(),
            value: value.to_string(),
        }
    }

    /// Parse `NAME` or `NAME=VALUE`
    pub fn parse(spec: &str) -> Result<Self, FlagsError> {
        let (name, value) = match spec.split_once('=') {
            Some((name, value)) => (name.trim(), value.trim()),
            None => (spec.trim(), DEFAULT_TOKEN),
        };
        if !is_identifier(name) {
            return Err(FlagsError::InvalidDefine(spec.to_string()));
        }
        Ok(Self::with_value(name, if value.is_empty() { DEFAULT_TOKEN } else { value }))
    }

    /// Render as a compiler argument
    pub fn to_flag(&self) -> String {
        format!("-D{}={}", self.name, self.value)
    }
}

impl From<MacroDefinition> for Definition {
    fn from(def: MacroDefinition) -> Self {
        Definition::object(def.name, def.value)
    }
}

/// Collect the `-D` flags of a flag string.
///
/// Both `-DNAME` and `-D NAME` are accepted. Other flags are ignored and
/// malformed defines are skipped with a warning.
pub fn parse_flags(content: &str) -> Vec<MacroDefinition> {
    let mut defines = Vec::new();
    let mut words = content.split_whitespace();

    while let Some(word) = words.next() {
        let spec = match word.strip_prefix("-D") {
            Some("") => match words.next() {
                Some(next) => next,
                None => break,
            },
            Some(spec) => spec,
            None => continue,
        };

        match MacroDefinition::parse(spec) {
            Ok(def) => defines.push(def),
            Err(err) => warn!("Skipping flag {:?}: {}", word, err),
        }
    }

    defines
}

/// Read the `-D` flags of a flags file
pub fn from_file(path: &Path) -> Result<Vec<MacroDefinition>, FlagsError> {
    let content = fs::read_to_string(path)?;
    let defines = parse_flags(&content);
    debug!("Read {} defines from {:?}", defines.len(), path);
    Ok(defines)
}

/// File names inside the predefine directory, sorted.
///
/// A missing directory has no flag files.
pub fn list_flag_files(dir: &Path) -> Result<Vec<String>, FlagsError> {
    if !dir.is_dir() {
        return Ok(vec![]);
    }

    let mut names = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    names.sort();
    Ok(names)
}
