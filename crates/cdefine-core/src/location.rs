//! Source code location types

use serde::{Deserialize, Serialize};

/// Physical lines a macro definition covers
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Location {
    pub file: String,
    /// First line (1-based)
    pub line: u32,
    /// Last line, past any `\` continuations
    pub end_line: u32,
}

impl Location {
    pub fn new(file: impl Into<String>, line: u32) -> Self {
        Self::spanning(file, line, line)
    }

    pub fn spanning(file: impl Into<String>, line: u32, end_line: u32) -> Self {
        Self {
            file: file.into(),
            line,
            end_line: end_line.max(line),
        }
    }

    pub fn is_multiline(&self) -> bool {
        self.end_line > self.line
    }
}

impl std::fmt::Display for Location {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_multiline() {
            write!(f, "{}:{}-{}", self.file, self.line, self.end_line)
        } else {
            write!(f, "{}:{}", self.file, self.line)
        }
    }
}
