//! Core type definitions

use crate::location::Location;
use serde::{Deserialize, Serialize};

/// Replacement text used when a `#define` has no body
pub const DEFAULT_TOKEN: &str = "1";

/// A single macro definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Definition {
    /// Macro name
    pub name: String,
    /// Formal parameters.
    ///
    /// `None` is an object-like macro (`#define A 5`), `Some(vec![])` a
    /// function-like macro with an empty list (`#define B() 5`).
    pub params: Option<Vec<String>>,
    /// Replacement text, comments stripped
    pub token: String,
    /// Where the macro was defined; `None` for predefines
    pub location: Option<Location>,
}

impl Definition {
    /// Create an object-like macro
    pub fn object(name: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: None,
            token: token.into(),
            location: None,
        }
    }

    /// Create a function-like macro
    pub fn function<I, S>(name: impl Into<String>, params: I, token: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            params: Some(params.into_iter().map(Into::into).collect()),
            token: token.into(),
            location: None,
        }
    }

    /// Attach provenance
    pub fn at(mut self, location: Location) -> Self {
        self.location = Some(location);
        self
    }

    /// Whether the macro must be invoked with an argument list
    pub fn is_function_like(&self) -> bool {
        self.params.is_some()
    }

    /// Render the macro head, e.g. `MAX(a, b)` or `VERSION`
    pub fn signature(&self) -> String {
        match &self.params {
            Some(params) => format!("{}({})", self.name, params.join(", ")),
            None => self.name.clone(),
        }
    }
}
