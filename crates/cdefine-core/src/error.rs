//! Error types for cdefine

use thiserror::Error;

/// cdefine error type
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Undefined macro: {0}")]
    UndefinedMacro(String),

    #[error("Cyclic macro expansion: {}", .0.join(" -> "))]
    CyclicExpansion(Vec<String>),

    #[error("Ambiguous include {include:?} in {from}: {candidates:?}")]
    AmbiguousInclude {
        include: String,
        from: String,
        candidates: Vec<String>,
    },

    #[error("Macro not found: {0}")]
    NotFound(String),
}

/// Result type alias for cdefine
pub type Result<T> = std::result::Result<T, Error>;
