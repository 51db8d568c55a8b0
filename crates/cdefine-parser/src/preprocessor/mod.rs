//! C Preprocessor
//!
//! A line-oriented preprocessor that builds a project-wide macro table:
//! conditional compilation, recursive macro expansion and `#include`
//! resolution across a header set.

pub mod cache;
pub mod directive;
pub mod eval;
pub mod expand;
pub mod flags;
pub mod headers;
pub mod lines;
pub mod scanner;
pub mod table;

pub use cache::{fingerprint, CacheError, CacheStats, TableCache};
pub use directive::Directive;
pub use eval::{integer_literal, try_eval};
pub use expand::{ExpandError, Expander, UndefinedPolicy};
pub use flags::{FlagsError, MacroDefinition};
pub use headers::{read_header, BuildStats, HeaderError, HeaderGraph};
pub use lines::{
    classify_lines, read_lines, ConditionResolver, LineActivity, LineKind, LineOptions,
    LineProcessor, Lines, LogicalLine,
};
pub use scanner::{find_references, Reference};
pub use table::{DefinitionTable, ScopedDefines, TableError};
