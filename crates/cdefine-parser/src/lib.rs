//! cdefine Parser
//!
//! Builds a project-wide C macro table from a header set and answers
//! expansion, evaluation and conditional-activity queries against it.
//!
//! ## Modules
//!
//! - `preprocessor` - line preprocessing, macro table, expansion, header walk
//! - `database` - the query facade owning one table per project root
//! - `parallel` - concurrent builds of independent roots using rayon

pub mod database;
pub mod parallel;
pub mod preprocessor;

pub use database::DefineDatabase;
pub use preprocessor::{DefinitionTable, Expander, LineActivity, UndefinedPolicy};
