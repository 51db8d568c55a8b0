//! Macro Expander
//!
//! Recursively replaces macro references in a token string. Function-like
//! calls have their arguments expanded first, then substituted into the
//! macro body by token, never by text search. Every name on the current
//! expansion path is blocked, so self-referential macros end in
//! [`ExpandError::CyclicExpansion`] instead of recursing forever.

use thiserror::Error;
use tracing::debug;

use super::eval::{self, integer_literal};
use super::lines::ConditionResolver;
use super::scanner::{
    join, references_in, skip_space, split_args, strip_inline_comments, tokenize, Reference, Token,
    TokenKind,
};
use super::table::DefinitionTable;

/// Passes over one text before giving up on reaching a fixed point
const MAX_RESCANS: usize = 64;

/// What to do with an identifier that names no macro
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UndefinedPolicy {
    /// Fail with [`ExpandError::UndefinedMacro`]
    Raise,
    /// Replace with `0`, as `#if` does
    Zero,
    /// Leave the identifier as written
    #[default]
    Keep,
}

/// Expansion errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ExpandError {
    #[error("token '{0}' is not defined")]
    UndefinedMacro(String),

    #[error("cyclic macro expansion: {}", .0.join(" -> "))]
    CyclicExpansion(Vec<String>),
}

impl From<ExpandError> for cdefine_core::Error {
    fn from(err: ExpandError) -> Self {
        match err {
            ExpandError::UndefinedMacro(name) => cdefine_core::Error::UndefinedMacro(name),
            ExpandError::CyclicExpansion(path) => cdefine_core::Error::CyclicExpansion(path),
        }
    }
}

/// Read-only expander over one table
pub struct Expander<'a> {
    table: &'a DefinitionTable,
    policy: UndefinedPolicy,
}

impl<'a> Expander<'a> {
    pub fn new(table: &'a DefinitionTable, policy: UndefinedPolicy) -> Self {
        Self { table, policy }
    }

    /// Fully expand `text`
    pub fn expand(&self, text: &str) -> Result<String, ExpandError> {
        let mut path = Vec::new();
        self.expand_in(text, &mut path)
    }

    /// Expand and evaluate `text`; any failure is `None`
    pub fn evaluate(&self, text: &str) -> Option<i128> {
        self.expand(text).ok().and_then(|expanded| eval::try_eval(&expanded))
    }

    fn expand_in(&self, text: &str, path: &mut Vec<String>) -> Result<String, ExpandError> {
        let mut current = strip_inline_comments(text).trim().to_string();
        if integer_literal(&current).is_some() {
            return Ok(current);
        }

        for _ in 0..MAX_RESCANS {
            let next = self.substitute(&current, path)?;
            let next = next.trim();
            if next == current {
                return Ok(current);
            }
            current = next.to_string();
        }

        let mut chain = path.clone();
        chain.push(current);
        Err(ExpandError::CyclicExpansion(chain))
    }

    /// One pass: replace every reference in `text` by its expansion
    fn substitute(&self, text: &str, path: &mut Vec<String>) -> Result<String, ExpandError> {
        let tokens = self.resolve_defined(tokenize(text));
        let mut out = String::with_capacity(text.len());
        let mut cursor = 0;

        for reference in references_in(&tokens, self.table) {
            out.push_str(&join(&tokens[cursor..reference.span.start]));
            out.push_str(&self.expand_reference(&reference, path)?);
            cursor = reference.span.end;
        }
        out.push_str(&join(&tokens[cursor..]));
        Ok(out)
    }

    fn expand_reference(
        &self,
        reference: &Reference,
        path: &mut Vec<String>,
    ) -> Result<String, ExpandError> {
        let name = reference.name.as_str();
        if eval::is_reserved(name) {
            return Ok(name.to_string());
        }
        if path.iter().any(|p| p == name) {
            let mut chain = path.clone();
            chain.push(name.to_string());
            return Err(ExpandError::CyclicExpansion(chain));
        }

        let def = match self.table.get(name) {
            Some(def) => def,
            None => {
                return match self.policy {
                    UndefinedPolicy::Raise => Err(ExpandError::UndefinedMacro(name.to_string())),
                    UndefinedPolicy::Zero => Ok("0".to_string()),
                    UndefinedPolicy::Keep => Ok(name.to_string()),
                };
            }
        };

        match (&def.params, &reference.args) {
            (Some(formals), Some(args)) => {
                let actuals = split_args(args)
                    .iter()
                    .map(|arg| self.expand_in(arg, path))
                    .collect::<Result<Vec<_>, _>>()?;
                let body = substitute_params(&def.token, formals, &actuals);

                path.push(name.to_string());
                let expanded = self.expand_in(&body, path);
                path.pop();
                let expanded = expanded?;

                Ok(match integer_literal(&expanded) {
                    Some(value) => value.to_string(),
                    None => expanded,
                })
            }
            // A function-like macro named without a call stays as written
            (Some(_), None) => Ok(name.to_string()),
            (None, _) => {
                path.push(name.to_string());
                let expanded = self.expand_in(&def.token, path);
                path.pop();
                expanded
            }
        }
    }

    /// Replace `defined X` and `defined(X)` with `1` or `0`
    fn resolve_defined(&self, mut tokens: Vec<Token>) -> Vec<Token> {
        let mut i = 0;
        while i < tokens.len() {
            if tokens[i].kind != TokenKind::Ident || tokens[i].text != "defined" {
                i += 1;
                continue;
            }

            let next = skip_space(&tokens, i + 1);
            let operand = match tokens.get(next) {
                Some(t) if t.kind == TokenKind::Ident => Some((t.text.clone(), next)),
                Some(t) if t.is_punct("(") => {
                    let name_at = skip_space(&tokens, next + 1);
                    let close_at = skip_space(&tokens, name_at + 1);
                    match (tokens.get(name_at), tokens.get(close_at)) {
                        (Some(n), Some(c)) if n.kind == TokenKind::Ident && c.is_punct(")") => {
                            Some((n.text.clone(), close_at))
                        }
                        _ => None,
                    }
                }
                _ => None,
            };

            if let Some((name, end)) = operand {
                let value = if self.table.contains(&name) { "1" } else { "0" };
                tokens.splice(i..=end, [Token::new(TokenKind::Number, value)]);
            }
            i += 1;
        }
        tokens
    }
}

/// Put `actuals` in place of `formals` inside `body`.
///
/// Matches whole identifier tokens only. `##` and the blanks around it are
/// dropped so the neighbours join. Formals without an actual stay as they
/// are.
pub fn substitute_params(body: &str, formals: &[String], actuals: &[String]) -> String {
    let mut out = String::with_capacity(body.len());
    let mut pasting = false;

    for token in tokenize(body) {
        if token.is_punct("##") {
            out.truncate(out.trim_end().len());
            pasting = true;
            continue;
        }
        if pasting && token.is_space() {
            continue;
        }
        pasting = false;

        let actual = match token.kind {
            TokenKind::Ident => formals
                .iter()
                .position(|f| *f == token.text)
                .and_then(|k| actuals.get(k)),
            _ => None,
        };
        out.push_str(actual.map_or(token.text.as_str(), String::as_str));
    }
    out
}

impl ConditionResolver for DefinitionTable {
    fn is_defined(&self, name: &str) -> bool {
        self.contains(name)
    }

    fn is_true(&self, expr: &str) -> bool {
        match Expander::new(self, UndefinedPolicy::Zero).expand(expr) {
            Ok(expanded) => eval::is_truthy(&expanded).unwrap_or_else(|| {
                debug!("Condition {:?} -> {:?} is not an integer", expr, expanded);
                false
            }),
            Err(err) => {
                debug!("Condition {:?} not expanded: {}", expr, err);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cdefine_core::Definition;
    use pretty_assertions::assert_eq;

    fn table() -> DefinitionTable {
        vec![
            Definition::object("A", "5"),
            Definition::function("ADD", ["a", "b"], "(a+b)"),
            Definition::function("MUL", ["x", "y"], "((x)*(y))"),
            Definition::object("ALIAS", "B"),
            Definition::object("B", "5"),
            Definition::object("TEN", "(10u)"),
            Definition::function("TWICE", ["v"], "ADD(v, v)"),
            Definition::function("CAT", ["p", "s"], "p ## _ ## s"),
            Definition::object("SELF", "SELF+1"),
            Definition::object("PING", "PONG"),
            Definition::object("PONG", "PING"),
            Definition::object("GET", "ADD"),
        ]
        .into()
    }

    fn expand(text: &str) -> Result<String, ExpandError> {
        let table = table();
        Expander::new(&table, UndefinedPolicy::Keep).expand(text)
    }

    #[test]
    fn test_object_like() {
        assert_eq!(expand("A").unwrap(), "5");
        assert_eq!(expand("A + A").unwrap(), "5 + 5");
        assert_eq!(expand("ALIAS").unwrap(), "5");
    }

    #[test]
    fn test_function_like() {
        assert_eq!(expand("ADD(2,3)").unwrap(), "(2+3)");
        assert_eq!(expand("ADD(ADD(1,2),4)").unwrap(), "((1+2)+4)");
        assert_eq!(expand("MUL(A, (1, 2))").unwrap(), "((5)*((1, 2)))");
        assert_eq!(expand("TWICE(A)").unwrap(), "(5+5)");
    }

    #[test]
    fn test_integer_results_collapse() {
        let table = vec![Definition::function("ID", ["x"], "(x)")].into();
        let expander = Expander::new(&table, UndefinedPolicy::Keep);
        assert_eq!(expander.expand("ID(0x10)").unwrap(), "16");
        assert_eq!(expand("TEN").unwrap(), "(10u)");
    }

    #[test]
    fn test_numeric_is_fixed_point() {
        assert_eq!(expand("42").unwrap(), "42");
        assert_eq!(expand("(2+3)").unwrap(), "(2+3)");
    }

    #[test]
    fn test_word_boundaries() {
        assert_eq!(substitute_params("a + ab + a_b", &["a".into()], &["X".into()]), "X + ab + a_b");
        assert_eq!(expand("CAT(dev, id)").unwrap(), "dev_id");
        assert_eq!(expand("AA + A").unwrap(), "AA + 5");
    }

    #[test]
    fn test_undefined_policies() {
        let table = table();
        assert_eq!(
            Expander::new(&table, UndefinedPolicy::Raise).expand("A + NOPE"),
            Err(ExpandError::UndefinedMacro("NOPE".into()))
        );
        let zero = Expander::new(&table, UndefinedPolicy::Zero);
        assert_eq!(zero.expand("NOPE + A").unwrap(), "0 + 5");
        assert_eq!(expand("NOPE + A").unwrap(), "NOPE + 5");
    }

    #[test]
    fn test_strings_untouched() {
        assert_eq!(expand("\"A\" A").unwrap(), "\"A\" 5");
    }

    #[test]
    fn test_function_like_without_call() {
        assert_eq!(expand("ADD").unwrap(), "ADD");
        // Rescanning joins the alias with the following arguments
        assert_eq!(expand("GET(1, 2)").unwrap(), "(1+2)");
    }

    #[test]
    fn test_cycles_are_reported() {
        assert_eq!(
            expand("SELF"),
            Err(ExpandError::CyclicExpansion(vec!["SELF".into(), "SELF".into()]))
        );
        assert_eq!(
            expand("PING"),
            Err(ExpandError::CyclicExpansion(vec!["PING".into(), "PONG".into(), "PING".into()]))
        );
    }

    #[test]
    fn test_defined_operator() {
        let table = table();
        let expander = Expander::new(&table, UndefinedPolicy::Zero);
        assert_eq!(expander.expand("defined(A) && !defined NOPE").unwrap(), "1 && !0");
        assert_eq!(expander.evaluate("defined ( ADD )"), Some(1));
    }

    #[test]
    fn test_reserved_words_survive() {
        let table = table();
        let expander = Expander::new(&table, UndefinedPolicy::Raise);
        assert_eq!(expander.expand("sizeof(U32) + (U8)A").unwrap(), "sizeof(U32) + (U8)5");
        assert_eq!(expander.evaluate("sizeof(U32) + (U8)A"), Some(9));
    }

    #[test]
    fn test_conditions() {
        let table = table();
        assert!(table.is_true("A == 5"));
        assert!(!table.is_true("NOPE"));
        assert!(!table.is_true("SELF"));
        assert!(table.is_true("defined(ADD) && ADD(1, 1) == 2"));
    }
}
