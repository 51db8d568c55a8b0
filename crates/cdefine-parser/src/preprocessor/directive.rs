//! Directive recognition
//!
//! Classifies a logical source line. Lines that do not match any directive
//! pattern are plain text; a malformed directive is never an error.

use cdefine_core::{Definition, DEFAULT_TOKEN};
use once_cell::sync::Lazy;
use regex::Regex;

use super::scanner::strip_inline_comments;

static DEFINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        r"^#\s*define\s+(?P<name>[A-Za-z_]\w*)",
        r"(?P<paren>\((?P<params>[\w\s,]*)\))?\s*(?P<token>.*)$"
    ))
    .expect("valid define regex")
});
static UNDEF: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^#\s*undef\s+(?P<name>[A-Za-z_]\w*)").expect("valid undef regex"));
static INCLUDE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"^#\s*include\s*["<](?P<path>[^">]+)[">]"#).expect("valid include regex")
});
static IF: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^#\s*if(?P<def>n?def)?\b\s*(?P<cond>.+)$").expect("valid if regex")
});
static ELIF: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^#\s*elif\b\s*(?P<cond>.+)$").expect("valid elif regex"));
static ELSE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^#\s*else\b").expect("valid else regex"));
static ENDIF: Lazy<Regex> = Lazy::new(|| Regex::new(r"^#\s*endif\b").expect("valid endif regex"));

/// A recognized preprocessor directive
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive {
    /// `#define`, without provenance
    Define(Definition),
    Undef(String),
    /// `#include "path"` or `#include <path>`
    Include(String),
    If(String),
    Ifdef(String),
    Ifndef(String),
    Elif(String),
    Else,
    Endif,
}

impl Directive {
    /// Parse a logical line (leading whitespace allowed)
    pub fn parse(line: &str) -> Option<Directive> {
        let line = line.trim();
        if !line.starts_with('#') {
            return None;
        }

        if let Some(caps) = IF.captures(line) {
            let cond = caps["cond"].trim().to_string();
            return Some(match caps.name("def").map(|m| m.as_str()) {
                Some("def") => Directive::Ifdef(first_word(&cond)),
                Some(_) => Directive::Ifndef(first_word(&cond)),
                None => Directive::If(cond),
            });
        }
        if let Some(caps) = ELIF.captures(line) {
            return Some(Directive::Elif(caps["cond"].trim().to_string()));
        }
        if ELSE.is_match(line) {
            return Some(Directive::Else);
        }
        if ENDIF.is_match(line) {
            return Some(Directive::Endif);
        }
        if let Some(caps) = UNDEF.captures(line) {
            return Some(Directive::Undef(caps["name"].to_string()));
        }
        if let Some(caps) = INCLUDE.captures(line) {
            return Some(Directive::Include(caps["path"].trim().to_string()));
        }
        DEFINE.captures(line).map(|caps| {
            let params = caps.name("paren").map(|_| {
                let params = caps.name("params").map_or("", |m| m.as_str());
                if params.trim().is_empty() {
                    vec![]
                } else {
                    params.split(',').map(|p| p.trim().to_string()).collect()
                }
            });
            Directive::Define(Definition {
                name: caps["name"].to_string(),
                params,
                token: clean_token(caps.name("token").map_or("", |m| m.as_str())),
                location: None,
            })
        })
    }

    /// Whether this directive drives the conditional stack
    pub fn is_conditional(&self) -> bool {
        matches!(
            self,
            Directive::If(_)
                | Directive::Ifdef(_)
                | Directive::Ifndef(_)
                | Directive::Elif(_)
                | Directive::Else
                | Directive::Endif
        )
    }
}

/// Strip comments and blanks from a replacement text, defaulting to `1`
pub fn clean_token(token: &str) -> String {
    let token = strip_inline_comments(token);
    let token = token.trim();
    if token.is_empty() {
        DEFAULT_TOKEN.to_string()
    } else {
        token.to_string()
    }
}

fn first_word(cond: &str) -> String {
    cond.split(|c: char| c.is_whitespace() || c == '(' || c == ')')
        .find(|w| !w.is_empty())
        .unwrap_or_default()
        .to_string()
}
