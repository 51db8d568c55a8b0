//! Reference Scanner
//!
//! Splits token strings into a flat token list and locates macro references,
//! capturing the argument lists of function-like macro calls.

use std::ops::Range;

use super::eval;
use super::table::DefinitionTable;

/// Lexical category of a [`Token`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    /// Identifier or keyword
    Ident,
    /// Preprocessing number (`12`, `0x1Fu`, `1.5e3`)
    Number,
    /// String or character literal, quotes included
    Str,
    /// Operator or punctuator
    Punct,
    /// Run of whitespace
    Space,
}

/// A slice of source text with its category
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
}

impl Token {
    pub fn new(kind: TokenKind, text: impl Into<String>) -> Self {
        Self {
            kind,
            text: text.into(),
        }
    }

    pub fn is_punct(&self, p: &str) -> bool {
        self.kind == TokenKind::Punct && self.text == p
    }

    pub fn is_space(&self) -> bool {
        self.kind == TokenKind::Space
    }
}

/// A macro name occurrence inside a token list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    /// Identifier text
    pub name: String,
    /// Token indices covered, argument list included
    pub span: Range<usize>,
    /// Raw `( ... )` text for function-like macro calls
    pub args: Option<String>,
}

impl Reference {
    /// The reference as written, e.g. `ADD(1, 2)`
    pub fn line(&self) -> String {
        match &self.args {
            Some(args) => format!("{}{}", self.name, args),
            None => self.name.clone(),
        }
    }
}

const PUNCT2: [&str; 12] = [
    "##", "<<", ">>", "<=", ">=", "==", "!=", "&&", "||", "->", "++", "--",
];

/// Tokenize `text`; concatenating the token texts gives back `text`
pub fn tokenize(text: &str) -> Vec<Token> {
    let bytes = text.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        let start = i;
        let c = bytes[i];

        let kind = if c.is_ascii_whitespace() {
            while i < bytes.len() && bytes[i].is_ascii_whitespace() {
                i += 1;
            }
            TokenKind::Space
        } else if is_ident_start(c) {
            while i < bytes.len() && is_ident_continue(bytes[i]) {
                i += 1;
            }
            TokenKind::Ident
        } else if c.is_ascii_digit()
            || (c == b'.' && bytes.get(i + 1).map_or(false, |b| b.is_ascii_digit()))
        {
            i += 1;
            while i < bytes.len() {
                let b = bytes[i];
                if (b == b'+' || b == b'-') && matches!(bytes[i - 1], b'e' | b'E' | b'p' | b'P') {
                    i += 1;
                } else if is_ident_continue(b) || b == b'.' {
                    i += 1;
                } else {
                    break;
                }
            }
            TokenKind::Number
        } else if c == b'"' || c == b'\'' {
            i += 1;
            while i < bytes.len() && bytes[i] != c {
                if bytes[i] == b'\\' {
                    i += 1;
                }
                i += 1;
            }
            i = (i + 1).min(bytes.len());
            TokenKind::Str
        } else {
            let rest = &text[i..];
            match PUNCT2.iter().find(|p| rest.starts_with(**p)) {
                Some(p) => i += p.len(),
                // Step over a whole UTF-8 sequence
                None => i += rest.chars().next().map_or(1, char::len_utf8),
            }
            TokenKind::Punct
        };

        tokens.push(Token::new(kind, &text[start..i]));
    }

    tokens
}

/// Join tokens back into text
pub fn join(tokens: &[Token]) -> String {
    tokens.iter().map(|t| t.text.as_str()).collect()
}

pub fn is_ident_start(b: u8) -> bool {
    b.is_ascii_alphabetic() || b == b'_'
}

pub fn is_ident_continue(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

/// Whether `text` is exactly one C identifier
pub fn is_identifier(text: &str) -> bool {
    let bytes = text.as_bytes();
    !bytes.is_empty()
        && is_ident_start(bytes[0])
        && bytes[1..].iter().all(|&b| is_ident_continue(b))
}

/// Index of the first non-space token at or after `from`
pub fn skip_space(tokens: &[Token], from: usize) -> usize {
    let mut i = from;
    while i < tokens.len() && tokens[i].is_space() {
        i += 1;
    }
    i
}

/// Find the balanced argument list following the identifier at `ident`.
///
/// Returns the token range from `(` to the matching `)` inclusive, or
/// `None` when no `(` follows or the parentheses never balance.
pub fn call_span(tokens: &[Token], ident: usize) -> Option<Range<usize>> {
    let open = skip_space(tokens, ident + 1);
    if !tokens.get(open)?.is_punct("(") {
        return None;
    }

    let mut depth = 0usize;
    for (i, token) in tokens.iter().enumerate().skip(open) {
        if token.is_punct("(") {
            depth += 1;
        } else if token.is_punct(")") {
            depth -= 1;
            if depth == 0 {
                return Some(open..i + 1);
            }
        }
    }
    None
}

/// Locate every identifier occurrence in `text`.
///
/// Identifiers inside string literals are never reported. Function-like
/// macros known to `table` get their argument text captured; a missing or
/// unbalanced list leaves `args` empty so the occurrence reads as a bare
/// reference.
pub fn find_references(text: &str, table: &DefinitionTable) -> Vec<Reference> {
    if eval::try_eval(text).is_some() {
        return vec![];
    }
    references_in(&tokenize(text), table)
}

/// Token-list form of [`find_references`], without the numeric short-circuit
pub fn references_in(tokens: &[Token], table: &DefinitionTable) -> Vec<Reference> {
    let mut refs = Vec::new();
    let mut i = 0;

    while i < tokens.len() {
        let token = &tokens[i];
        if token.kind != TokenKind::Ident {
            i += 1;
            continue;
        }

        let function_like = table
            .get(&token.text)
            .map_or(false, |def| def.is_function_like());
        let call = if function_like { call_span(tokens, i) } else { None };

        match call {
            Some(args) => {
                refs.push(Reference {
                    name: token.text.clone(),
                    span: i..args.end,
                    args: Some(join(&tokens[args.clone()])),
                });
                i = args.end;
            }
            None => {
                refs.push(Reference {
                    name: token.text.clone(),
                    span: i..i + 1,
                    args: None,
                });
                i += 1;
            }
        }
    }

    refs
}

/// Split a raw `( a, (b, c), d )` argument list on top-level commas.
///
/// Arguments are trimmed; `()` has no arguments at all.
pub fn split_args(args: &str) -> Vec<String> {
    let inner = args.trim();
    let inner = inner.strip_prefix('(').unwrap_or(inner);
    let inner = inner.strip_suffix(')').unwrap_or(inner);
    if inner.trim().is_empty() {
        return vec![];
    }

    let mut result = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;

    for token in tokenize(inner) {
        if token.is_punct("(") {
            depth += 1;
        } else if token.is_punct(")") {
            depth = depth.saturating_sub(1);
        } else if token.is_punct(",") && depth == 0 {
            result.push(current.trim().to_string());
            current.clear();
            continue;
        }
        current.push_str(&token.text);
    }
    result.push(current.trim().to_string());
    result
}

/// Remove `/* ... */` comments that open and close inside `text`
pub fn strip_inline_comments(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find("/*") {
        match rest[start + 2..].find("*/") {
            Some(end) => {
                out.push_str(&rest[..start]);
                rest = &rest[start + 2 + end + 2..];
            }
            None => break,
        }
    }
    out.push_str(rest);
    out
}
