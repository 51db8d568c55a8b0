//! Line Preprocessor
//!
//! Turns raw physical lines into logical lines: comments removed,
//! backslash continuations joined and, optionally, lines inside false
//! conditional regions suppressed.

use std::collections::BTreeSet;

use serde::Serialize;

use super::directive::Directive;

/// Answers the questions a conditional directive asks
pub trait ConditionResolver {
    /// `#ifdef` / `#ifndef`
    fn is_defined(&self, name: &str) -> bool;

    /// `#if` / `#elif`; anything that cannot be evaluated is false
    fn is_true(&self, expr: &str) -> bool;
}

/// Line processing switches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LineOptions {
    /// Track `#if` regions and drop lines inside false branches
    pub evaluate_conditionals: bool,
    /// Treat the first `#ifndef` of the input as true
    pub ignore_header_guard: bool,
    /// Keep leading indentation on emitted lines
    pub keep_whitespace: bool,
    /// Also emit lines that lie entirely inside a block comment
    pub include_block_comments: bool,
}

impl Default for LineOptions {
    fn default() -> Self {
        Self {
            evaluate_conditionals: true,
            ignore_header_guard: false,
            keep_whitespace: false,
            include_block_comments: false,
        }
    }
}

impl LineOptions {
    /// Options for reading a header of the given path
    pub fn header_guarded(mut self, guarded: bool) -> Self {
        self.ignore_header_guard = guarded;
        self
    }
}

/// What a logical line holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LineKind {
    Text,
    /// A conditional directive; emitted even inside inactive regions
    Directive,
    /// Only emitted with `include_block_comments`
    Comment,
}

/// One logical line
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogicalLine {
    pub text: String,
    /// Last physical line (1-based)
    pub line_no: usize,
    /// First physical line (1-based)
    pub start_line: usize,
    pub kind: LineKind,
    /// Whether the enclosing conditional region is active
    pub active: bool,
}

impl LogicalLine {
    /// Physical lines covered
    pub fn lines(&self) -> std::ops::RangeInclusive<usize> {
        self.start_line..=self.line_no
    }
}

#[derive(Debug, Clone, Copy)]
struct Level {
    /// Current branch taken
    active: bool,
    /// Some branch of this level was taken under an active parent
    done: bool,
}

/// Nesting state of `#if` regions
#[derive(Debug, Clone, Default)]
pub struct ConditionalStack {
    levels: Vec<Level>,
}

impl ConditionalStack {
    /// Every enclosing level is on its taken branch
    pub fn is_active(&self) -> bool {
        self.levels.iter().all(|l| l.active)
    }

    fn parent_active(&self) -> bool {
        match self.levels.split_last() {
            Some((_, parents)) => parents.iter().all(|l| l.active),
            None => true,
        }
    }

    /// `#if`, `#ifdef`, `#ifndef`
    pub fn push(&mut self, value: bool) {
        let parent = self.is_active();
        self.levels.push(Level {
            active: value,
            done: parent && value,
        });
    }

    /// `#elif`; `value` is only consulted when no branch was taken yet
    pub fn elif(&mut self, value: impl FnOnce() -> bool) {
        let parent = self.parent_active();
        if let Some(top) = self.levels.last_mut() {
            if top.done {
                top.active = false;
            } else {
                top.active = parent && value();
                top.done = top.active;
            }
        }
    }

    /// `#else`
    pub fn flip(&mut self) {
        let parent = self.parent_active();
        if let Some(top) = self.levels.last_mut() {
            if top.done {
                top.active = false;
            } else {
                top.active = !top.active;
                top.done = parent && top.active;
            }
        }
    }

    /// `#endif`; unmatched ones are ignored
    pub fn pop(&mut self) {
        self.levels.pop();
    }
}

/// Stateful physical-to-logical line converter
#[derive(Debug, Clone)]
pub struct LineProcessor {
    options: LineOptions,
    stack: ConditionalStack,
    in_comment: bool,
    pending: String,
    pending_start: Option<usize>,
    guard_pending: bool,
}

impl LineProcessor {
    pub fn new(options: LineOptions) -> Self {
        Self {
            options,
            stack: ConditionalStack::default(),
            in_comment: false,
            pending: String::new(),
            pending_start: None,
            guard_pending: options.ignore_header_guard,
        }
    }

    /// Feed physical line `line_no`; returns a line once one is complete
    pub fn feed<R>(&mut self, raw: &str, line_no: usize, resolver: &R) -> Option<LogicalLine>
    where
        R: ConditionResolver + ?Sized,
    {
        let raw = raw.trim_end_matches(['\n', '\r']);
        let code = self.strip_comments(raw);

        if self.in_comment {
            if code.trim().is_empty() {
                return self.comment_line(raw, line_no);
            }
            // Code before an unterminated comment joins the next line
            self.pending_start.get_or_insert(line_no);
            self.pending.push_str(code.trim_end());
            self.pending.push(' ');
            return None;
        }

        let line = if self.options.keep_whitespace || !self.pending.is_empty() {
            code.trim_end()
        } else {
            code.trim()
        };

        if let Some(body) = line.strip_suffix('\\') {
            self.pending_start.get_or_insert(line_no);
            self.pending.push_str(body);
            return None;
        }

        let mut text = std::mem::take(&mut self.pending);
        text.push_str(line);
        let start_line = self.pending_start.take().unwrap_or(line_no);
        Some(self.logical(text, start_line, line_no, resolver))
    }

    /// Flush a continuation left open at end of input
    pub fn finish<R>(&mut self, line_no: usize, resolver: &R) -> Option<LogicalLine>
    where
        R: ConditionResolver + ?Sized,
    {
        let start_line = self.pending_start.take()?;
        let text = std::mem::take(&mut self.pending);
        Some(self.logical(text, start_line, line_no, resolver))
    }

    fn comment_line(&self, raw: &str, line_no: usize) -> Option<LogicalLine> {
        self.options.include_block_comments.then(|| LogicalLine {
            text: raw.to_string(),
            line_no,
            start_line: line_no,
            kind: LineKind::Comment,
            active: self.stack.is_active(),
        })
    }

    fn logical<R>(
        &mut self,
        text: String,
        start_line: usize,
        line_no: usize,
        resolver: &R,
    ) -> LogicalLine
    where
        R: ConditionResolver + ?Sized,
    {
        let text = if self.options.keep_whitespace {
            text.trim_end().to_string()
        } else {
            text.trim().to_string()
        };

        if self.options.evaluate_conditionals {
            if let Some(directive) = Directive::parse(&text).filter(Directive::is_conditional) {
                self.apply(&directive, resolver);
                return LogicalLine {
                    text,
                    line_no,
                    start_line,
                    kind: LineKind::Directive,
                    active: self.stack.is_active(),
                };
            }
        }

        LogicalLine {
            text,
            line_no,
            start_line,
            kind: LineKind::Text,
            active: self.stack.is_active(),
        }
    }

    fn apply<R>(&mut self, directive: &Directive, resolver: &R)
    where
        R: ConditionResolver + ?Sized,
    {
        let live = self.stack.is_active();
        match directive {
            Directive::If(expr) => self.stack.push(live && resolver.is_true(expr)),
            Directive::Ifdef(name) => self.stack.push(live && resolver.is_defined(name)),
            Directive::Ifndef(name) => {
                let guard = std::mem::take(&mut self.guard_pending);
                self.stack.push(live && (guard || !resolver.is_defined(name)));
            }
            Directive::Elif(expr) => self.stack.elif(|| resolver.is_true(expr)),
            Directive::Else => self.stack.flip(),
            Directive::Endif => self.stack.pop(),
            _ => {}
        }
    }

    /// Remove comments from one physical line, tracking block comments
    /// across lines. Comment markers inside literals are not comments.
    fn strip_comments(&mut self, raw: &str) -> String {
        let mut out = String::with_capacity(raw.len());
        let mut chars = raw.char_indices().peekable();
        let mut quote: Option<char> = None;

        while let Some((_, c)) = chars.next() {
            if self.in_comment {
                if c == '*' && chars.peek().map(|&(_, n)| n) == Some('/') {
                    chars.next();
                    self.in_comment = false;
                    out.push(' ');
                }
                continue;
            }

            if let Some(q) = quote {
                out.push(c);
                if c == '\\' {
                    if let Some((_, escaped)) = chars.next() {
                        out.push(escaped);
                    }
                } else if c == q {
                    quote = None;
                }
                continue;
            }

            match (c, chars.peek().map(|&(_, n)| n)) {
                ('/', Some('*')) => {
                    chars.next();
                    self.in_comment = true;
                }
                ('/', Some('/')) => break,
                ('"', _) | ('\'', _) => {
                    quote = Some(c);
                    out.push(c);
                }
                _ => out.push(c),
            }
        }

        out
    }
}

/// Iterator of logical lines over a physical line source
pub struct Lines<'r, I, R: ?Sized> {
    source: I,
    processor: LineProcessor,
    resolver: &'r R,
    line_no: usize,
    finished: bool,
}

impl<'r, I, R: ?Sized> Lines<'r, I, R> {
    pub fn new(source: I, options: LineOptions, resolver: &'r R) -> Self {
        Self {
            source,
            processor: LineProcessor::new(options),
            resolver,
            line_no: 0,
            finished: false,
        }
    }
}

impl<I, S, R> Iterator for Lines<'_, I, R>
where
    I: Iterator<Item = S>,
    S: AsRef<str>,
    R: ConditionResolver + ?Sized,
{
    type Item = LogicalLine;

    fn next(&mut self) -> Option<LogicalLine> {
        for raw in self.source.by_ref() {
            self.line_no += 1;
            if let Some(line) = self.processor.feed(raw.as_ref(), self.line_no, self.resolver) {
                if line.active
                    || line.kind == LineKind::Directive
                    || !self.processor.options.evaluate_conditionals
                {
                    return Some(line);
                }
            }
        }
        if self.finished {
            return None;
        }
        self.finished = true;
        self.processor
            .finish(self.line_no, self.resolver)
            .filter(|line| line.active || line.kind == LineKind::Directive)
    }
}

/// Logical lines of `text`, inactive regions suppressed
pub fn read_lines<'a, R>(
    text: &'a str,
    options: LineOptions,
    resolver: &'a R,
) -> Lines<'a, std::str::Lines<'a>, R>
where
    R: ConditionResolver + ?Sized,
{
    Lines::new(text.lines(), options, resolver)
}

/// Physical line numbers split by whether a compiler would see them
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LineActivity {
    pub active: BTreeSet<usize>,
    pub inactive: BTreeSet<usize>,
}

/// Classify every physical line of `text`.
///
/// Directive lines count as active; lines consisting only of comment count
/// as inactive.
pub fn classify_lines<R>(text: &str, options: LineOptions, resolver: &R) -> LineActivity
where
    R: ConditionResolver + ?Sized,
{
    let options = LineOptions {
        include_block_comments: false,
        ..options
    };
    let total = text.lines().count();

    let active: BTreeSet<usize> = read_lines(text, options, resolver)
        .flat_map(|line| line.lines())
        .collect();
    let inactive = (1..=total).filter(|n| !active.contains(n)).collect();

    LineActivity { active, inactive }
}
