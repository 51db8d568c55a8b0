//! Expression Evaluator
//!
//! Reduces a fully expanded token string to an integer. Supports C integer
//! literals with suffixes, the fixed-width pseudo types `U8`..`U64` in casts
//! and `sizeof`, and the usual arithmetic, bitwise, comparison and logical
//! operators. Anything else (ternaries, strings, floats, unknown names)
//! yields no value.

use super::scanner::{tokenize, Token, TokenKind};

/// Fixed-width pseudo types and their size in bytes
pub const FIXED_TYPES: [(&str, u32); 4] = [("U8", 1), ("U16", 2), ("U32", 4), ("U64", 8)];

const INTEGER_SUFFIXES: [&str; 7] = ["u", "l", "ul", "ull", "lu", "ll", "llu"];

/// Nesting limit for parentheses and unary operators
const MAX_DEPTH: u32 = 128;

/// Identifiers the evaluator gives meaning to; the expander leaves them alone
pub fn is_reserved(name: &str) -> bool {
    name == "sizeof" || fixed_type_width(name).is_some()
}

fn fixed_type_width(name: &str) -> Option<u32> {
    FIXED_TYPES
        .iter()
        .find(|(ty, _)| *ty == name)
        .map(|(_, width)| *width)
}

/// Evaluate `text`, returning `None` if it is not a closed integer expression
pub fn try_eval(text: &str) -> Option<i128> {
    let tokens = tokenize(text);
    let mut parser = ExprParser {
        tokens: tokens.iter().filter(|t| !t.is_space()).collect(),
        pos: 0,
        dead: 0,
        depth: 0,
    };
    if parser.tokens.is_empty() {
        return None;
    }

    let value = parser.parse_or().ok()?;
    if parser.pos != parser.tokens.len() {
        return None;
    }
    Some(value)
}

/// Evaluate `text` as a condition
pub fn is_truthy(text: &str) -> Option<bool> {
    try_eval(text).map(|v| v != 0)
}

/// Parse one integer literal such as `0x1Fu` or `010`
pub fn parse_int_literal(literal: &str) -> Option<i128> {
    let split = literal
        .rfind(|c: char| !matches!(c, 'u' | 'U' | 'l' | 'L'))
        .map_or(0, |i| i + 1);
    let (digits, suffix) = literal.split_at(split);

    let suffix = suffix.to_ascii_lowercase();
    if !suffix.is_empty() && !INTEGER_SUFFIXES.contains(&suffix.as_str()) {
        return None;
    }
    if digits.is_empty() {
        return None;
    }

    let hex = digits.strip_prefix("0x").or_else(|| digits.strip_prefix("0X"));
    let bin = digits.strip_prefix("0b").or_else(|| digits.strip_prefix("0B"));
    let (radix, body) = if let Some(hex) = hex {
        (16, hex)
    } else if let Some(bin) = bin {
        (2, bin)
    } else if digits.len() > 1 && digits.starts_with('0') {
        (8, &digits[1..])
    } else {
        (10, digits)
    };

    if body.is_empty() || !body.chars().all(|c| c.is_digit(radix)) {
        return None;
    }
    i128::from_str_radix(body, radix).ok()
}

/// Value of a text that is a single integer literal, optionally
/// parenthesized: `5`, `(10u)`, `((0x1F))`.
pub fn integer_literal(text: &str) -> Option<i128> {
    let tokens = tokenize(text);
    let mut tokens: &[Token] = &tokens;

    loop {
        tokens = trim_space(tokens);
        match (tokens.first(), tokens.last()) {
            (Some(first), Some(last))
                if tokens.len() > 2 && first.is_punct("(") && last.is_punct(")") =>
            {
                tokens = &tokens[1..tokens.len() - 1];
            }
            _ => break,
        }
    }

    match tokens {
        [only] if only.kind == TokenKind::Number => parse_int_literal(&only.text),
        _ => None,
    }
}

fn trim_space(tokens: &[Token]) -> &[Token] {
    let start = tokens.iter().position(|t| !t.is_space()).unwrap_or(tokens.len());
    let end = tokens.iter().rposition(|t| !t.is_space()).map_or(start, |i| i + 1);
    &tokens[start..end]
}

#[derive(Debug)]
enum EvalError {
    Syntax,
    Value,
}

type Eval = Result<i128, EvalError>;

/// Recursive-descent evaluator, one method per C precedence level.
///
/// `dead` counts enclosing short-circuited operands; inside them value
/// errors (division by zero, unknown names) are ignored like a lazy
/// `and`/`or` would. `depth` bounds the recursion through unary
/// operators and parentheses.
struct ExprParser<'a> {
    tokens: Vec<&'a Token>,
    pos: usize,
    dead: u32,
    depth: u32,
}

impl<'a> ExprParser<'a> {
    fn peek(&self) -> Option<&'a Token> {
        self.tokens.get(self.pos).copied()
    }

    fn peek_punct(&self, p: &str) -> bool {
        self.peek().map_or(false, |t| t.is_punct(p))
    }

    fn eat_punct(&mut self, p: &str) -> bool {
        if self.peek_punct(p) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_punct(&mut self, p: &str) -> Result<(), EvalError> {
        if self.eat_punct(p) {
            Ok(())
        } else {
            Err(EvalError::Syntax)
        }
    }

    fn value(&self, v: Option<i128>) -> Eval {
        match v {
            Some(v) => Ok(v),
            None if self.dead > 0 => Ok(0),
            None => Err(EvalError::Value),
        }
    }

    fn parse_or(&mut self) -> Eval {
        let mut left = self.parse_and()?;
        while self.eat_punct("||") {
            let skip = left != 0;
            let right = self.parse_dead_if(skip, Self::parse_and)?;
            left = (skip || right != 0) as i128;
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Eval {
        let mut left = self.parse_bit_or()?;
        while self.eat_punct("&&") {
            let skip = left == 0;
            let right = self.parse_dead_if(skip, Self::parse_bit_or)?;
            left = (!skip && right != 0) as i128;
        }
        Ok(left)
    }

    fn parse_dead_if(&mut self, dead: bool, f: fn(&mut Self) -> Eval) -> Eval {
        if dead {
            self.dead += 1;
        }
        let result = f(self);
        if dead {
            self.dead -= 1;
        }
        result
    }

    fn parse_bit_or(&mut self) -> Eval {
        let mut left = self.parse_bit_xor()?;
        while self.eat_punct("|") {
            left |= self.parse_bit_xor()?;
        }
        Ok(left)
    }

    fn parse_bit_xor(&mut self) -> Eval {
        let mut left = self.parse_bit_and()?;
        while self.eat_punct("^") {
            left ^= self.parse_bit_and()?;
        }
        Ok(left)
    }

    fn parse_bit_and(&mut self) -> Eval {
        let mut left = self.parse_equality()?;
        while self.eat_punct("&") {
            left &= self.parse_equality()?;
        }
        Ok(left)
    }

    fn parse_equality(&mut self) -> Eval {
        let mut left = self.parse_relational()?;
        loop {
            if self.eat_punct("==") {
                left = (left == self.parse_relational()?) as i128;
            } else if self.eat_punct("!=") {
                left = (left != self.parse_relational()?) as i128;
            } else {
                return Ok(left);
            }
        }
    }

    fn parse_relational(&mut self) -> Eval {
        let mut left = self.parse_shift()?;
        loop {
            let op = match self.peek() {
                Some(t)
                    if t.kind == TokenKind::Punct
                        && matches!(t.text.as_str(), "<" | ">" | "<=" | ">=") =>
                {
                    t.text.as_str()
                }
                _ => return Ok(left),
            };
            self.pos += 1;
            let right = self.parse_shift()?;
            left = match op {
                "<" => left < right,
                ">" => left > right,
                "<=" => left <= right,
                _ => left >= right,
            } as i128;
        }
    }

    fn parse_shift(&mut self) -> Eval {
        let mut left = self.parse_additive()?;
        loop {
            if self.eat_punct("<<") {
                let right = self.parse_additive()?;
                left = self.value(shift_left(left, right))?;
            } else if self.eat_punct(">>") {
                let right = self.parse_additive()?;
                let shifted = u32::try_from(right).ok().filter(|&n| n < 128).map(|n| left >> n);
                left = self.value(shifted)?;
            } else {
                return Ok(left);
            }
        }
    }

    fn parse_additive(&mut self) -> Eval {
        let mut left = self.parse_multiplicative()?;
        loop {
            if self.eat_punct("+") {
                let right = self.parse_multiplicative()?;
                left = self.value(left.checked_add(right))?;
            } else if self.eat_punct("-") {
                let right = self.parse_multiplicative()?;
                left = self.value(left.checked_sub(right))?;
            } else {
                return Ok(left);
            }
        }
    }

    fn parse_multiplicative(&mut self) -> Eval {
        let mut left = self.parse_unary()?;
        loop {
            if self.eat_punct("*") {
                let right = self.parse_unary()?;
                left = self.value(left.checked_mul(right))?;
            } else if self.eat_punct("/") {
                let right = self.parse_unary()?;
                left = self.value(floor_div(left, right))?;
            } else if self.eat_punct("%") {
                let right = self.parse_unary()?;
                left = self.value(floor_mod(left, right))?;
            } else {
                return Ok(left);
            }
        }
    }

    fn parse_unary(&mut self) -> Eval {
        if self.depth >= MAX_DEPTH {
            return Err(EvalError::Syntax);
        }
        self.depth += 1;
        let result = self.parse_unary_operand();
        self.depth -= 1;
        result
    }

    fn parse_unary_operand(&mut self) -> Eval {
        if self.eat_punct("!") {
            return Ok((self.parse_unary()? == 0) as i128);
        }
        if self.eat_punct("~") {
            return Ok(!self.parse_unary()?);
        }
        if self.eat_punct("-") {
            let v = self.parse_unary()?;
            return self.value(v.checked_neg());
        }
        if self.eat_punct("+") {
            return self.parse_unary();
        }
        if let Some(width) = self.peek_cast() {
            self.pos += 3;
            let v = self.parse_unary()?;
            return Ok(v & width_mask(width));
        }
        self.parse_primary()
    }

    /// `( U8 )` style cast at the cursor
    fn peek_cast(&self) -> Option<u32> {
        match self.tokens.get(self.pos..self.pos + 3)? {
            [open, ty, close]
                if open.is_punct("(") && ty.kind == TokenKind::Ident && close.is_punct(")") =>
            {
                fixed_type_width(&ty.text)
            }
            _ => None,
        }
    }

    fn parse_primary(&mut self) -> Eval {
        let token = self.peek().ok_or(EvalError::Syntax)?;
        self.pos += 1;

        match token.kind {
            TokenKind::Number => parse_int_literal(&token.text).ok_or(EvalError::Syntax),
            TokenKind::Punct if token.text == "(" => {
                let v = self.parse_or()?;
                self.expect_punct(")")?;
                Ok(v)
            }
            TokenKind::Ident if token.text == "sizeof" => {
                self.expect_punct("(")?;
                let ty = self.peek().ok_or(EvalError::Syntax)?;
                self.pos += 1;
                self.expect_punct(")")?;
                self.value(fixed_type_width(&ty.text).map(i128::from))
            }
            // Unresolved name
            TokenKind::Ident => self.value(None),
            _ => Err(EvalError::Syntax),
        }
    }
}

fn width_mask(width: u32) -> i128 {
    (1i128 << (8 * width)) - 1
}

fn shift_left(value: i128, amount: i128) -> Option<i128> {
    let amount = u32::try_from(amount).ok().filter(|&n| n < 127)?;
    value.checked_mul(1i128 << amount)
}

fn floor_div(a: i128, b: i128) -> Option<i128> {
    let q = a.checked_div(b)?;
    if a % b != 0 && ((a < 0) != (b < 0)) {
        q.checked_sub(1)
    } else {
        Some(q)
    }
}

fn floor_mod(a: i128, b: i128) -> Option<i128> {
    let r = a.checked_rem(b)?;
    if r != 0 && ((r < 0) != (b < 0)) {
        Some(r + b)
    } else {
        Some(r)
    }
}
