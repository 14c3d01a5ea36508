//! Literal-only evaluator for conditional step expressions.
//!
//! Evaluation happens in three passes:
//!
//! 1. The raw expression is checked against a character allow-list.
//! 2. Every `ctx.<identifier>` is replaced by a literal encoding of the
//!    subject's context value (`'quoted'`, `12`, `true`, `null`).
//! 3. The resulting text, which contains no identifiers at all, is parsed
//!    by a small recursive-descent grammar and evaluated.
//!
//! Grammar (lowest precedence first):
//!
//! ```text
//! or         := and ( "||" and )*
//! and        := unary ( "&&" unary )*
//! unary      := "!" unary | comparison
//! comparison := primary ( cmp_op primary )?
//! primary    := literal | "(" or ")"
//! cmp_op     := "==" | "!=" | "===" | "!==" | "<" | ">" | "<=" | ">="
//! literal    := string | number | true | false | null
//! ```
//!
//! There are no identifiers, calls, or loops. Every failure, including a
//! disallowed character, evaluates to `false`.

use crate::flow::context::FlowContext;
use dripflow_types::subject::ContextValue;

/// Longest accepted expression, in characters, before substitution.
pub const MAX_EXPRESSION_LEN: usize = 1024;

/// Deepest accepted nesting of `(` and `!`.
pub const MAX_DEPTH: usize = 64;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Why an expression could not be evaluated.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConditionError {
    #[error("expression is empty")]
    Empty,

    #[error("expression is longer than {} characters", MAX_EXPRESSION_LEN)]
    TooLong,

    #[error("disallowed character {0:?} in expression")]
    DisallowedCharacter(char),

    #[error("tokenize error: {0}")]
    Tokenize(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("type error: {0}")]
    Type(String),
}

// ---------------------------------------------------------------------------
// ConditionEvaluator
// ---------------------------------------------------------------------------

/// Fail-closed evaluator for conditional step expressions.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConditionEvaluator;

impl ConditionEvaluator {
    pub fn new() -> Self {
        Self
    }

    /// Evaluate `expr` against `ctx`. Never errors: anything unusable is `false`.
    pub fn evaluate(&self, expr: &str, ctx: &FlowContext) -> bool {
        match self.try_evaluate(expr, ctx) {
            Ok(result) => result,
            Err(e) => {
                tracing::debug!(expression = expr, error = %e, "condition evaluated to false");
                false
            }
        }
    }

    /// Evaluate `expr` against `ctx`, reporting why evaluation failed.
    pub fn try_evaluate(&self, expr: &str, ctx: &FlowContext) -> Result<bool, ConditionError> {
        check_allowed(expr)?;
        let literal = Self::substitute(expr, ctx);
        let tokens = tokenize(&literal)?;

        let mut parser = Parser {
            tokens,
            pos: 0,
            depth: 0,
        };
        let ast = parser.parse_or()?;
        if let Some(tok) = parser.peek() {
            return Err(ConditionError::Parse(format!("unexpected trailing token {tok:?}")));
        }

        Ok(truthy(&eval(&ast)?))
    }

    /// Replace every `ctx.<identifier>` outside quoted literals with the
    /// literal encoding of its context value. Missing keys become `null`.
    pub fn substitute(expr: &str, ctx: &FlowContext) -> String {
        let chars: Vec<char> = expr.chars().collect();
        let mut out = String::with_capacity(expr.len());
        let mut quote: Option<char> = None;
        let mut i = 0;

        while i < chars.len() {
            let c = chars[i];

            if let Some(q) = quote {
                out.push(c);
                if c == '\\' && i + 1 < chars.len() {
                    out.push(chars[i + 1]);
                    i += 2;
                    continue;
                }
                if c == q {
                    quote = None;
                }
                i += 1;
                continue;
            }

            if c == '\'' || c == '"' {
                quote = Some(c);
                out.push(c);
                i += 1;
                continue;
            }

            let at_boundary = i == 0 || (!is_ident_char(chars[i - 1]) && chars[i - 1] != '.');
            if at_boundary && starts_with(&chars[i..], "ctx.") {
                let start = i + 4;
                let end = chars[start..]
                    .iter()
                    .position(|c| !is_ident_char(*c))
                    .map_or(chars.len(), |n| start + n);
                if end > start {
                    let key: String = chars[start..end].iter().collect();
                    out.push_str(&encode_literal(ctx.get(&key)));
                    i = end;
                    continue;
                }
            }

            out.push(c);
            i += 1;
        }

        out
    }
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn starts_with(chars: &[char], prefix: &str) -> bool {
    prefix.chars().count() <= chars.len() && prefix.chars().zip(chars).all(|(a, b)| a == *b)
}

fn check_allowed(expr: &str) -> Result<(), ConditionError> {
    if expr.trim().is_empty() {
        return Err(ConditionError::Empty);
    }
    if expr.chars().count() > MAX_EXPRESSION_LEN {
        return Err(ConditionError::TooLong);
    }
    match expr.chars().find(|c| !is_allowed(*c)) {
        Some(c) => Err(ConditionError::DisallowedCharacter(c)),
        None => Ok(()),
    }
}

fn is_allowed(c: char) -> bool {
    c.is_ascii_alphanumeric()
        || c.is_ascii_whitespace()
        || matches!(
            c,
            '.' | '=' | '!' | '>' | '<' | '\'' | '"' | '[' | ']' | '(' | ')' | '&' | '|' | '_'
                | '+' | '-'
        )
}

/// Encode a context value as source text the tokenizer reads back as the
/// same literal.
fn encode_literal(value: Option<&ContextValue>) -> String {
    match value {
        None | Some(ContextValue::Null) => "null".to_string(),
        Some(ContextValue::Bool(b)) => b.to_string(),
        Some(ContextValue::Number(n)) if n.is_finite() => n.to_string(),
        Some(ContextValue::Number(_)) => "null".to_string(),
        Some(ContextValue::String(s)) => {
            let mut quoted = String::with_capacity(s.len() + 2);
            quoted.push('\'');
            for c in s.chars() {
                if c == '\\' || c == '\'' {
                    quoted.push('\\');
                }
                quoted.push(c);
            }
            quoted.push('\'');
            quoted
        }
    }
}

// ---------------------------------------------------------------------------
// Tokenizer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Token {
    LParen,
    RParen,
    And,
    Or,
    Not,
    Cmp(CmpOp),
    Lit(Literal),
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum CmpOp {
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
}

#[derive(Debug, Clone, PartialEq)]
enum Literal {
    Null,
    Bool(bool),
    Number(f64),
    Str(String),
}

fn tokenize(src: &str) -> Result<Vec<Token>, ConditionError> {
    let chars: Vec<char> = src.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    let next_is = |i: usize, c: char| chars.get(i) == Some(&c);

    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '&' if next_is(i + 1, '&') => {
                tokens.push(Token::And);
                i += 2;
            }
            '|' if next_is(i + 1, '|') => {
                tokens.push(Token::Or);
                i += 2;
            }
            '=' if next_is(i + 1, '=') => {
                // `===` is strict equality, which `==` already is.
                i += if next_is(i + 2, '=') { 3 } else { 2 };
                tokens.push(Token::Cmp(CmpOp::Eq));
            }
            '!' if next_is(i + 1, '=') => {
                i += if next_is(i + 2, '=') { 3 } else { 2 };
                tokens.push(Token::Cmp(CmpOp::Ne));
            }
            '!' => {
                tokens.push(Token::Not);
                i += 1;
            }
            '<' | '>' => {
                let or_equal = next_is(i + 1, '=');
                let op = match (c, or_equal) {
                    ('<', false) => CmpOp::Lt,
                    ('<', true) => CmpOp::Le,
                    ('>', false) => CmpOp::Gt,
                    _ => CmpOp::Ge,
                };
                tokens.push(Token::Cmp(op));
                i += if or_equal { 2 } else { 1 };
            }
            '\'' | '"' => {
                let (s, end) = read_string(&chars, i)?;
                tokens.push(Token::Lit(Literal::Str(s)));
                i = end;
            }
            '-' | '0'..='9' => {
                let (n, end) = read_number(&chars, i)?;
                tokens.push(Token::Lit(Literal::Number(n)));
                i = end;
            }
            c if c.is_ascii_alphabetic() => {
                let end = chars[i..]
                    .iter()
                    .position(|c| !is_ident_char(*c))
                    .map_or(chars.len(), |n| i + n);
                let word: String = chars[i..end].iter().collect();
                let lit = match word.to_ascii_lowercase().as_str() {
                    "true" => Literal::Bool(true),
                    "false" => Literal::Bool(false),
                    "null" => Literal::Null,
                    _ => {
                        return Err(ConditionError::Tokenize(format!(
                            "unknown identifier '{word}'"
                        )));
                    }
                };
                tokens.push(Token::Lit(lit));
                i = end;
            }
            other => {
                return Err(ConditionError::Tokenize(format!(
                    "unexpected character {other:?} at offset {i}"
                )));
            }
        }
    }

    Ok(tokens)
}

/// Read a quoted string starting at `start` (the opening quote). Returns the
/// unescaped content and the index just past the closing quote.
fn read_string(chars: &[char], start: usize) -> Result<(String, usize), ConditionError> {
    let quote = chars[start];
    let mut out = String::new();
    let mut i = start + 1;

    while i < chars.len() {
        match chars[i] {
            '\\' => {
                let escaped = chars
                    .get(i + 1)
                    .ok_or_else(|| ConditionError::Tokenize("dangling escape".to_string()))?;
                out.push(*escaped);
                i += 2;
            }
            c if c == quote => return Ok((out, i + 1)),
            c => {
                out.push(c);
                i += 1;
            }
        }
    }

    Err(ConditionError::Tokenize("unterminated string literal".to_string()))
}

/// Read `-?digits(.digits)?` starting at `start`.
fn read_number(chars: &[char], start: usize) -> Result<(f64, usize), ConditionError> {
    let mut i = start;
    if chars[i] == '-' {
        i += 1;
    }

    let digits_from = |i: usize| {
        chars[i..]
            .iter()
            .position(|c| !c.is_ascii_digit())
            .map_or(chars.len(), |n| i + n)
    };

    let int_end = digits_from(i);
    if int_end == i {
        return Err(ConditionError::Tokenize(format!(
            "expected digits at offset {i}"
        )));
    }
    i = int_end;

    if chars.get(i) == Some(&'.') {
        let frac_end = digits_from(i + 1);
        if frac_end == i + 1 {
            return Err(ConditionError::Tokenize(format!(
                "expected digits after '.' at offset {i}"
            )));
        }
        i = frac_end;
    }

    let text: String = chars[start..i].iter().collect();
    text.parse::<f64>()
        .map(|n| (n, i))
        .map_err(|e| ConditionError::Tokenize(format!("bad number '{text}': {e}")))
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Lit(Literal),
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Cmp(CmpOp, Box<Expr>, Box<Expr>),
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        tok
    }

    fn enter(&mut self) -> Result<(), ConditionError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(ConditionError::Parse("expression nested too deeply".to_string()));
        }
        Ok(())
    }

    fn parse_or(&mut self) -> Result<Expr, ConditionError> {
        let mut lhs = self.parse_and()?;
        while self.peek() == Some(&Token::Or) {
            self.pos += 1;
            let rhs = self.parse_and()?;
            lhs = Expr::Or(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Expr, ConditionError> {
        let mut lhs = self.parse_unary()?;
        while self.peek() == Some(&Token::And) {
            self.pos += 1;
            let rhs = self.parse_unary()?;
            lhs = Expr::And(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expr, ConditionError> {
        if self.peek() == Some(&Token::Not) {
            self.pos += 1;
            self.enter()?;
            let inner = self.parse_unary()?;
            self.depth -= 1;
            return Ok(Expr::Not(Box::new(inner)));
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Expr, ConditionError> {
        let lhs = self.parse_primary()?;
        if let Some(Token::Cmp(op)) = self.peek().cloned() {
            self.pos += 1;
            let rhs = self.parse_primary()?;
            return Ok(Expr::Cmp(op, Box::new(lhs), Box::new(rhs)));
        }
        Ok(lhs)
    }

    fn parse_primary(&mut self) -> Result<Expr, ConditionError> {
        match self.advance() {
            Some(Token::Lit(lit)) => Ok(Expr::Lit(lit)),
            Some(Token::LParen) => {
                self.enter()?;
                let inner = self.parse_or()?;
                self.depth -= 1;
                match self.advance() {
                    Some(Token::RParen) => Ok(inner),
                    other => Err(ConditionError::Parse(format!(
                        "expected ')', found {other:?}"
                    ))),
                }
            }
            Some(tok) => Err(ConditionError::Parse(format!("unexpected token {tok:?}"))),
            None => Err(ConditionError::Parse("unexpected end of expression".to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------------

fn eval(expr: &Expr) -> Result<Literal, ConditionError> {
    match expr {
        Expr::Lit(lit) => Ok(lit.clone()),
        Expr::Not(inner) => Ok(Literal::Bool(!truthy(&eval(inner)?))),
        Expr::And(lhs, rhs) => {
            if !truthy(&eval(lhs)?) {
                return Ok(Literal::Bool(false));
            }
            Ok(Literal::Bool(truthy(&eval(rhs)?)))
        }
        Expr::Or(lhs, rhs) => {
            if truthy(&eval(lhs)?) {
                return Ok(Literal::Bool(true));
            }
            Ok(Literal::Bool(truthy(&eval(rhs)?)))
        }
        Expr::Cmp(op, lhs, rhs) => compare(*op, &eval(lhs)?, &eval(rhs)?).map(Literal::Bool),
    }
}

fn compare(op: CmpOp, lhs: &Literal, rhs: &Literal) -> Result<bool, ConditionError> {
    match op {
        CmpOp::Eq => Ok(strict_eq(lhs, rhs)),
        CmpOp::Ne => Ok(!strict_eq(lhs, rhs)),
        CmpOp::Lt | CmpOp::Gt | CmpOp::Le | CmpOp::Ge => {
            let ordering = match (lhs, rhs) {
                (Literal::Number(a), Literal::Number(b)) => a.partial_cmp(b),
                (Literal::Str(a), Literal::Str(b)) => Some(a.cmp(b)),
                _ => None,
            }
            .ok_or_else(|| {
                ConditionError::Type(format!("cannot order {lhs:?} against {rhs:?}"))
            })?;

            Ok(match op {
                CmpOp::Lt => ordering.is_lt(),
                CmpOp::Gt => ordering.is_gt(),
                CmpOp::Le => ordering.is_le(),
                _ => ordering.is_ge(),
            })
        }
    }
}

/// Equality never coerces across types.
fn strict_eq(lhs: &Literal, rhs: &Literal) -> bool {
    match (lhs, rhs) {
        (Literal::Null, Literal::Null) => true,
        (Literal::Bool(a), Literal::Bool(b)) => a == b,
        (Literal::Number(a), Literal::Number(b)) => a == b,
        (Literal::Str(a), Literal::Str(b)) => a == b,
        _ => false,
    }
}

fn truthy(value: &Literal) -> bool {
    match value {
        Literal::Null => false,
        Literal::Bool(b) => *b,
        Literal::Number(n) => *n != 0.0 && !n.is_nan(),
        Literal::Str(s) => !s.is_empty(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
