//! Assertion expressions for `expect_response_body` and
//! `expect_response_header` cells.
//!
//! The language is closed: four predicates (`contains`, `equal`,
//! `greatThan`, `lessThan`), the combinators `and` / `or` / `not`,
//! parentheses, literals and `result.<path>` references into the
//! response. Expressions are parsed into an [`Expr`] tree and
//! evaluated directly; nothing is handed to a general interpreter.

use crate::env::Environment;
use crate::literal::to_text;
use crate::path;
use regex::{Captures, Regex};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::LazyLock;
use thiserror::Error;
use tracing::debug;

/// Why an expression could not be parsed.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExpressionError {
    #[error("unexpected character '{ch}' at position {pos}")]
    UnexpectedChar { ch: char, pos: usize },
    #[error("unterminated string starting at position {0}")]
    UnterminatedString(usize),
    #[error("invalid number '{0}'")]
    InvalidNumber(String),
    #[error("empty path after 'result.' at position {0}")]
    EmptyReference(usize),
    #[error("unknown function '{0}'")]
    UnknownFunction(String),
    #[error("{name}() takes 2 arguments, {found} given")]
    Arity { name: String, found: usize },
    #[error("expected {expected}, found {found}")]
    Unexpected { expected: String, found: String },
}

/// The closed set of predicate functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Predicate {
    Contains,
    Equal,
    GreatThan,
    LessThan,
}

impl Predicate {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "contains" => Some(Self::Contains),
            "equal" => Some(Self::Equal),
            "greatThan" => Some(Self::GreatThan),
            "lessThan" => Some(Self::LessThan),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Contains => "contains",
            Self::Equal => "equal",
            Self::GreatThan => "greatThan",
            Self::LessThan => "lessThan",
        }
    }
}

/// A predicate argument.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Literal(Value),
    /// `result.<path>`; absent paths evaluate to `null`.
    Reference(String),
    Array(Vec<Operand>),
    Object(Vec<(String, Operand)>),
}

/// Parsed condition.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Bool(bool),
    Call {
        predicate: Predicate,
        left: Operand,
        right: Operand,
    },
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
}

/// Outcome of evaluating one condition cell.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub passed: bool,
    /// The expression after `$name` substitution.
    pub expression: String,
    /// One line per predicate call that returned false.
    pub failures: Vec<String>,
    /// Set when the expression could not be parsed.
    pub error: Option<String>,
}

/// Evaluate `expression` against `response`. Blank expressions pass;
/// unparseable ones fail.
pub fn evaluate(expression: &str, response: &Value, env: &Environment) -> bool {
    evaluate_detailed(expression, response, env).passed
}

/// [`evaluate`] with the diagnostics kept.
pub fn evaluate_detailed(
    expression: &str,
    response: &Value,
    env: &Environment,
) -> Evaluation {
    if expression.trim().is_empty() {
        return Evaluation {
            passed: true,
            expression: String::new(),
            failures: Vec::new(),
            error: None,
        };
    }

    let expanded = env.substitute(expression);
    match parse(&expanded) {
        Ok(expr) => {
            let mut failures = Vec::new();
            let passed = eval_expr(&expr, response, &mut failures);
            debug!(
                "Condition '{}' evaluated to {} ({})",
                expanded,
                passed,
                render_references(&expanded, response)
            );
            Evaluation {
                passed,
                expression: expanded,
                failures,
                error: None,
            }
        }
        Err(e) => {
            debug!("Error evaluating condition '{}': {}", expanded, e);
            Evaluation {
                passed: false,
                expression: expanded,
                failures: Vec::new(),
                error: Some(e.to_string()),
            }
        }
    }
}

/// Replace each `result.<path>` in `expression` with a literal
/// rendering of the resolved value. Used for diagnostics.
pub fn render_references(expression: &str, response: &Value) -> String {
    static REF_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"\bresult\.([A-Za-z0-9_\[\]\.]+)")
            .expect("failed to compile reference regex")
    });

    REF_RE
        .replace_all(expression, |caps: &Captures| {
            match path::resolve(response, &caps[1]) {
                // JSON text doubles as literal syntax for every variant
                Some(value) => value.to_string(),
                None => "null".to_string(),
            }
        })
        .into_owned()
}

// ── lexer ─────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Str(String),
    Num(Value),
    Ref(String),
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Comma,
    Colon,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Ident(s) => write!(f, "'{s}'"),
            Token::Str(s) => write!(f, "string {s:?}"),
            Token::Num(n) => write!(f, "number {n}"),
            Token::Ref(p) => write!(f, "'result.{p}'"),
            Token::LParen => f.write_str("'('"),
            Token::RParen => f.write_str("')'"),
            Token::LBracket => f.write_str("'['"),
            Token::RBracket => f.write_str("']'"),
            Token::LBrace => f.write_str("'{'"),
            Token::RBrace => f.write_str("'}'"),
            Token::Comma => f.write_str("','"),
            Token::Colon => f.write_str("':'"),
        }
    }
}

fn tokenize(input: &str) -> Result<Vec<Token>, ExpressionError> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '(' => push(&mut tokens, &mut i, Token::LParen),
            ')' => push(&mut tokens, &mut i, Token::RParen),
            '[' => push(&mut tokens, &mut i, Token::LBracket),
            ']' => push(&mut tokens, &mut i, Token::RBracket),
            '{' => push(&mut tokens, &mut i, Token::LBrace),
            '}' => push(&mut tokens, &mut i, Token::RBrace),
            ',' => push(&mut tokens, &mut i, Token::Comma),
            ':' => push(&mut tokens, &mut i, Token::Colon),
            '\'' | '"' => {
                let (s, next) = lex_string(&chars, i)?;
                tokens.push(Token::Str(s));
                i = next;
            }
            c if c.is_ascii_digit()
                || (c == '-'
                    && chars.get(i + 1).is_some_and(|n| n.is_ascii_digit())) =>
            {
                let start = i;
                i += 1;
                while i < chars.len()
                    && (chars[i].is_ascii_digit()
                        || matches!(chars[i], '.' | 'e' | 'E')
                        || (matches!(chars[i], '+' | '-')
                            && matches!(chars[i - 1], 'e' | 'E')))
                {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let value = serde_json::from_str::<Value>(&text)
                    .ok()
                    .filter(Value::is_number)
                    .ok_or(ExpressionError::InvalidNumber(text))?;
                tokens.push(Token::Num(value));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len()
                    && (chars[i].is_ascii_alphanumeric() || chars[i] == '_')
                {
                    i += 1;
                }
                let ident: String = chars[start..i].iter().collect();
                if ident == "result" && chars.get(i) == Some(&'.') {
                    i += 1;
                    let path_start = i;
                    while i < chars.len()
                        && (chars[i].is_ascii_alphanumeric()
                            || matches!(chars[i], '_' | '[' | ']' | '.'))
                    {
                        i += 1;
                    }
                    let path: String = chars[path_start..i].iter().collect();
                    if path.trim_matches('.').is_empty() {
                        return Err(ExpressionError::EmptyReference(path_start));
                    }
                    tokens.push(Token::Ref(path));
                } else {
                    tokens.push(Token::Ident(ident));
                }
            }
            other => {
                return Err(ExpressionError::UnexpectedChar { ch: other, pos: i })
            }
        }
    }

    Ok(tokens)
}

fn push(tokens: &mut Vec<Token>, i: &mut usize, token: Token) {
    tokens.push(token);
    *i += 1;
}

fn lex_string(chars: &[char], start: usize) -> Result<(String, usize), ExpressionError> {
    let quote = chars[start];
    let mut out = String::new();
    let mut i = start + 1;

    while i < chars.len() {
        match chars[i] {
            c if c == quote => return Ok((out, i + 1)),
            '\\' => {
                let escaped = *chars
                    .get(i + 1)
                    .ok_or(ExpressionError::UnterminatedString(start))?;
                i += 2;
                match escaped {
                    'n' => out.push('\n'),
                    't' => out.push('\t'),
                    'r' => out.push('\r'),
                    'u' => {
                        let hex: String = chars.iter().skip(i).take(4).collect();
                        match u32::from_str_radix(&hex, 16).ok().and_then(char::from_u32) {
                            Some(ch) if hex.len() == 4 => {
                                out.push(ch);
                                i += 4;
                            }
                            _ => out.push('u'),
                        }
                    }
                    other => out.push(other),
                }
            }
            c => {
                out.push(c);
                i += 1;
            }
        }
    }

    Err(ExpressionError::UnterminatedString(start))
}

// ── parser ────────────────────────────────────────────

/// Parse an (already substituted) expression into an [`Expr`].
pub fn parse(expression: &str) -> Result<Expr, ExpressionError> {
    let tokens = tokenize(expression)?;
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.parse_or()?;
    match parser.peek() {
        None => Ok(expr),
        Some(token) => Err(ExpressionError::Unexpected {
            expected: "end of expression".into(),
            found: token.to_string(),
        }),
    }
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn peek_keyword(&self, keyword: &str) -> bool {
        matches!(self.peek(), Some(Token::Ident(s)) if s == keyword)
    }

    fn expect(&mut self, wanted: Token) -> Result<(), ExpressionError> {
        match self.next() {
            Some(token) if token == wanted => Ok(()),
            other => Err(unexpected(&wanted.to_string(), other)),
        }
    }

    fn parse_or(&mut self) -> Result<Expr, ExpressionError> {
        let mut left = self.parse_and()?;
        while self.peek_keyword("or") {
            self.pos += 1;
            let right = self.parse_and()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, ExpressionError> {
        let mut left = self.parse_not()?;
        while self.peek_keyword("and") {
            self.pos += 1;
            let right = self.parse_not()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_not(&mut self) -> Result<Expr, ExpressionError> {
        if self.peek_keyword("not") {
            self.pos += 1;
            return Ok(Expr::Not(Box::new(self.parse_not()?)));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Expr, ExpressionError> {
        match self.next() {
            Some(Token::LParen) => {
                let inner = self.parse_or()?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            Some(Token::Ident(name)) => match name.as_str() {
                "true" | "True" => Ok(Expr::Bool(true)),
                "false" | "False" => Ok(Expr::Bool(false)),
                _ => self.parse_call(name),
            },
            other => Err(unexpected("a condition", other)),
        }
    }

    fn parse_call(&mut self, name: String) -> Result<Expr, ExpressionError> {
        let predicate = Predicate::from_name(&name)
            .ok_or_else(|| ExpressionError::UnknownFunction(name.clone()))?;
        self.expect(Token::LParen)?;

        let mut args = Vec::new();
        if !matches!(self.peek(), Some(Token::RParen)) {
            loop {
                args.push(self.parse_operand()?);
                if matches!(self.peek(), Some(Token::Comma)) {
                    self.pos += 1;
                } else {
                    break;
                }
            }
        }
        self.expect(Token::RParen)?;

        let found = args.len();
        let mut args = args.into_iter();
        match (args.next(), args.next(), found) {
            (Some(left), Some(right), 2) => Ok(Expr::Call {
                predicate,
                left,
                right,
            }),
            _ => Err(ExpressionError::Arity { name, found }),
        }
    }

    fn parse_operand(&mut self) -> Result<Operand, ExpressionError> {
        match self.next() {
            Some(Token::Ref(path)) => Ok(Operand::Reference(path)),
            Some(Token::Str(s)) => Ok(Operand::Literal(Value::String(s))),
            Some(Token::Num(n)) => Ok(Operand::Literal(n)),
            Some(Token::Ident(word)) => match word.as_str() {
                "true" | "True" => Ok(Operand::Literal(Value::Bool(true))),
                "false" | "False" => Ok(Operand::Literal(Value::Bool(false))),
                "null" | "None" => Ok(Operand::Literal(Value::Null)),
                _ => Err(unexpected("a value", Some(Token::Ident(word)))),
            },
            Some(Token::LBracket) => {
                let mut items = Vec::new();
                if !matches!(self.peek(), Some(Token::RBracket)) {
                    loop {
                        items.push(self.parse_operand()?);
                        if matches!(self.peek(), Some(Token::Comma)) {
                            self.pos += 1;
                        } else {
                            break;
                        }
                    }
                }
                self.expect(Token::RBracket)?;
                Ok(Operand::Array(items))
            }
            Some(Token::LBrace) => {
                let mut entries = Vec::new();
                if !matches!(self.peek(), Some(Token::RBrace)) {
                    loop {
                        let key = match self.next() {
                            Some(Token::Str(s)) | Some(Token::Ident(s)) => s,
                            other => return Err(unexpected("an object key", other)),
                        };
                        self.expect(Token::Colon)?;
                        entries.push((key, self.parse_operand()?));
                        if matches!(self.peek(), Some(Token::Comma)) {
                            self.pos += 1;
                        } else {
                            break;
                        }
                    }
                }
                self.expect(Token::RBrace)?;
                Ok(Operand::Object(entries))
            }
            other => Err(unexpected("a value", other)),
        }
    }
}

fn unexpected(expected: &str, found: Option<Token>) -> ExpressionError {
    ExpressionError::Unexpected {
        expected: expected.to_string(),
        found: found
            .map(|t| t.to_string())
            .unwrap_or_else(|| "end of expression".to_string()),
    }
}

// ── evaluation ────────────────────────────────────────

fn eval_expr(expr: &Expr, response: &Value, failures: &mut Vec<String>) -> bool {
    match expr {
        Expr::Bool(b) => *b,
        Expr::Not(inner) => !eval_expr(inner, response, failures),
        Expr::And(l, r) => {
            eval_expr(l, response, failures) && eval_expr(r, response, failures)
        }
        Expr::Or(l, r) => {
            eval_expr(l, response, failures) || eval_expr(r, response, failures)
        }
        Expr::Call {
            predicate,
            left,
            right,
        } => {
            let a = operand_value(left, response);
            let b = operand_value(right, response);
            let (passed, failure) = apply_predicate(*predicate, &a, &b);
            if let (false, Some(message)) = (passed, failure) {
                failures.push(message);
            }
            passed
        }
    }
}

fn operand_value(operand: &Operand, response: &Value) -> Value {
    match operand {
        Operand::Literal(v) => v.clone(),
        Operand::Reference(p) => path::resolve(response, p).unwrap_or(Value::Null),
        Operand::Array(items) => Value::Array(
            items.iter().map(|o| operand_value(o, response)).collect(),
        ),
        Operand::Object(entries) => Value::Object(
            entries
                .iter()
                .map(|(k, o)| (k.clone(), operand_value(o, response)))
                .collect::<Map<String, Value>>(),
        ),
    }
}

/// Run one predicate. Returns the verdict and, when false, a message
/// describing expected vs actual.
pub fn apply_predicate(predicate: Predicate, a: &Value, b: &Value) -> (bool, Option<String>) {
    match predicate {
        Predicate::Contains => {
            let haystack = to_text(a);
            let needle = to_text(b);
            if haystack.contains(&needle) {
                (true, None)
            } else {
                (
                    false,
                    Some(format!(
                        "Expected '{}' to be contained in '{}'",
                        needle,
                        truncate(&haystack, 200)
                    )),
                )
            }
        }
        Predicate::Equal => {
            if loose_equal(a, b) {
                (true, None)
            } else {
                (
                    false,
                    Some(format!("Expected '{}', Actual '{}'", to_text(b), to_text(a))),
                )
            }
        }
        Predicate::GreatThan | Predicate::LessThan => {
            let symbol = if predicate == Predicate::GreatThan { ">" } else { "<" };
            match (as_number(a), as_number(b)) {
                (Some(x), Some(y)) => {
                    let passed = if predicate == Predicate::GreatThan {
                        x > y
                    } else {
                        x < y
                    };
                    let failure = (!passed).then(|| {
                        format!(
                            "Expected value {} {}, Actual {}",
                            symbol,
                            to_text(b),
                            to_text(a)
                        )
                    });
                    (passed, failure)
                }
                _ => (
                    false,
                    Some(format!(
                        "Cannot perform {} comparison on non-numeric values '{}' and '{}'",
                        predicate.name(),
                        to_text(a),
                        to_text(b)
                    )),
                ),
            }
        }
    }
}

/// Numeric reading of a value: JSON numbers, or strings holding a
/// finite number.
fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|f| f.is_finite()),
        _ => None,
    }
}

/// Coerced equality used by `equal`: numbers and numeric strings
/// compare by value, `null` only matches `null`, containers compare
/// element-wise, and everything else by text form.
pub fn loose_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Null, Value::Null) => true,
        (Value::Null, _) | (_, Value::Null) => false,
        (Value::Array(x), Value::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(l, r)| loose_equal(l, r))
        }
        (Value::Object(x), Value::Object(y)) => {
            x.len() == y.len()
                && x.iter()
                    .all(|(k, l)| y.get(k).is_some_and(|r| loose_equal(l, r)))
        }
        (container @ (Value::Array(_) | Value::Object(_)), Value::String(s))
        | (Value::String(s), container @ (Value::Array(_) | Value::Object(_))) => {
            match serde_json::from_str::<Value>(s) {
                Ok(parsed @ (Value::Array(_) | Value::Object(_))) => {
                    loose_equal(container, &parsed)
                }
                _ => false,
            }
        }
        _ => match (as_number(a), as_number(b)) {
            (Some(x), Some(y)) => x == y,
            _ => to_text(a) == to_text(b),
        },
    }
}

fn truncate(text: &str, limit: usize) -> String {
    if text.chars().count() > limit {
        let head: String = text.chars().take(limit).collect();
        format!("{head}...")
    } else {
        text.to_string()
    }
}
