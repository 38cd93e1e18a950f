//! A restricted expression evaluator.
//!
//! Supports number, string, boolean and null literals, variables looked up in
//! a caller-supplied map, arithmetic (`+ - * / %`), comparison
//! (`== != < <= > >=`), logic (`&& || !` and the words `and or not`) and
//! parentheses. There are no function calls, attribute access, assignment or
//! loops, and both input length and nesting depth are bounded. Evaluation is
//! pure: the only inputs are the source text and the variable map.
//!
//! ```
//! use replan::tools::expr::{Literal, evaluate};
//! use std::collections::BTreeMap;
//!
//! let mut vars = BTreeMap::new();
//! vars.insert("rain_chance".to_string(), Literal::Number(75.0));
//! assert_eq!(evaluate("rain_chance > 50", &vars).unwrap(), Literal::Bool(true));
//! ```

use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Longest accepted source text, in bytes.
pub const MAX_EXPR_LEN: usize = 1024;

/// Deepest accepted nesting of unary operators and parentheses.
pub const MAX_DEPTH: usize = 32;

/// A value produced by evaluation.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Number(f64),
    Bool(bool),
    Str(String),
    Null,
}

impl Literal {
    /// Convert a scalar JSON value. Arrays and objects have no literal form.
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Null => Some(Literal::Null),
            Value::Bool(b) => Some(Literal::Bool(*b)),
            Value::Number(n) => n.as_f64().map(Literal::Number),
            Value::String(s) => Some(Literal::Str(s.clone())),
            Value::Array(_) | Value::Object(_) => None,
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            Literal::Number(n) => serde_json::Number::from_f64(*n)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            Literal::Bool(b) => Value::Bool(*b),
            Literal::Str(s) => Value::String(s.clone()),
            Literal::Null => Value::Null,
        }
    }

    pub fn truthy(&self) -> bool {
        match self {
            Literal::Number(n) => *n != 0.0,
            Literal::Bool(b) => *b,
            Literal::Str(s) => !s.is_empty(),
            Literal::Null => false,
        }
    }

    fn type_name(&self) -> &'static str {
        match self {
            Literal::Number(_) => "number",
            Literal::Bool(_) => "bool",
            Literal::Str(_) => "string",
            Literal::Null => "null",
        }
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Number(n) => write!(f, "{n}"),
            Literal::Bool(b) => write!(f, "{b}"),
            Literal::Str(s) => write!(f, "{s:?}"),
            Literal::Null => write!(f, "null"),
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ExprError {
    #[error("expression is {0} bytes, limit is {MAX_EXPR_LEN}")]
    TooLong(usize),
    #[error("expression nests deeper than {MAX_DEPTH} levels")]
    TooDeep,
    #[error("unexpected character {ch:?} at {pos}")]
    UnexpectedChar { pos: usize, ch: char },
    #[error("unterminated string starting at {0}")]
    UnterminatedString(usize),
    #[error("unexpected token '{found}' at {pos}")]
    UnexpectedToken { pos: usize, found: String },
    #[error("unexpected end of expression")]
    UnexpectedEnd,
    #[error("unknown variable '{0}'")]
    UnknownVariable(String),
    #[error("cannot apply '{op}' to {left} and {right}")]
    TypeMismatch {
        op: &'static str,
        left: &'static str,
        right: &'static str,
    },
    #[error("division by zero")]
    DivisionByZero,
}

// ── Lexer ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Str(String),
    Ident(String),
    Op(&'static str),
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Number(n) => write!(f, "{n}"),
            Token::Str(s) => write!(f, "{s:?}"),
            Token::Ident(s) => write!(f, "{s}"),
            Token::Op(op) => write!(f, "{op}"),
        }
    }
}

const OPERATORS: &[&str] = &[
    "==", "!=", "<=", ">=", "&&", "||", "+", "-", "*", "/", "%", "<", ">", "!", "(", ")",
];

fn tokenize(source: &str) -> Result<Vec<(usize, Token)>, ExprError> {
    let mut tokens = Vec::new();
    let mut chars = source.char_indices().peekable();

    while let Some(&(pos, ch)) = chars.peek() {
        if ch.is_whitespace() {
            chars.next();
        } else if ch.is_ascii_digit() || ch == '.' {
            let mut end = pos;
            while let Some(&(i, c)) = chars.peek() {
                if c.is_ascii_digit() || c == '.' {
                    end = i + c.len_utf8();
                    chars.next();
                } else {
                    break;
                }
            }
            let text = source.get(pos..end).unwrap_or_default();
            let number = text
                .parse::<f64>()
                .map_err(|_| ExprError::UnexpectedChar { pos, ch })?;
            tokens.push((pos, Token::Number(number)));
        } else if ch == '"' || ch == '\'' {
            chars.next();
            let mut text = String::new();
            let mut closed = false;
            while let Some((_, c)) = chars.next() {
                if c == ch {
                    closed = true;
                    break;
                }
                if c == '\\' {
                    match chars.next() {
                        Some((_, escaped)) => text.push(escaped),
                        None => break,
                    }
                } else {
                    text.push(c);
                }
            }
            if !closed {
                return Err(ExprError::UnterminatedString(pos));
            }
            tokens.push((pos, Token::Str(text)));
        } else if ch.is_alphabetic() || ch == '_' {
            let mut ident = String::new();
            while let Some(&(_, c)) = chars.peek() {
                if c.is_alphanumeric() || c == '_' {
                    ident.push(c);
                    chars.next();
                } else {
                    break;
                }
            }
            tokens.push((pos, Token::Ident(ident)));
        } else {
            let rest = source.get(pos..).unwrap_or_default();
            let op = OPERATORS
                .iter()
                .find(|op| rest.starts_with(**op))
                .ok_or(ExprError::UnexpectedChar { pos, ch })?;
            for _ in 0..op.len() {
                chars.next();
            }
            tokens.push((pos, Token::Op(op)));
        }
    }
    Ok(tokens)
}

// ── Parser ─────────────────────────────────────────────────────────

#[derive(Debug)]
enum Expr {
    Lit(Literal),
    Var(String),
    Not(Box<Expr>),
    Neg(Box<Expr>),
    Binary(&'static str, Box<Expr>, Box<Expr>),
}

struct Parser {
    tokens: Vec<(usize, Token)>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(_, t)| t)
    }

    fn advance(&mut self) -> Option<(usize, Token)> {
        let tok = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        tok
    }

    /// Consume the next token if it is one of `ops` (symbol or keyword form).
    fn eat(&mut self, ops: &[(&'static str, &'static str)]) -> Option<&'static str> {
        let matched = match self.peek()? {
            Token::Op(op) => ops.iter().find(|(sym, _)| sym == op).map(|(sym, _)| *sym),
            Token::Ident(word) => ops
                .iter()
                .find(|(_, kw)| !kw.is_empty() && *kw == word.as_str())
                .map(|(sym, _)| *sym),
            _ => None,
        };
        if matched.is_some() {
            self.pos += 1;
        }
        matched
    }

    fn descend(&mut self) -> Result<(), ExprError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(ExprError::TooDeep);
        }
        Ok(())
    }

    fn or(&mut self) -> Result<Expr, ExprError> {
        let mut left = self.and()?;
        while let Some(op) = self.eat(&[("||", "or")]) {
            left = Expr::Binary(op, Box::new(left), Box::new(self.and()?));
        }
        Ok(left)
    }

    fn and(&mut self) -> Result<Expr, ExprError> {
        let mut left = self.not()?;
        while let Some(op) = self.eat(&[("&&", "and")]) {
            left = Expr::Binary(op, Box::new(left), Box::new(self.not()?));
        }
        Ok(left)
    }

    fn not(&mut self) -> Result<Expr, ExprError> {
        if self.eat(&[("!", "not")]).is_some() {
            self.descend()?;
            let inner = self.not()?;
            self.depth -= 1;
            return Ok(Expr::Not(Box::new(inner)));
        }
        self.comparison()
    }

    fn comparison(&mut self) -> Result<Expr, ExprError> {
        let left = self.additive()?;
        let ops = [
            ("==", ""),
            ("!=", ""),
            ("<=", ""),
            (">=", ""),
            ("<", ""),
            (">", ""),
        ];
        match self.eat(&ops) {
            Some(op) => Ok(Expr::Binary(op, Box::new(left), Box::new(self.additive()?))),
            None => Ok(left),
        }
    }

    fn additive(&mut self) -> Result<Expr, ExprError> {
        let mut left = self.multiplicative()?;
        while let Some(op) = self.eat(&[("+", ""), ("-", "")]) {
            left = Expr::Binary(op, Box::new(left), Box::new(self.multiplicative()?));
        }
        Ok(left)
    }

    fn multiplicative(&mut self) -> Result<Expr, ExprError> {
        let mut left = self.unary()?;
        while let Some(op) = self.eat(&[("*", ""), ("/", ""), ("%", "")]) {
            left = Expr::Binary(op, Box::new(left), Box::new(self.unary()?));
        }
        Ok(left)
    }

    fn unary(&mut self) -> Result<Expr, ExprError> {
        if self.eat(&[("-", "")]).is_some() {
            self.descend()?;
            let inner = self.unary()?;
            self.depth -= 1;
            return Ok(Expr::Neg(Box::new(inner)));
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<Expr, ExprError> {
        let (pos, token) = self.advance().ok_or(ExprError::UnexpectedEnd)?;
        match token {
            Token::Number(n) => Ok(Expr::Lit(Literal::Number(n))),
            Token::Str(s) => Ok(Expr::Lit(Literal::Str(s))),
            Token::Ident(word) => Ok(match word.as_str() {
                "true" | "True" => Expr::Lit(Literal::Bool(true)),
                "false" | "False" => Expr::Lit(Literal::Bool(false)),
                "null" | "None" => Expr::Lit(Literal::Null),
                _ => Expr::Var(word),
            }),
            Token::Op("(") => {
                self.descend()?;
                let inner = self.or()?;
                self.depth -= 1;
                match self.advance() {
                    Some((_, Token::Op(")"))) => Ok(inner),
                    Some((pos, other)) => Err(ExprError::UnexpectedToken {
                        pos,
                        found: other.to_string(),
                    }),
                    None => Err(ExprError::UnexpectedEnd),
                }
            }
            other => Err(ExprError::UnexpectedToken {
                pos,
                found: other.to_string(),
            }),
        }
    }
}

// ── Evaluation ─────────────────────────────────────────────────────

fn eval(expr: &Expr, vars: &BTreeMap<String, Literal>) -> Result<Literal, ExprError> {
    match expr {
        Expr::Lit(lit) => Ok(lit.clone()),
        Expr::Var(name) => vars
            .get(name)
            .cloned()
            .ok_or_else(|| ExprError::UnknownVariable(name.clone())),
        Expr::Not(inner) => Ok(Literal::Bool(!eval(inner, vars)?.truthy())),
        Expr::Neg(inner) => match eval(inner, vars)? {
            Literal::Number(n) => Ok(Literal::Number(-n)),
            other => Err(ExprError::TypeMismatch {
                op: "-",
                left: "nothing",
                right: other.type_name(),
            }),
        },
        Expr::Binary("||", l, r) => {
            Ok(Literal::Bool(eval(l, vars)?.truthy() || eval(r, vars)?.truthy()))
        }
        Expr::Binary("&&", l, r) => {
            Ok(Literal::Bool(eval(l, vars)?.truthy() && eval(r, vars)?.truthy()))
        }
        Expr::Binary(op, l, r) => binary(op, eval(l, vars)?, eval(r, vars)?),
    }
}

fn binary(op: &'static str, left: Literal, right: Literal) -> Result<Literal, ExprError> {
    use Literal::{Bool, Number, Str};
    let mismatch = |l: &Literal, r: &Literal| ExprError::TypeMismatch {
        op,
        left: l.type_name(),
        right: r.type_name(),
    };
    match (op, &left, &right) {
        ("==", _, _) => Ok(Bool(left == right)),
        ("!=", _, _) => Ok(Bool(left != right)),
        ("+", Number(a), Number(b)) => Ok(Number(a + b)),
        ("+", Str(a), Str(b)) => Ok(Str(format!("{a}{b}"))),
        ("-", Number(a), Number(b)) => Ok(Number(a - b)),
        ("*", Number(a), Number(b)) => Ok(Number(a * b)),
        ("/" | "%", Number(_), Number(b)) if *b == 0.0 => Err(ExprError::DivisionByZero),
        ("/", Number(a), Number(b)) => Ok(Number(a / b)),
        ("%", Number(a), Number(b)) => Ok(Number(a % b)),
        ("<", Number(a), Number(b)) => Ok(Bool(a < b)),
        ("<=", Number(a), Number(b)) => Ok(Bool(a <= b)),
        (">", Number(a), Number(b)) => Ok(Bool(a > b)),
        (">=", Number(a), Number(b)) => Ok(Bool(a >= b)),
        ("<", Str(a), Str(b)) => Ok(Bool(a < b)),
        ("<=", Str(a), Str(b)) => Ok(Bool(a <= b)),
        (">", Str(a), Str(b)) => Ok(Bool(a > b)),
        (">=", Str(a), Str(b)) => Ok(Bool(a >= b)),
        _ => Err(mismatch(&left, &right)),
    }
}

/// Parse and evaluate `source` against `variables`.
pub fn evaluate(
    source: &str,
    variables: &BTreeMap<String, Literal>,
) -> Result<Literal, ExprError> {
    if source.len() > MAX_EXPR_LEN {
        return Err(ExprError::TooLong(source.len()));
    }
    let tokens = tokenize(source)?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        depth: 0,
    };
    let expr = parser.or()?;
    if let Some((pos, token)) = parser.advance() {
        return Err(ExprError::UnexpectedToken {
            pos,
            found: token.to_string(),
        });
    }
    eval(&expr, variables)
}
