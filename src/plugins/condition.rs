//! Rule condition language.
//!
//! Conditions are small boolean expressions over a fixed vocabulary:
//!
//! ```text
//! !isHighRisk() || hasApproval("dev")
//! metadata.stability != "stable" || approval.qa.approved
//! ```
//!
//! Sources are parsed once into an [`Expr`] tree and interpreted directly
//! against an [`EvalContext`]. There is no escape hatch into a general
//! evaluator: anything outside the grammar is a parse error.

use crate::plugins::approval::{ApprovalSlot, ApprovalStatus, has_approval};
use crate::plugins::metadata::AiMetadata;
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConditionError {
    #[error("unexpected character '{ch}' at offset {pos}")]
    UnexpectedChar { ch: char, pos: usize },
    #[error("unterminated string starting at offset {0}")]
    UnterminatedString(usize),
    #[error("parse error at offset {pos}: {message}")]
    Parse { pos: usize, message: String },
    #[error("unknown function '{0}'")]
    UnknownFunction(String),
    #[error("function '{name}' expects {expected} argument(s), got {got}")]
    Arity {
        name: String,
        expected: usize,
        got: usize,
    },
    #[error("unknown path '{0}'")]
    UnknownPath(String),
    #[error("type error: {0}")]
    Type(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Bool(bool),
    Str(String),
    Null,
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "{}", b),
            Value::Str(s) => write!(f, "{:?}", s),
            Value::Null => write!(f, "null"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr {
    Literal(Value),
    Path(Vec<String>),
    Call { name: String, args: Vec<Expr> },
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Eq(Box<Expr>, Box<Expr>),
    Ne(Box<Expr>, Box<Expr>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Ident(String),
    Str(String),
    LParen,
    RParen,
    Comma,
    Dot,
    AndAnd,
    OrOr,
    Bang,
    EqEq,
    NotEq,
}

fn tokenize(src: &str) -> Result<Vec<(usize, Token)>, ConditionError> {
    let chars: Vec<(usize, char)> = src.char_indices().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let (pos, c) = chars[i];
        let next = chars.get(i + 1).map(|(_, c)| *c);
        match c {
            c if c.is_whitespace() => i += 1,
            '(' => {
                tokens.push((pos, Token::LParen));
                i += 1;
            }
            ')' => {
                tokens.push((pos, Token::RParen));
                i += 1;
            }
            ',' => {
                tokens.push((pos, Token::Comma));
                i += 1;
            }
            '.' => {
                tokens.push((pos, Token::Dot));
                i += 1;
            }
            '&' if next == Some('&') => {
                tokens.push((pos, Token::AndAnd));
                i += 2;
            }
            '|' if next == Some('|') => {
                tokens.push((pos, Token::OrOr));
                i += 2;
            }
            '=' if next == Some('=') => {
                tokens.push((pos, Token::EqEq));
                i += 2;
                if chars.get(i).map(|(_, c)| *c) == Some('=') {
                    i += 1;
                }
            }
            '!' if next == Some('=') => {
                tokens.push((pos, Token::NotEq));
                i += 2;
                if chars.get(i).map(|(_, c)| *c) == Some('=') {
                    i += 1;
                }
            }
            '!' => {
                tokens.push((pos, Token::Bang));
                i += 1;
            }
            '"' | '\'' => {
                let quote = c;
                let mut value = String::new();
                let mut j = i + 1;
                loop {
                    match chars.get(j) {
                        None => return Err(ConditionError::UnterminatedString(pos)),
                        Some((_, '\\')) => {
                            if let Some((_, escaped)) = chars.get(j + 1) {
                                value.push(*escaped);
                            }
                            j += 2;
                        }
                        Some((_, ch)) if *ch == quote => break,
                        Some((_, ch)) => {
                            value.push(*ch);
                            j += 1;
                        }
                    }
                }
                tokens.push((pos, Token::Str(value)));
                i = j + 1;
            }
            c if c.is_ascii_alphabetic() || c == '_' || c == '$' => {
                let mut j = i;
                let mut ident = String::new();
                while let Some((_, ch)) = chars.get(j) {
                    if ch.is_ascii_alphanumeric() || *ch == '_' || *ch == '$' {
                        ident.push(*ch);
                        j += 1;
                    } else {
                        break;
                    }
                }
                tokens.push((pos, Token::Ident(ident)));
                i = j;
            }
            other => return Err(ConditionError::UnexpectedChar { ch: other, pos }),
        }
    }
    Ok(tokens)
}

struct Parser {
    tokens: Vec<(usize, Token)>,
    pos: usize,
    len: usize,
    depth: usize,
}

/// Deepest expression tree the parser builds; evaluation recurses once per level.
const MAX_DEPTH: usize = 128;

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(_, t)| t)
    }

    fn offset(&self) -> usize {
        self.tokens
            .get(self.pos)
            .map(|(p, _)| *p)
            .unwrap_or(self.len)
    }

    fn error(&self, message: impl Into<String>) -> ConditionError {
        ConditionError::Parse {
            pos: self.offset(),
            message: message.into(),
        }
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.peek() == Some(token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: &Token, what: &str) -> Result<(), ConditionError> {
        if self.eat(token) {
            Ok(())
        } else {
            Err(self.error(format!("expected {}", what)))
        }
    }

    fn enter(&mut self) -> Result<(), ConditionError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(self.error("expression nested too deeply"));
        }
        Ok(())
    }

    fn or(&mut self) -> Result<Expr, ConditionError> {
        let base = self.depth;
        let mut lhs = self.and()?;
        while self.eat(&Token::OrOr) {
            // Each operator adds a level to the left-leaning chain.
            self.enter()?;
            let rhs = self.and()?;
            lhs = Expr::Or(Box::new(lhs), Box::new(rhs));
        }
        self.depth = base;
        Ok(lhs)
    }

    fn and(&mut self) -> Result<Expr, ConditionError> {
        let base = self.depth;
        let mut lhs = self.unary()?;
        while self.eat(&Token::AndAnd) {
            self.enter()?;
            let rhs = self.unary()?;
            lhs = Expr::And(Box::new(lhs), Box::new(rhs));
        }
        self.depth = base;
        Ok(lhs)
    }

    fn unary(&mut self) -> Result<Expr, ConditionError> {
        if self.eat(&Token::Bang) {
            self.enter()?;
            let inner = self.unary()?;
            self.depth -= 1;
            return Ok(Expr::Not(Box::new(inner)));
        }
        self.compare()
    }

    fn compare(&mut self) -> Result<Expr, ConditionError> {
        let lhs = self.primary()?;
        if self.eat(&Token::EqEq) {
            let rhs = self.primary()?;
            return Ok(Expr::Eq(Box::new(lhs), Box::new(rhs)));
        }
        if self.eat(&Token::NotEq) {
            let rhs = self.primary()?;
            return Ok(Expr::Ne(Box::new(lhs), Box::new(rhs)));
        }
        Ok(lhs)
    }

    fn primary(&mut self) -> Result<Expr, ConditionError> {
        let Some(token) = self.peek().cloned() else {
            return Err(self.error("unexpected end of expression"));
        };
        match token {
            Token::LParen => {
                self.pos += 1;
                self.enter()?;
                let inner = self.or()?;
                self.expect(&Token::RParen, "')'")?;
                self.depth -= 1;
                Ok(inner)
            }
            Token::Str(s) => {
                self.pos += 1;
                Ok(Expr::Literal(Value::Str(s)))
            }
            Token::Ident(ident) => {
                self.pos += 1;
                match ident.as_str() {
                    "true" => return Ok(Expr::Literal(Value::Bool(true))),
                    "false" => return Ok(Expr::Literal(Value::Bool(false))),
                    "null" | "undefined" => return Ok(Expr::Literal(Value::Null)),
                    _ => {}
                }
                if self.eat(&Token::LParen) {
                    self.enter()?;
                    let mut args = Vec::new();
                    if !self.eat(&Token::RParen) {
                        loop {
                            args.push(self.or()?);
                            if self.eat(&Token::Comma) {
                                continue;
                            }
                            self.expect(&Token::RParen, "')' or ','")?;
                            break;
                        }
                    }
                    self.depth -= 1;
                    return Ok(Expr::Call { name: ident, args });
                }
                let mut segments = vec![ident];
                while self.eat(&Token::Dot) {
                    match self.peek().cloned() {
                        Some(Token::Ident(seg)) => {
                            self.pos += 1;
                            segments.push(seg);
                        }
                        _ => return Err(self.error("expected identifier after '.'")),
                    }
                }
                Ok(Expr::Path(segments))
            }
            other => Err(self.error(format!("unexpected token {:?}", other))),
        }
    }
}

/// Parse a condition source into an expression tree.
pub fn parse(src: &str) -> Result<Expr, ConditionError> {
    let tokens = tokenize(src)?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        len: src.len(),
        depth: 0,
    };
    let expr = parser.or()?;
    if parser.pos != parser.tokens.len() {
        return Err(parser.error("trailing input"));
    }
    Ok(expr)
}

/// Everything a condition can see.
pub struct EvalContext<'a> {
    pub metadata: &'a AiMetadata,
    pub approval: Option<&'a ApprovalStatus>,
    pub file_path: &'a str,
}

fn opt_str(v: Option<&str>) -> Value {
    v.map(|s| Value::Str(s.to_string())).unwrap_or(Value::Null)
}

impl EvalContext<'_> {
    fn call(&self, name: &str, args: &[Expr]) -> Result<Value, ConditionError> {
        let arity = |expected: usize| {
            if args.len() == expected {
                Ok(())
            } else {
                Err(ConditionError::Arity {
                    name: name.to_string(),
                    expected,
                    got: args.len(),
                })
            }
        };
        match name {
            "hasApproval" => {
                arity(1)?;
                let slot = match args[0].eval(self)? {
                    Value::Str(s) => s
                        .parse::<ApprovalSlot>()
                        .map_err(|e| ConditionError::Type(e.to_string()))?,
                    other => {
                        return Err(ConditionError::Type(format!(
                            "hasApproval expects a slot name, got {}",
                            other
                        )));
                    }
                };
                Ok(Value::Bool(has_approval(self.approval, slot)))
            }
            "isHighRisk" => {
                arity(0)?;
                Ok(Value::Bool(self.metadata.is_high_risk()))
            }
            "isReadOnly" => {
                arity(0)?;
                Ok(Value::Bool(self.metadata.is_read_only()))
            }
            "isDeprecated" => {
                arity(0)?;
                Ok(Value::Bool(self.metadata.is_deprecated()))
            }
            other => Err(ConditionError::UnknownFunction(other.to_string())),
        }
    }

    fn resolve(&self, path: &[String]) -> Result<Value, ConditionError> {
        let segs: Vec<&str> = path.iter().map(|s| s.as_str()).collect();
        let m = self.metadata;
        let value = match segs.as_slice() {
            ["filePath"] => Value::Str(self.file_path.to_string()),
            ["metadata", "stability"] => opt_str(m.stability.map(|v| v.as_str())),
            ["metadata", "editPermissions"] => opt_str(m.edit_permissions.map(|v| v.as_str())),
            ["metadata", "breakingChangesRisk"] => {
                opt_str(m.breaking_changes_risk.map(|v| v.as_str()))
            }
            ["metadata", "reviewRequired"] => Value::Bool(m.review_required),
            ["metadata", "aiContext"] => opt_str(m.ai_context.as_deref()),
            ["metadata", "lastModified"] => opt_str(m.last_modified.as_deref()),
            ["metadata", "methodPermissions", method] => opt_str(
                m.method_permissions
                    .as_ref()
                    .and_then(|p| p.get(*method))
                    .map(|v| v.as_str()),
            ),
            ["approval", slot, field] => {
                let slot = slot
                    .parse::<ApprovalSlot>()
                    .map_err(|_| ConditionError::UnknownPath(path.join(".")))?;
                let entry = self.approval.map(|a| a.slot(slot));
                match *field {
                    "approved" => Value::Bool(entry.is_some_and(|e| e.approved)),
                    "approvedBy" => opt_str(entry.and_then(|e| e.approved_by.as_deref())),
                    "approvedDate" => opt_str(entry.and_then(|e| e.approved_date.as_deref())),
                    _ => return Err(ConditionError::UnknownPath(path.join("."))),
                }
            }
            _ => return Err(ConditionError::UnknownPath(path.join("."))),
        };
        Ok(value)
    }
}

fn as_bool(v: Value, op: &str) -> Result<bool, ConditionError> {
    match v {
        Value::Bool(b) => Ok(b),
        other => Err(ConditionError::Type(format!(
            "operand of '{}' must be boolean, got {}",
            op, other
        ))),
    }
}

impl Expr {
    pub fn eval(&self, ctx: &EvalContext<'_>) -> Result<Value, ConditionError> {
        match self {
            Expr::Literal(v) => Ok(v.clone()),
            Expr::Path(p) => ctx.resolve(p),
            Expr::Call { name, args } => ctx.call(name, args),
            Expr::Not(e) => Ok(Value::Bool(!as_bool(e.eval(ctx)?, "!")?)),
            Expr::And(a, b) => {
                if !as_bool(a.eval(ctx)?, "&&")? {
                    return Ok(Value::Bool(false));
                }
                Ok(Value::Bool(as_bool(b.eval(ctx)?, "&&")?))
            }
            Expr::Or(a, b) => {
                if as_bool(a.eval(ctx)?, "||")? {
                    return Ok(Value::Bool(true));
                }
                Ok(Value::Bool(as_bool(b.eval(ctx)?, "||")?))
            }
            Expr::Eq(a, b) => Ok(Value::Bool(a.eval(ctx)? == b.eval(ctx)?)),
            Expr::Ne(a, b) => Ok(Value::Bool(a.eval(ctx)? != b.eval(ctx)?)),
        }
    }

    /// Evaluate as a rule condition; non-boolean results are errors.
    pub fn eval_bool(&self, ctx: &EvalContext<'_>) -> Result<bool, ConditionError> {
        match self.eval(ctx)? {
            Value::Bool(b) => Ok(b),
            other => Err(ConditionError::Type(format!(
                "condition must evaluate to a boolean, got {}",
                other
            ))),
        }
    }
}
