//! Arithmetic expressions for the `calc` step.
//!
//! Grammar, lowest precedence first:
//!
//! ```text
//! add_sub := mul_div (('+' | '-') mul_div)*
//! mul_div := factor (('*' | '/' | '%') factor)*
//! factor  := ('+' | '-') factor | number | ident | call | '(' add_sub ')'
//! call    := ('max' | 'min' | 'clamp') '(' add_sub (',' add_sub)* ')'
//! ```
//!
//! Sources compile once into an [`Expr`] tree; evaluation resolves
//! identifiers lazily through a [`VarResolver`]. Error `Display` strings are
//! stable codes (`DIV_ZERO`, `UNKNOWN_VAR:x`, ...) surfaced in step records.

use serde_json::{Map, Value};

use super::context::Context;
use super::value::to_number;

/// Longest accepted source, in characters.
pub const MAX_SOURCE_LEN: usize = 1024;

/// Deepest accepted nesting of parentheses, signs and calls.
pub const MAX_NESTING: usize = 256;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExpressionError {
    #[error("BAD_NUM")]
    BadNumber(String),

    #[error("BAD_CHAR")]
    BadChar(char),

    #[error("UNEXPECTED_EOF")]
    UnexpectedEof,

    #[error("MISSING_RPAREN")]
    MissingRParen,

    #[error("ARITY")]
    Arity {
        function: &'static str,
        expected: usize,
        got: usize,
    },

    #[error("BAD_FUNC")]
    BadFunction(String),

    #[error("BAD_VAR")]
    BadVariable(String),

    #[error("BAD_FACTOR")]
    BadFactor,

    #[error("TRAILING_INPUT")]
    TrailingInput,

    #[error("TOO_LONG")]
    TooLong { len: usize, max: usize },

    #[error("TOO_DEEP")]
    TooDeep,

    #[error("DIV_ZERO")]
    DivisionByZero,

    #[error("UNKNOWN_VAR:{0}")]
    UnknownVariable(String),

    #[error("NaN:{0}")]
    NotANumber(String),
}

// ---------------------------------------------------------------------------
// Tokens
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Ident(String),
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    LParen,
    RParen,
    Comma,
}

fn tokenize(source: &str) -> Result<Vec<Token>, ExpressionError> {
    let chars: Vec<char> = source.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        if c.is_ascii_digit() || c == '.' {
            let start = i;
            while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                i += 1;
            }
            let text: String = chars[start..i].iter().collect();
            if text.matches('.').count() > 1 {
                return Err(ExpressionError::BadNumber(text));
            }
            let n = text
                .parse::<f64>()
                .map_err(|_| ExpressionError::BadNumber(text.clone()))?;
            tokens.push(Token::Number(n));
            continue;
        }
        if c.is_ascii_alphabetic() || c == '_' {
            let start = i;
            i += 1;
            while i < chars.len()
                && (chars[i].is_ascii_alphanumeric() || chars[i] == '_' || chars[i] == '.')
            {
                i += 1;
            }
            tokens.push(Token::Ident(chars[start..i].iter().collect()));
            continue;
        }
        let token = match c {
            '+' => Token::Plus,
            '-' => Token::Minus,
            '*' => Token::Star,
            '/' => Token::Slash,
            '%' => Token::Percent,
            '(' => Token::LParen,
            ')' => Token::RParen,
            ',' => Token::Comma,
            other => return Err(ExpressionError::BadChar(other)),
        };
        tokens.push(token);
        i += 1;
    }

    Ok(tokens)
}

/// `ident(.segment)*` where the head starts with a letter or underscore.
pub fn is_path_like(text: &str) -> bool {
    let mut segments = text.split('.');
    let head_ok = segments.next().is_some_and(|head| {
        let mut chars = head.chars();
        chars
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
            && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
    });
    head_ok
        && segments.all(|seg| {
            !seg.is_empty() && seg.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        })
}

// ---------------------------------------------------------------------------
// AST
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    Max,
    Min,
    Clamp,
}

impl Builtin {
    fn lookup(name: &str) -> Option<Self> {
        match name {
            "max" => Some(Builtin::Max),
            "min" => Some(Builtin::Min),
            "clamp" => Some(Builtin::Clamp),
            _ => None,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Builtin::Max => "max",
            Builtin::Min => "min",
            Builtin::Clamp => "clamp",
        }
    }

    fn arity(self) -> usize {
        match self {
            Builtin::Max | Builtin::Min => 2,
            Builtin::Clamp => 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    Var(String),
    Neg(Box<Expr>),
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Call {
        func: Builtin,
        args: Vec<Expr>,
    },
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.peek() == Some(token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn add_sub(&mut self) -> Result<Expr, ExpressionError> {
        let mut lhs = self.mul_div()?;
        loop {
            let op = if self.eat(&Token::Plus) {
                BinaryOp::Add
            } else if self.eat(&Token::Minus) {
                BinaryOp::Sub
            } else {
                break;
            };
            let rhs = self.mul_div()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn mul_div(&mut self) -> Result<Expr, ExpressionError> {
        let mut lhs = self.factor()?;
        loop {
            let op = if self.eat(&Token::Star) {
                BinaryOp::Mul
            } else if self.eat(&Token::Slash) {
                BinaryOp::Div
            } else if self.eat(&Token::Percent) {
                BinaryOp::Rem
            } else {
                break;
            };
            let rhs = self.factor()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn factor(&mut self) -> Result<Expr, ExpressionError> {
        if self.depth >= MAX_NESTING {
            return Err(ExpressionError::TooDeep);
        }
        self.depth += 1;
        let parsed = self.factor_inner();
        self.depth -= 1;
        parsed
    }

    fn factor_inner(&mut self) -> Result<Expr, ExpressionError> {
        if self.eat(&Token::Plus) {
            return self.factor();
        }
        if self.eat(&Token::Minus) {
            return Ok(Expr::Neg(Box::new(self.factor()?)));
        }
        let token = self.peek().cloned().ok_or(ExpressionError::UnexpectedEof)?;
        match token {
            Token::Number(n) => {
                self.pos += 1;
                Ok(Expr::Number(n))
            }
            Token::Ident(name) => {
                self.pos += 1;
                if self.eat(&Token::LParen) {
                    return self.call(name);
                }
                if !is_path_like(&name) {
                    return Err(ExpressionError::BadVariable(name));
                }
                Ok(Expr::Var(name))
            }
            Token::LParen => {
                self.pos += 1;
                let inner = self.add_sub()?;
                if !self.eat(&Token::RParen) {
                    return Err(ExpressionError::MissingRParen);
                }
                Ok(inner)
            }
            _ => Err(ExpressionError::BadFactor),
        }
    }

    fn call(&mut self, name: String) -> Result<Expr, ExpressionError> {
        let mut args = Vec::new();
        if !self.eat(&Token::RParen) {
            loop {
                args.push(self.add_sub()?);
                if !self.eat(&Token::Comma) {
                    break;
                }
            }
            if !self.eat(&Token::RParen) {
                return Err(ExpressionError::MissingRParen);
            }
        }
        let func = Builtin::lookup(&name).ok_or(ExpressionError::BadFunction(name))?;
        if args.len() != func.arity() {
            return Err(ExpressionError::Arity {
                function: func.name(),
                expected: func.arity(),
                got: args.len(),
            });
        }
        Ok(Expr::Call { func, args })
    }
}

// ---------------------------------------------------------------------------
// Compiled expression
// ---------------------------------------------------------------------------

/// A parsed expression, reusable across evaluations.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledExpr {
    source: String,
    root: Expr,
}

impl CompiledExpr {
    /// Tokenize and parse `source`. The whole input must be consumed.
    ///
    /// Sources longer than [`MAX_SOURCE_LEN`] or nested deeper than
    /// [`MAX_NESTING`] are rejected, which bounds the recursion of both
    /// parsing and evaluation.
    pub fn compile(source: &str) -> Result<Self, ExpressionError> {
        let len = source.chars().count();
        if len > MAX_SOURCE_LEN {
            return Err(ExpressionError::TooLong {
                len,
                max: MAX_SOURCE_LEN,
            });
        }
        let tokens = tokenize(source)?;
        let mut parser = Parser {
            tokens,
            pos: 0,
            depth: 0,
        };
        let root = parser.add_sub()?;
        if parser.pos != parser.tokens.len() {
            return Err(ExpressionError::TrailingInput);
        }
        Ok(Self {
            source: source.to_string(),
            root,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn evaluate(&self, vars: &VarResolver<'_>) -> Result<f64, ExpressionError> {
        eval(&self.root, vars)
    }
}

fn eval(expr: &Expr, vars: &VarResolver<'_>) -> Result<f64, ExpressionError> {
    match expr {
        Expr::Number(n) => Ok(*n),
        Expr::Var(name) => vars.resolve(name),
        Expr::Neg(inner) => Ok(-eval(inner, vars)?),
        Expr::Binary { op, lhs, rhs } => {
            let l = eval(lhs, vars)?;
            let r = eval(rhs, vars)?;
            match op {
                BinaryOp::Add => Ok(l + r),
                BinaryOp::Sub => Ok(l - r),
                BinaryOp::Mul => Ok(l * r),
                BinaryOp::Div | BinaryOp::Rem if r == 0.0 => Err(ExpressionError::DivisionByZero),
                BinaryOp::Div => Ok(l / r),
                BinaryOp::Rem => Ok(l % r),
            }
        }
        Expr::Call { func, args } => {
            let name = func.name();
            let mut values = Vec::with_capacity(args.len());
            for arg in args {
                values.push(finite(eval(arg, vars)?, name)?);
            }
            Ok(match (func, values.as_slice()) {
                (Builtin::Max, [a, b]) => a.max(*b),
                (Builtin::Min, [a, b]) => a.min(*b),
                (Builtin::Clamp, [v, lo, hi]) => lo.max(hi.min(*v)),
                _ => {
                    return Err(ExpressionError::Arity {
                        function: name,
                        expected: func.arity(),
                        got: values.len(),
                    });
                }
            })
        }
    }
}

fn finite(n: f64, name: &str) -> Result<f64, ExpressionError> {
    if n.is_finite() {
        Ok(n)
    } else {
        Err(ExpressionError::NotANumber(name.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Variable resolution
// ---------------------------------------------------------------------------

/// Resolves identifiers: the explicit `vars` map first, then the context.
///
/// A `vars` entry whose value is a path-like string is a redirect into the
/// context; any other value is coerced to a number.
pub struct VarResolver<'a> {
    ctx: &'a Context,
    vars: Option<&'a Map<String, Value>>,
}

impl<'a> VarResolver<'a> {
    pub fn new(ctx: &'a Context, vars: Option<&'a Map<String, Value>>) -> Self {
        Self { ctx, vars }
    }

    pub fn resolve(&self, name: &str) -> Result<f64, ExpressionError> {
        let found = match self.vars.and_then(|vars| vars.get(name)) {
            Some(Value::String(path)) if is_path_like(path) => self.ctx.get(path),
            Some(other) => Some(other),
            None => self.ctx.get(name),
        };
        let value = found.ok_or_else(|| ExpressionError::UnknownVariable(name.to_string()))?;
        finite(to_number(Some(value)), name)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
