//! Gate conditions of the form `${path} OP literal`.
//!
//! `OP` is one of `===`, `!==`, `>=`, `<=`, `>`, `<`. Equality operators
//! compare strictly; ordering operators coerce both sides to numbers and
//! are false when either side is NaN.

use std::fmt;
use std::str::FromStr;

use serde_json::Value;

use super::context::Context;
use super::value::{parse_literal, strict_equals, to_number};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PredicateError {
    #[error("condition must look like '${{path}} OP literal': {0}")]
    Malformed(String),

    #[error("unknown comparison operator: '{0}'")]
    UnknownOperator(String),
}

// ---------------------------------------------------------------------------
// CompareOp
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    StrictEq,
    StrictNe,
    Ge,
    Le,
    Gt,
    Lt,
}

impl CompareOp {
    /// Longest first, so `>=` is not read as `>`.
    const TOKENS: [(&'static str, CompareOp); 6] = [
        ("===", CompareOp::StrictEq),
        ("!==", CompareOp::StrictNe),
        (">=", CompareOp::Ge),
        ("<=", CompareOp::Le),
        (">", CompareOp::Gt),
        ("<", CompareOp::Lt),
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CompareOp::StrictEq => "===",
            CompareOp::StrictNe => "!==",
            CompareOp::Ge => ">=",
            CompareOp::Le => "<=",
            CompareOp::Gt => ">",
            CompareOp::Lt => "<",
        }
    }

    /// Compare a context value (possibly absent) with a literal.
    pub fn apply(&self, left: Option<&Value>, right: &Value) -> bool {
        match self {
            CompareOp::StrictEq => strict_equals(left, right),
            CompareOp::StrictNe => !strict_equals(left, right),
            ordering => {
                let l = to_number(left);
                let r = to_number(Some(right));
                match ordering {
                    CompareOp::Ge => l >= r,
                    CompareOp::Le => l <= r,
                    CompareOp::Gt => l > r,
                    _ => l < r,
                }
            }
        }
    }
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CompareOp {
    type Err = PredicateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::TOKENS
            .iter()
            .find(|(token, _)| *token == s)
            .map(|(_, op)| *op)
            .ok_or_else(|| PredicateError::UnknownOperator(s.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Predicate
// ---------------------------------------------------------------------------

/// A compiled `${path} OP literal` condition.
#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    path: String,
    op: CompareOp,
    literal: Value,
}

impl Predicate {
    pub fn compile(condition: &str) -> Result<Self, PredicateError> {
        let malformed = || PredicateError::Malformed(condition.to_string());

        let rest = condition.trim().strip_prefix("${").ok_or_else(malformed)?;
        let (path, rest) = rest.split_once('}').ok_or_else(malformed)?;
        let path = path.trim();
        if path.is_empty() {
            return Err(malformed());
        }

        let rest = rest.trim_start();
        let (op, literal) = CompareOp::TOKENS
            .iter()
            .find_map(|(token, op)| rest.strip_prefix(*token).map(|lit| (*op, lit)))
            .ok_or_else(malformed)?;
        if literal.trim().is_empty() {
            return Err(malformed());
        }

        Ok(Self {
            path: path.to_string(),
            op,
            literal: parse_literal(literal),
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn op(&self) -> CompareOp {
        self.op
    }

    pub fn literal(&self) -> &Value {
        &self.literal
    }

    pub fn evaluate(&self, ctx: &Context) -> bool {
        self.op.apply(ctx.get(&self.path), &self.literal)
    }
}
