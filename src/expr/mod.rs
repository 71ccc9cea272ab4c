//! # Expression Engine
//!
//! Small arithmetic/boolean expression language used by expression
//! conditions and `value_expression` actions. Identifiers resolve to current
//! sensor values, so `input:temperature * 1.8 + 32` is a valid expression.
//!
//! The pipeline is tokenizer → recursive-descent parser → AST interpreter.
//! Expressions are compiled once and cached ([`ExprCache`]); evaluation is
//! CPU-only and never blocks on I/O.
//!
//! Supported surface:
//! - arithmetic: `+ - * /`, unary minus
//! - comparison: `> < >= <= == !=` (equality uses the engine-wide epsilon)
//! - boolean: `&&`/`and`, `||`/`or`, `!`/`not`
//! - functions: `abs, round, floor, ceiling, min, max, pow, sqrt`
//!
//! Booleans are represented as 0.0/1.0; any non-zero, non-NaN value is
//! truthy.

mod eval;
mod lexer;
mod parser;

pub use eval::{eval, EvalError};
pub use lexer::{tokenize, Token};
pub use parser::parse;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use thiserror::Error;

/// Absolute epsilon for float equality, engine-wide.
pub const EQ_EPSILON: f64 = 1e-4;

/// Expression parse failure with source position.
#[derive(Debug, Clone, Error, PartialEq)]
#[error("{message} (at offset {position})")]
pub struct ExprParseError {
    pub message: String,
    pub position: usize,
}

impl ExprParseError {
    pub(crate) fn new(message: impl Into<String>, position: usize) -> Self {
        ExprParseError {
            message: message.into(),
            position,
        }
    }
}

/// Binary operators in precedence order (see [`parser`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Gt,
    Lt,
    Ge,
    Le,
    Eq,
    Ne,
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnaryOp {
    Neg,
    Not,
}

/// Built-in functions. Closed set; unknown names are parse errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Func {
    Abs,
    Round,
    Floor,
    Ceiling,
    Min,
    Max,
    Pow,
    Sqrt,
}

impl Func {
    pub fn name(&self) -> &'static str {
        match self {
            Func::Abs => "abs",
            Func::Round => "round",
            Func::Floor => "floor",
            Func::Ceiling => "ceiling",
            Func::Min => "min",
            Func::Max => "max",
            Func::Pow => "pow",
            Func::Sqrt => "sqrt",
        }
    }

    pub fn from_name(name: &str) -> Option<Func> {
        match name {
            "abs" => Some(Func::Abs),
            "round" => Some(Func::Round),
            "floor" => Some(Func::Floor),
            "ceiling" => Some(Func::Ceiling),
            "min" => Some(Func::Min),
            "max" => Some(Func::Max),
            "pow" => Some(Func::Pow),
            "sqrt" => Some(Func::Sqrt),
            _ => None,
        }
    }

    /// Required argument count.
    pub fn arity(&self) -> usize {
        match self {
            Func::Min | Func::Max | Func::Pow => 2,
            _ => 1,
        }
    }
}

/// Compiled expression tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    Number(f64),
    Ident(String),
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Call {
        func: Func,
        args: Vec<Expr>,
    },
}

impl Expr {
    /// All identifiers referenced by the expression, sorted and deduplicated.
    pub fn identifiers(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        self.collect_identifiers(&mut out);
        out
    }

    fn collect_identifiers(&self, out: &mut BTreeSet<String>) {
        match self {
            Expr::Number(_) => {}
            Expr::Ident(name) => {
                out.insert(name.clone());
            }
            Expr::Unary { operand, .. } => operand.collect_identifiers(out),
            Expr::Binary { lhs, rhs, .. } => {
                lhs.collect_identifiers(out);
                rhs.collect_identifiers(out);
            }
            Expr::Call { args, .. } => {
                for arg in args {
                    arg.collect_identifiers(out);
                }
            }
        }
    }
}

/// Concurrent compile-once cache keyed by source text.
///
/// `get_or_compile` holds a per-shard entry lock while compiling so a given
/// source string is compiled at most once even under concurrent first use.
#[derive(Debug, Default)]
pub struct ExprCache {
    compiled: DashMap<String, Arc<Expr>>,
}

impl ExprCache {
    pub fn new() -> Self {
        ExprCache {
            compiled: DashMap::new(),
        }
    }

    pub fn get_or_compile(&self, source: &str) -> Result<Arc<Expr>, ExprParseError> {
        if let Some(found) = self.compiled.get(source) {
            return Ok(Arc::clone(&found));
        }
        match self.compiled.entry(source.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(e) => Ok(Arc::clone(e.get())),
            dashmap::mapref::entry::Entry::Vacant(e) => {
                let expr = Arc::new(parse(source)?);
                e.insert(Arc::clone(&expr));
                Ok(expr)
            }
        }
    }

    pub fn len(&self) -> usize {
        self.compiled.len()
    }

    pub fn is_empty(&self) -> bool {
        self.compiled.is_empty()
    }
}

/// Parse and extract identifiers in one step, without caching.
pub fn identifiers(source: &str) -> Result<BTreeSet<String>, ExprParseError> {
    Ok(parse(source)?.identifiers())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifier_extraction() {
        let ids = identifiers("input:temperature * 1.8 + min(input:a, input:b)").unwrap();
        let expected: Vec<&str> = vec!["input:a", "input:b", "input:temperature"];
        assert_eq!(ids.into_iter().collect::<Vec<_>>(), expected);
    }

    #[test]
    fn cache_compiles_once() {
        let cache = ExprCache::new();
        let a = cache.get_or_compile("1 + 2").unwrap();
        let b = cache.get_or_compile("1 + 2").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn cache_propagates_parse_errors() {
        let cache = ExprCache::new();
        assert!(cache.get_or_compile("1 +").is_err());
        assert!(cache.is_empty());
    }
}
