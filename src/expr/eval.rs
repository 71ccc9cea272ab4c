//! Expression interpreter.
//!
//! Evaluation follows IEEE-754: division by zero yields ±inf or NaN and is
//! not an error here; callers treat NaN results as condition-false.
//! The only evaluation error is a missing identifier binding.

use super::{BinaryOp, Expr, Func, UnaryOp, EQ_EPSILON};
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum EvalError {
    #[error("unknown identifier '{0}'")]
    MissingIdentifier(String),
}

fn truthy(v: f64) -> bool {
    !v.is_nan() && v != 0.0
}

fn bool_num(b: bool) -> f64 {
    if b {
        1.0
    } else {
        0.0
    }
}

/// Evaluate an expression against an identifier lookup.
///
/// Boolean results are 0.0/1.0. Ordering comparisons on NaN are false.
pub fn eval(expr: &Expr, lookup: &dyn Fn(&str) -> Option<f64>) -> Result<f64, EvalError> {
    match expr {
        Expr::Number(n) => Ok(*n),
        Expr::Ident(name) => {
            lookup(name).ok_or_else(|| EvalError::MissingIdentifier(name.clone()))
        }
        Expr::Unary { op, operand } => {
            let v = eval(operand, lookup)?;
            Ok(match op {
                UnaryOp::Neg => -v,
                UnaryOp::Not => bool_num(!truthy(v)),
            })
        }
        Expr::Binary { op, lhs, rhs } => {
            // Short-circuit the boolean operators.
            match op {
                BinaryOp::And => {
                    let l = eval(lhs, lookup)?;
                    if !truthy(l) {
                        return Ok(0.0);
                    }
                    let r = eval(rhs, lookup)?;
                    return Ok(bool_num(truthy(r)));
                }
                BinaryOp::Or => {
                    let l = eval(lhs, lookup)?;
                    if truthy(l) {
                        return Ok(1.0);
                    }
                    let r = eval(rhs, lookup)?;
                    return Ok(bool_num(truthy(r)));
                }
                _ => {}
            }
            let l = eval(lhs, lookup)?;
            let r = eval(rhs, lookup)?;
            Ok(match op {
                BinaryOp::Add => l + r,
                BinaryOp::Sub => l - r,
                BinaryOp::Mul => l * r,
                BinaryOp::Div => l / r,
                BinaryOp::Gt => bool_num(l > r),
                BinaryOp::Lt => bool_num(l < r),
                BinaryOp::Ge => bool_num(l >= r),
                BinaryOp::Le => bool_num(l <= r),
                BinaryOp::Eq => bool_num((l - r).abs() <= EQ_EPSILON),
                BinaryOp::Ne => bool_num(!((l - r).abs() <= EQ_EPSILON)),
                BinaryOp::And | BinaryOp::Or => unreachable!("handled above"),
            })
        }
        Expr::Call { func, args } => {
            let a = eval(&args[0], lookup)?;
            Ok(match func {
                Func::Abs => a.abs(),
                Func::Round => a.round(),
                Func::Floor => a.floor(),
                Func::Ceiling => a.ceil(),
                Func::Sqrt => a.sqrt(),
                Func::Min => a.min(eval(&args[1], lookup)?),
                Func::Max => a.max(eval(&args[1], lookup)?),
                Func::Pow => a.powf(eval(&args[1], lookup)?),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::parse;
    use std::collections::HashMap;

    fn eval_with(src: &str, vars: &[(&str, f64)]) -> Result<f64, EvalError> {
        let map: HashMap<String, f64> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), *v))
            .collect();
        let expr = parse(src).unwrap();
        eval(&expr, &|name| map.get(name).copied())
    }

    #[test]
    fn arithmetic() {
        assert_eq!(eval_with("1 + 2 * 3", &[]).unwrap(), 7.0);
        assert_eq!(eval_with("(1 + 2) * 3", &[]).unwrap(), 9.0);
        assert_eq!(eval_with("-2 * 3", &[]).unwrap(), -6.0);
    }

    #[test]
    fn identifier_binding() {
        assert_eq!(
            eval_with("input:t * 1.8 + 32", &[("input:t", 100.0)]).unwrap(),
            212.0
        );
        assert_eq!(
            eval_with("a + 1", &[]),
            Err(EvalError::MissingIdentifier("a".into()))
        );
    }

    #[test]
    fn functions() {
        assert_eq!(eval_with("abs(-3)", &[]).unwrap(), 3.0);
        assert_eq!(eval_with("round(2.5)", &[]).unwrap(), 3.0);
        assert_eq!(eval_with("floor(2.9)", &[]).unwrap(), 2.0);
        assert_eq!(eval_with("ceiling(2.1)", &[]).unwrap(), 3.0);
        assert_eq!(eval_with("min(2, 5)", &[]).unwrap(), 2.0);
        assert_eq!(eval_with("max(2, 5)", &[]).unwrap(), 5.0);
        assert_eq!(eval_with("pow(2, 10)", &[]).unwrap(), 1024.0);
        assert_eq!(eval_with("sqrt(81)", &[]).unwrap(), 9.0);
    }

    #[test]
    fn equality_uses_epsilon() {
        assert_eq!(eval_with("0.1 + 0.2 == 0.3", &[]).unwrap(), 1.0);
        assert_eq!(eval_with("1.0 == 1.001", &[]).unwrap(), 0.0);
        assert_eq!(eval_with("1.0 != 1.001", &[]).unwrap(), 1.0);
    }

    #[test]
    fn boolean_logic_and_truthiness() {
        assert_eq!(eval_with("1 && 2", &[]).unwrap(), 1.0);
        assert_eq!(eval_with("1 && 0", &[]).unwrap(), 0.0);
        assert_eq!(eval_with("0 || 3", &[]).unwrap(), 1.0);
        assert_eq!(eval_with("!0", &[]).unwrap(), 1.0);
        assert_eq!(eval_with("not 5", &[]).unwrap(), 0.0);
    }

    #[test]
    fn short_circuit_skips_missing_identifiers() {
        // `missing` is never looked up when the left side decides.
        assert_eq!(eval_with("0 && missing", &[]).unwrap(), 0.0);
        assert_eq!(eval_with("1 || missing", &[]).unwrap(), 1.0);
    }

    #[test]
    fn division_by_zero_is_ieee() {
        assert!(eval_with("1 / 0", &[]).unwrap().is_infinite());
        assert!(eval_with("0 / 0", &[]).unwrap().is_nan());
    }

    #[test]
    fn nan_ordering_is_false() {
        assert_eq!(eval_with("0 / 0 > 1", &[]).unwrap(), 0.0);
        assert_eq!(eval_with("0 / 0 < 1", &[]).unwrap(), 0.0);
    }
}
