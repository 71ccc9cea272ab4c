//! Condition evaluators.
//!
//! A condition evaluates against the cycle's current-values map and the
//! temporal buffers; dispatch is an exhaustive match on the condition tag.
//! Evaluation never blocks on I/O and never fails a cycle: a missing key, a
//! malformed expression or a NaN result reads as condition-false, logged
//! through the shared throttle so a permanently absent sensor does not
//! flood the logs.

use crate::ast::{CompareOp, Condition, ConditionGroup, ConditionNode};
use crate::expr::{self, ExprCache, EQ_EPSILON};
use crate::store::LogThrottle;
use crate::temporal::TemporalBuffers;
use std::collections::HashMap;
use tracing::warn;

/// Everything a condition needs to evaluate. Shared read-only across the
/// rules of a group; cheap to construct per layer.
pub struct EvalContext<'a> {
    pub current: &'a HashMap<String, f64>,
    pub temporal: &'a TemporalBuffers,
    pub exprs: &'a ExprCache,
    pub now_us: i64,
    pub throttle: &'a LogThrottle,
}

/// Comparison with the engine-wide float semantics: equality within an
/// absolute epsilon of 1e-4, inequality as its negation, orderings false on
/// NaN.
pub fn compare(op: CompareOp, lhs: f64, rhs: f64) -> bool {
    match op {
        CompareOp::Gt => lhs > rhs,
        CompareOp::Lt => lhs < rhs,
        CompareOp::Ge => lhs >= rhs,
        CompareOp::Le => lhs <= rhs,
        CompareOp::Eq => (lhs - rhs).abs() <= EQ_EPSILON,
        CompareOp::Ne => {
            if lhs.is_nan() || rhs.is_nan() {
                false
            } else {
                (lhs - rhs).abs() > EQ_EPSILON
            }
        }
    }
}

/// Evaluate a rule's condition tree.
///
/// `all` children are AND-ed, `any` children OR-ed; a group with both is
/// the conjunction of the two. An entirely empty group is false.
pub fn eval_group(rule: &str, group: &ConditionGroup, ctx: &EvalContext<'_>) -> bool {
    if group.is_empty() {
        return false;
    }

    let all_ok = group.all.iter().all(|node| eval_node(rule, node, ctx));
    if !all_ok {
        return false;
    }

    if group.any.is_empty() {
        true
    } else {
        group.any.iter().any(|node| eval_node(rule, node, ctx))
    }
}

fn eval_node(rule: &str, node: &ConditionNode, ctx: &EvalContext<'_>) -> bool {
    match node {
        ConditionNode::Leaf(leaf) => eval_condition(rule, &leaf.condition, ctx),
        ConditionNode::Group(group) => eval_group(rule, group, ctx),
    }
}

fn eval_condition(rule: &str, condition: &Condition, ctx: &EvalContext<'_>) -> bool {
    match condition {
        Condition::Comparison(c) => match ctx.current.get(&c.source) {
            Some(&value) => compare(c.operator, value, c.value),
            None => {
                if ctx.throttle.should_log(&format!("missing-key:{}", c.source)) {
                    warn!(rule, sensor = %c.source, "comparison source missing; condition false");
                }
                false
            }
        },
        Condition::Expression(e) => eval_expression(rule, &e.expression, ctx)
            .map(|v| !v.is_nan() && v != 0.0)
            .unwrap_or(false),
        Condition::ThresholdOverTime(t) => {
            let duration_us = t.duration_ms.saturating_mul(1000);
            let window = ctx.temporal.window(&t.source, duration_us, ctx.now_us);

            // No samples yet: nothing to sustain.
            let Some(oldest) = window.first() else {
                return false;
            };

            // The window must actually be covered by data: the oldest
            // retained sample has to sit within one sampling period of the
            // window start, otherwise sampling began mid-window and "held
            // for the whole window" cannot be claimed yet.
            let window_start = ctx.now_us - duration_us;
            if oldest.timestamp > window_start + ctx.temporal.sampling_period_us() {
                return false;
            }

            window
                .iter()
                .all(|sample| compare(t.operator, sample.value, t.threshold))
        }
    }
}

/// Evaluate an expression to a number, or `None` on any runtime problem
/// (unknown identifier, uncompilable source). Problems are logged through
/// the throttle, keyed per rule and identifier.
pub fn eval_expression(rule: &str, source: &str, ctx: &EvalContext<'_>) -> Option<f64> {
    let compiled = match ctx.exprs.get_or_compile(source) {
        Ok(expr) => expr,
        Err(e) => {
            // Validated documents cannot hit this; artifacts edited by hand can.
            if ctx.throttle.should_log(&format!("bad-expr:{rule}")) {
                warn!(rule, error = %e, "expression failed to compile; condition false");
            }
            return None;
        }
    };

    match expr::eval(&compiled, &|name| ctx.current.get(name).copied()) {
        Ok(value) => Some(value),
        Err(expr::EvalError::MissingIdentifier(name)) => {
            if ctx.throttle.should_log(&format!("missing-ident:{name}")) {
                warn!(rule, identifier = %name, "expression identifier missing; condition false");
            }
            None
        }
    }
}
