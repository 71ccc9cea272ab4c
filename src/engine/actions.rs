//! Action executor.
//!
//! Fired rules contribute writes and messages to a per-cycle pending state;
//! nothing touches the store until the cycle's flush. Within a cycle the
//! last writer of a key wins, in group order then action order, and the
//! flush persists every write with a shared timestamp in one atomic batch.
//! Messages go out after the writes.
//!
//! A failed flush discards the cycle's pending state without retry: the
//! next cycle re-derives everything from fresh inputs.

use crate::ast::Action;
use crate::emit::CompiledRule;
use crate::engine::eval::{self, EvalContext};
use crate::store::{Store, StoreResult, WriteValue};
use tracing::warn;

/// What one fired rule wants done. Collected during parallel evaluation,
/// applied to the pending state in declaration order.
#[derive(Debug, Clone, Default)]
pub struct RuleOutcome {
    pub fired: bool,
    pub writes: Vec<(String, WriteValue)>,
    pub messages: Vec<(String, String)>,
}

/// Run a fired rule's actions against the current values.
///
/// Value expressions that fail at runtime (missing identifier) skip their
/// write; the rule's other actions still apply.
pub fn run_actions(rule: &CompiledRule, ctx: &EvalContext<'_>) -> RuleOutcome {
    let mut outcome = RuleOutcome {
        fired: true,
        ..RuleOutcome::default()
    };

    for action in &rule.actions {
        match action {
            Action::SetValue(sv) => {
                let value = if let Some(literal) = &sv.value {
                    Some(match literal.as_number() {
                        Some(n) => WriteValue::Number(n),
                        None => WriteValue::Text(literal.to_string()),
                    })
                } else if let Some(source) = &sv.value_expression {
                    eval::eval_expression(&rule.name, source, ctx).map(WriteValue::Number)
                } else {
                    // The parser guarantees one of the two is present.
                    None
                };

                if let Some(value) = value {
                    outcome.writes.push((sv.key.clone(), value));
                } else {
                    warn!(
                        rule = %rule.name,
                        key = %sv.key,
                        "set_value skipped: value expression did not produce a number"
                    );
                }
            }
            Action::SendMessage(sm) => {
                outcome
                    .messages
                    .push((sm.channel.clone(), sm.message.clone()));
            }
        }
    }

    outcome
}

/// Per-cycle pending state. Created fresh each tick, destroyed after flush.
#[derive(Debug, Default)]
pub struct PendingCycle {
    writes: Vec<(String, WriteValue)>,
    messages: Vec<(String, String)>,
}

impl PendingCycle {
    pub fn new() -> Self {
        PendingCycle::default()
    }

    /// Fold a rule's outcome in. Last write wins on key collisions.
    pub fn apply(&mut self, outcome: RuleOutcome) {
        for (key, value) in outcome.writes {
            if let Some(existing) = self.writes.iter_mut().find(|(k, _)| *k == key) {
                existing.1 = value;
            } else {
                self.writes.push((key, value));
            }
        }
        self.messages.extend(outcome.messages);
    }

    pub fn write_count(&self) -> usize {
        self.writes.len()
    }

    pub fn message_count(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty() && self.messages.is_empty()
    }

    /// Numeric writes, for overlaying onto the next layer's current values.
    pub fn numeric_writes(&self) -> impl Iterator<Item = (&str, f64)> {
        self.writes.iter().filter_map(|(k, v)| match v {
            WriteValue::Number(n) => Some((k.as_str(), *n)),
            WriteValue::Text(_) => None,
        })
    }

    /// Flush the batch: writes atomically with a shared timestamp, then
    /// messages. Consumes the pending state either way.
    pub async fn flush(self, store: &dyn Store, timestamp_us: i64) -> StoreResult<FlushReport> {
        let report = FlushReport {
            writes: self.writes.len(),
            messages: self.messages.len(),
        };

        if !self.writes.is_empty() {
            store.set_batch(&self.writes, timestamp_us).await?;
        }
        for (channel, message) in &self.messages {
            store.publish(channel, message).await?;
        }

        Ok(report)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlushReport {
    pub writes: usize,
    pub messages: usize,
}
