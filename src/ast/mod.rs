//! # Rule AST - Abstract Syntax Tree Types
//!
//! Typed representation of a rule document: a [`RuleSet`] of named [`Rule`]s,
//! each carrying a [`ConditionGroup`] tree and an ordered list of [`Action`]s.
//! Used across parsing, validation, dependency analysis and plan emission.
//!
//! Conditions and actions are closed sum types dispatched by tag with
//! exhaustive matches; there is no dynamic type lookup anywhere in the
//! pipeline. All structs are schema-strict (`deny_unknown_fields`) so that a
//! typo in a rule document fails at parse time rather than silently changing
//! semantics.
//!
//! The AST round-trips through serde: serializing a parsed rule set and
//! re-parsing it yields the same AST (operator spellings are canonicalized
//! on the way in, see [`CompareOp`]).

use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Operators
// ============================================================================

/// Comparison operator for condition leaves.
///
/// Alternate spellings are canonicalized during deserialization:
/// `=` becomes `==`, `<>` becomes `!=`, `=>`/`=<` become `>=`/`<=`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum CompareOp {
    Gt,
    Lt,
    Ge,
    Le,
    Eq,
    Ne,
}

impl CompareOp {
    /// Canonical spelling of the operator.
    pub fn as_str(&self) -> &'static str {
        match self {
            CompareOp::Gt => ">",
            CompareOp::Lt => "<",
            CompareOp::Ge => ">=",
            CompareOp::Le => "<=",
            CompareOp::Eq => "==",
            CompareOp::Ne => "!=",
        }
    }

    /// Whether the operator is allowed in threshold-over-time conditions.
    ///
    /// Temporal comparisons are restricted to orderings; equality over a
    /// window of float samples is not meaningful.
    pub fn is_ordering(&self) -> bool {
        matches!(
            self,
            CompareOp::Gt | CompareOp::Lt | CompareOp::Ge | CompareOp::Le
        )
    }

    /// Parse an operator string, accepting alternate spellings.
    pub fn parse(s: &str) -> Option<CompareOp> {
        match s.trim() {
            ">" => Some(CompareOp::Gt),
            "<" => Some(CompareOp::Lt),
            ">=" | "=>" => Some(CompareOp::Ge),
            "<=" | "=<" => Some(CompareOp::Le),
            "==" | "=" => Some(CompareOp::Eq),
            "!=" | "<>" => Some(CompareOp::Ne),
            _ => None,
        }
    }
}

impl TryFrom<String> for CompareOp {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        CompareOp::parse(&s).ok_or_else(|| format!("unknown comparison operator: '{s}'"))
    }
}

impl From<CompareOp> for String {
    fn from(op: CompareOp) -> String {
        op.as_str().to_string()
    }
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Conditions
// ============================================================================

/// A node in the condition tree: either a leaf condition or a nested group.
///
/// In the YAML surface a leaf is written as `{ condition: {...} }` and a
/// nested group as `{ all: [...], any: [...] }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConditionNode {
    Leaf(ConditionLeaf),
    Group(ConditionGroup),
}

/// Wrapper for leaf conditions, matching the `condition:` key in documents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConditionLeaf {
    pub condition: Condition,
}

/// Boolean grouping of conditions.
///
/// `all` children are AND-ed, `any` children are OR-ed. When both lists are
/// non-empty the group reads `AND(all) AND OR(any)`. A group with no
/// children at all evaluates to false.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConditionGroup {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub all: Vec<ConditionNode>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub any: Vec<ConditionNode>,
}

impl ConditionGroup {
    pub fn is_empty(&self) -> bool {
        self.all.is_empty() && self.any.is_empty()
    }

    /// Visit every leaf condition in the tree, depth-first.
    pub fn visit_leaves<'a>(&'a self, f: &mut impl FnMut(&'a Condition)) {
        for node in self.all.iter().chain(self.any.iter()) {
            match node {
                ConditionNode::Leaf(leaf) => f(&leaf.condition),
                ConditionNode::Group(group) => group.visit_leaves(f),
            }
        }
    }

    /// Total number of leaf conditions in the tree.
    pub fn leaf_count(&self) -> usize {
        let mut n = 0;
        self.visit_leaves(&mut |_| n += 1);
        n
    }
}

/// A single evaluable condition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Condition {
    /// Compare the current value of a sensor against a constant.
    Comparison(Comparison),
    /// Evaluate an arithmetic/boolean expression over current sensor values.
    Expression(ExpressionCondition),
    /// Require a comparison to hold over every sample in a time window.
    ThresholdOverTime(ThresholdOverTime),
}

/// `source <op> value` against the current-values map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Comparison {
    pub source: String,
    pub operator: CompareOp,
    pub value: f64,
}

/// Free-form expression condition; identifiers resolve to sensor values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExpressionCondition {
    pub expression: String,
}

/// Sustained threshold: `operator(sample, threshold)` must hold for every
/// sample whose timestamp falls in the trailing window of `duration_ms`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ThresholdOverTime {
    pub source: String,
    pub operator: CompareOp,
    pub threshold: f64,
    pub duration_ms: i64,
}

// ============================================================================
// Actions
// ============================================================================

/// An action taken when a rule's conditions hold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    /// Write a value (literal or computed) to a store key.
    SetValue(SetValue),
    /// Publish a message to a channel.
    SendMessage(SendMessage),
}

/// Write action. Exactly one of `value` / `value_expression` must be set;
/// the parser rejects documents that set both or neither.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SetValue {
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Literal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_expression: Option<String>,
}

/// Publish action, flushed after the cycle's writes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SendMessage {
    pub channel: String,
    pub message: String,
}

/// Literal value in a set action.
///
/// Numbers and booleans feed back into evaluation (booleans as 0/1);
/// strings pass through to the store only and never enter the temporal path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Literal {
    Number(f64),
    Bool(bool),
    Text(String),
}

impl Literal {
    /// Numeric view of the literal; strings have none.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Literal::Number(n) => Some(*n),
            Literal::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Literal::Text(_) => None,
        }
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Number(n) => write!(f, "{n}"),
            Literal::Bool(b) => write!(f, "{b}"),
            Literal::Text(s) => write!(f, "{s}"),
        }
    }
}

// ============================================================================
// Rules
// ============================================================================

/// A single named rule: a condition tree plus ordered actions.
///
/// Immutable after compilation. Input/output key sets and the topological
/// layer are derived by the analysis pass, not stored here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Rule {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub conditions: ConditionGroup,
    pub actions: Vec<Action>,
}

impl Rule {
    /// Keys written by this rule's set-value actions.
    pub fn output_keys(&self) -> Vec<&str> {
        self.actions
            .iter()
            .filter_map(|a| match a {
                Action::SetValue(sv) => Some(sv.key.as_str()),
                Action::SendMessage(_) => None,
            })
            .collect()
    }
}

/// A versioned, ordered collection of rules. Frozen once compiled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuleSet {
    pub version: u32,
    pub rules: Vec<Rule>,
}

/// The ruleset document version this compiler understands.
pub const SUPPORTED_VERSION: u32 = 1;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operator_canonicalization() {
        assert_eq!(CompareOp::parse("="), Some(CompareOp::Eq));
        assert_eq!(CompareOp::parse("=="), Some(CompareOp::Eq));
        assert_eq!(CompareOp::parse("<>"), Some(CompareOp::Ne));
        assert_eq!(CompareOp::parse("=>"), Some(CompareOp::Ge));
        assert_eq!(CompareOp::parse("=<"), Some(CompareOp::Le));
        assert_eq!(CompareOp::parse("~"), None);
    }

    #[test]
    fn temporal_operator_restriction() {
        assert!(CompareOp::Gt.is_ordering());
        assert!(CompareOp::Le.is_ordering());
        assert!(!CompareOp::Eq.is_ordering());
        assert!(!CompareOp::Ne.is_ordering());
    }

    #[test]
    fn literal_numeric_coercion() {
        assert_eq!(Literal::Number(2.5).as_number(), Some(2.5));
        assert_eq!(Literal::Bool(true).as_number(), Some(1.0));
        assert_eq!(Literal::Bool(false).as_number(), Some(0.0));
        assert_eq!(Literal::Text("on".into()).as_number(), None);
    }

    #[test]
    fn visit_leaves_walks_nested_groups() {
        let group = ConditionGroup {
            all: vec![
                ConditionNode::Leaf(ConditionLeaf {
                    condition: Condition::Comparison(Comparison {
                        source: "input:a".into(),
                        operator: CompareOp::Gt,
                        value: 1.0,
                    }),
                }),
                ConditionNode::Group(ConditionGroup {
                    all: vec![],
                    any: vec![ConditionNode::Leaf(ConditionLeaf {
                        condition: Condition::Comparison(Comparison {
                            source: "input:b".into(),
                            operator: CompareOp::Lt,
                            value: 2.0,
                        }),
                    })],
                }),
            ],
            any: vec![],
        };
        assert_eq!(group.leaf_count(), 2);

        let mut sources = Vec::new();
        group.visit_leaves(&mut |c| {
            if let Condition::Comparison(cmp) = c {
                sources.push(cmp.source.clone());
            }
        });
        assert_eq!(sources, vec!["input:a".to_string(), "input:b".to_string()]);
    }
}
