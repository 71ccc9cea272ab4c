//! # Plan Emitter
//!
//! Turns a validated, analyzed rule set into the executable artifact the
//! runtime loads: an [`ExecutablePlan`] (`plan.json`) holding the compiled
//! rule groups in coordinator order, plus a `manifest.json` describing the
//! plan for tooling.
//!
//! The plan is pure data: arrays of rules addressed by index, group records
//! `(index, layer, rule indices)`, per-sensor buffer capacities. The
//! runtime's coordinator walks groups in increasing index order; there are
//! no object graphs to reconstruct.
//!
//! Each compiled rule also carries its condition tree rendered to canonical
//! text for logs and traces. Rendering uses minimal parentheses under the
//! precedence `comparison > AND > OR`: OR groups are parenthesized, AND
//! chains are not.

use crate::analysis::{Analysis, GroupSpec};
use crate::ast::{Action, Condition, ConditionGroup, ConditionNode, Rule, RuleSet};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use thiserror::Error;

pub const PLAN_FILE: &str = "plan.json";
pub const MANIFEST_FILE: &str = "manifest.json";

#[derive(Debug, Error)]
pub enum EmitError {
    #[error("failed to write {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode {path}: {source}")]
    Encode {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to decode {path}: {source}")]
    Decode {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

// ============================================================================
// Plan data model
// ============================================================================

/// One rule, compiled: AST plus everything analysis derived.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompiledRule {
    pub name: String,
    pub layer: usize,
    pub group: usize,
    pub conditions: ConditionGroup,
    pub actions: Vec<Action>,
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
    /// Canonical condition text, for logs and traces.
    pub rendered: String,
}

/// A size-bounded execution unit: rules of one layer evaluated together.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanGroup {
    pub index: usize,
    pub layer: usize,
    /// Indices into [`ExecutablePlan::rules`], in declaration-order-stable
    /// name order.
    pub rules: Vec<usize>,
}

/// The executable artifact. Frozen at compile time, loaded by the runtime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutablePlan {
    pub ruleset_version: u32,
    pub compiler_version: String,
    pub sampling_period_ms: u64,
    pub rules: Vec<CompiledRule>,
    /// Groups in coordinator order (monotonic index, layer-major).
    pub groups: Vec<PlanGroup>,
    /// Ring capacity per sensor with temporal conditions.
    pub buffer_capacities: HashMap<String, usize>,
    pub default_buffer_capacity: usize,
    /// Every key the cycle loads from the store (all rule inputs).
    pub read_keys: Vec<String>,
    /// Inputs fed externally, i.e. not produced by any rule.
    pub input_sensors: Vec<String>,
    /// Keys produced by rules.
    pub output_sensors: Vec<String>,
}

impl ExecutablePlan {
    pub fn layer_count(&self) -> usize {
        self.groups.iter().map(|g| g.layer + 1).max().unwrap_or(0)
    }

    /// Group indices partitioned by layer, each inner list in coordinator
    /// order.
    pub fn groups_by_layer(&self) -> Vec<Vec<&PlanGroup>> {
        let mut layers: Vec<Vec<&PlanGroup>> = vec![Vec::new(); self.layer_count()];
        for group in &self.groups {
            layers[group.layer].push(group);
        }
        layers
    }
}

// ============================================================================
// Manifest
// ============================================================================

/// Machine-readable description of an emitted plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub ruleset_version: u32,
    pub compiler_version: String,
    pub rules: Vec<ManifestRule>,
    pub input_sensors: Vec<String>,
    pub output_sensors: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestRule {
    pub name: String,
    pub layer: usize,
    pub group: usize,
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
}

impl Manifest {
    pub fn for_plan(plan: &ExecutablePlan) -> Manifest {
        Manifest {
            ruleset_version: plan.ruleset_version,
            compiler_version: plan.compiler_version.clone(),
            rules: plan
                .rules
                .iter()
                .map(|r| ManifestRule {
                    name: r.name.clone(),
                    layer: r.layer,
                    group: r.group,
                    inputs: r.inputs.clone(),
                    outputs: r.outputs.clone(),
                })
                .collect(),
            input_sensors: plan.input_sensors.clone(),
            output_sensors: plan.output_sensors.clone(),
        }
    }
}

// ============================================================================
// Plan construction
// ============================================================================

/// Assemble the executable plan from the analysis result and grouping.
pub fn build_plan(
    ruleset: &RuleSet,
    analysis: &Analysis,
    groups: &[GroupSpec],
    buffer_capacities: HashMap<String, usize>,
    default_buffer_capacity: usize,
    sampling_period_ms: u64,
) -> ExecutablePlan {
    let mut group_of = vec![0usize; ruleset.rules.len()];
    for spec in groups {
        for &rule in &spec.rules {
            group_of[rule] = spec.index;
        }
    }

    let rules: Vec<CompiledRule> = ruleset
        .rules
        .iter()
        .enumerate()
        .map(|(idx, rule)| CompiledRule {
            name: rule.name.clone(),
            layer: analysis.layers[idx],
            group: group_of[idx],
            conditions: rule.conditions.clone(),
            actions: rule.actions.clone(),
            inputs: analysis.io[idx].inputs.iter().cloned().collect(),
            outputs: analysis.io[idx].outputs.iter().cloned().collect(),
            rendered: render_conditions(&rule.conditions),
        })
        .collect();

    let mut read_keys: Vec<String> = rules
        .iter()
        .flat_map(|r| r.inputs.iter().cloned())
        .collect();
    read_keys.sort_unstable();
    read_keys.dedup();

    let mut output_sensors: Vec<String> = analysis.graph.producer_of.keys().cloned().collect();
    output_sensors.sort_unstable();

    ExecutablePlan {
        ruleset_version: ruleset.version,
        compiler_version: env!("CARGO_PKG_VERSION").to_string(),
        sampling_period_ms,
        rules,
        groups: groups
            .iter()
            .map(|g| PlanGroup {
                index: g.index,
                layer: g.layer,
                rules: g.rules.clone(),
            })
            .collect(),
        buffer_capacities,
        default_buffer_capacity,
        read_keys,
        input_sensors: analysis.external_inputs.iter().cloned().collect(),
        output_sensors,
    }
}

// ============================================================================
// Condition rendering
// ============================================================================

/// Render a condition tree to canonical text.
pub fn render_conditions(group: &ConditionGroup) -> String {
    if group.is_empty() {
        return "false".to_string();
    }

    let all_parts: Vec<String> = group.all.iter().map(render_node).collect();
    let any_parts: Vec<String> = group.any.iter().map(render_node).collect();

    match (all_parts.is_empty(), any_parts.is_empty()) {
        (false, true) => all_parts.join(" && "),
        (true, false) => parenthesize_or(&any_parts),
        (false, false) => format!(
            "{} && {}",
            all_parts.join(" && "),
            parenthesize_or(&any_parts)
        ),
        (true, true) => unreachable!("empty group handled above"),
    }
}

fn parenthesize_or(parts: &[String]) -> String {
    if parts.len() == 1 {
        parts[0].clone()
    } else {
        format!("({})", parts.join(" || "))
    }
}

fn render_node(node: &ConditionNode) -> String {
    match node {
        ConditionNode::Leaf(leaf) => render_leaf(&leaf.condition),
        ConditionNode::Group(group) => render_conditions(group),
    }
}

fn render_leaf(condition: &Condition) -> String {
    match condition {
        Condition::Comparison(c) => format!("{} {} {}", c.source, c.operator, c.value),
        Condition::ThresholdOverTime(t) => format!(
            "sustained({} {} {}, {}ms)",
            t.source, t.operator, t.threshold, t.duration_ms
        ),
        Condition::Expression(e) => {
            let source = e.expression.trim();
            // Opaque boolean expressions get parens so an enclosing AND
            // chain reads unambiguously.
            if source.contains("||") || source.contains(" or ") {
                format!("({source})")
            } else {
                source.to_string()
            }
        }
    }
}

/// Emitter-aware estimate of a rule's rendered size, used by the grouping
/// budgets. Roughly: header + one line per condition leaf and per action.
pub fn estimate_lines(rule: &Rule) -> usize {
    4 + rule.conditions.leaf_count() * 2 + rule.actions.len() * 2
}

// ============================================================================
// Artifact I/O
// ============================================================================

/// Write `plan.json` and `manifest.json` into `dir`, creating it if needed.
pub fn write_artifact(plan: &ExecutablePlan, dir: impl AsRef<Path>) -> Result<(), EmitError> {
    let dir = dir.as_ref();
    fs::create_dir_all(dir).map_err(|e| EmitError::Io {
        path: dir.display().to_string(),
        source: e,
    })?;

    let plan_path = dir.join(PLAN_FILE);
    let encoded = serde_json::to_vec_pretty(plan).map_err(|e| EmitError::Encode {
        path: plan_path.display().to_string(),
        source: e,
    })?;
    fs::write(&plan_path, encoded).map_err(|e| EmitError::Io {
        path: plan_path.display().to_string(),
        source: e,
    })?;

    let manifest_path = dir.join(MANIFEST_FILE);
    let manifest = Manifest::for_plan(plan);
    let encoded = serde_json::to_vec_pretty(&manifest).map_err(|e| EmitError::Encode {
        path: manifest_path.display().to_string(),
        source: e,
    })?;
    fs::write(&manifest_path, encoded).map_err(|e| EmitError::Io {
        path: manifest_path.display().to_string(),
        source: e,
    })?;

    Ok(())
}

/// Load a plan from an artifact directory.
pub fn load_plan(dir: impl AsRef<Path>) -> Result<ExecutablePlan, EmitError> {
    let path = dir.as_ref().join(PLAN_FILE);
    let bytes = fs::read(&path).map_err(|e| EmitError::Io {
        path: path.display().to_string(),
        source: e,
    })?;
    serde_json::from_slice(&bytes).map_err(|e| EmitError::Decode {
        path: path.display().to_string(),
        source: e,
    })
}

/// Load a manifest from an artifact directory.
pub fn load_manifest(dir: impl AsRef<Path>) -> Result<Manifest, EmitError> {
    let path = dir.as_ref().join(MANIFEST_FILE);
    let bytes = fs::read(&path).map_err(|e| EmitError::Io {
        path: path.display().to_string(),
        source: e,
    })?;
    serde_json::from_slice(&bytes).map_err(|e| EmitError::Decode {
        path: path.display().to_string(),
        source: e,
    })
}
