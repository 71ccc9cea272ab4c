//! # Dependency Analysis & Layering
//!
//! Computes the producer→consumer graph over a rule set, detects cycles,
//! assigns topological layers, and packs layers into size-bounded groups.
//!
//! A rule *produces* the keys of its set-value actions and *consumes* the
//! sources of its comparisons and temporal conditions plus every identifier
//! appearing in its expressions (conditions and value expressions). An edge
//! `P → C` exists when some key produced by `P` is consumed by `C`.
//!
//! Layer assignment is Kahn-style: rules with no rule-produced inputs sit in
//! layer 0, every other rule one past its deepest predecessor. Rules sharing
//! a layer have no dependencies among each other and may evaluate
//! concurrently; groups within a layer exist purely to bound unit size and
//! are numbered monotonically across layers so the coordinator can run them
//! in index order.

use crate::ast::{Action, Condition, Rule};
use crate::expr::{self, ExprParseError};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("rule '{rule}': invalid expression: {source}")]
    Expression {
        rule: String,
        #[source]
        source: ExprParseError,
    },

    #[error("dependency cycle between rules: {}", names.join(" -> "))]
    Cycle { names: Vec<String> },

    #[error("key '{key}' is produced by multiple rules: {}", rules.join(", "))]
    DuplicateProducer { key: String, rules: Vec<String> },
}

/// Keys a rule reads and writes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleIo {
    pub inputs: BTreeSet<String>,
    pub outputs: BTreeSet<String>,
}

/// Derive the input/output key sets of a single rule.
///
/// Expression identifiers count as inputs, so the expressions must parse;
/// the error carries the offending source position for the validator.
pub fn rule_io(rule: &Rule) -> Result<RuleIo, ExprParseError> {
    let mut io = RuleIo::default();

    let mut expr_sources: Vec<&str> = Vec::new();
    rule.conditions.visit_leaves(&mut |cond| match cond {
        Condition::Comparison(c) => {
            io.inputs.insert(c.source.clone());
        }
        Condition::ThresholdOverTime(t) => {
            io.inputs.insert(t.source.clone());
        }
        Condition::Expression(e) => expr_sources.push(&e.expression),
    });

    for action in &rule.actions {
        if let Action::SetValue(sv) = action {
            io.outputs.insert(sv.key.clone());
            if let Some(ve) = &sv.value_expression {
                expr_sources.push(ve);
            }
        }
    }

    for source in expr_sources {
        io.inputs.extend(expr::identifiers(source)?);
    }

    Ok(io)
}

/// Producer→consumer graph over rule indices.
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    /// `edges[p]` lists the consumers of rule `p`. Sorted, deduplicated.
    pub edges: Vec<Vec<usize>>,
    /// Key → index of the rule producing it (first producer wins).
    pub producer_of: HashMap<String, usize>,
    /// Keys claimed by more than one rule, with every claimant.
    pub duplicate_producers: Vec<(String, Vec<usize>)>,
}

/// Build the dependency graph from per-rule IO sets.
pub fn build_graph(ios: &[RuleIo]) -> DependencyGraph {
    let mut producer_of: HashMap<String, usize> = HashMap::new();
    let mut claimants: BTreeMap<String, Vec<usize>> = BTreeMap::new();

    for (idx, io) in ios.iter().enumerate() {
        for key in &io.outputs {
            claimants.entry(key.clone()).or_default().push(idx);
            producer_of.entry(key.clone()).or_insert(idx);
        }
    }

    let duplicate_producers: Vec<(String, Vec<usize>)> = claimants
        .into_iter()
        .filter(|(_, rules)| rules.len() > 1)
        .collect();

    let mut edges: Vec<Vec<usize>> = vec![Vec::new(); ios.len()];
    for (consumer, io) in ios.iter().enumerate() {
        for key in &io.inputs {
            if let Some(&producer) = producer_of.get(key) {
                if producer != consumer {
                    edges[producer].push(consumer);
                }
            }
        }
    }
    for targets in &mut edges {
        targets.sort_unstable();
        targets.dedup();
    }

    DependencyGraph {
        edges,
        producer_of,
        duplicate_producers,
    }
}

/// DFS with white/grey/black coloring. Returns the rule indices on the first
/// back-edge found, in path order starting and ending at the same rule's
/// dependency chain entry point.
pub fn find_cycle(edges: &[Vec<usize>]) -> Option<Vec<usize>> {
    #[derive(Clone, Copy, PartialEq)]
    enum Color {
        White,
        Grey,
        Black,
    }

    let n = edges.len();
    let mut color = vec![Color::White; n];
    let mut path: Vec<usize> = Vec::new();

    for start in 0..n {
        if color[start] != Color::White {
            continue;
        }
        // Iterative DFS: frames of (node, next child offset).
        let mut stack: Vec<(usize, usize)> = vec![(start, 0)];
        color[start] = Color::Grey;
        path.push(start);

        while let Some((node, child)) = stack.pop() {
            if child < edges[node].len() {
                let next = edges[node][child];
                stack.push((node, child + 1));
                match color[next] {
                    Color::Grey => {
                        // Back-edge: the cycle is the path suffix from `next`.
                        let from = path.iter().position(|&r| r == next).unwrap_or(0);
                        let mut cycle = path[from..].to_vec();
                        cycle.push(next);
                        return Some(cycle);
                    }
                    Color::White => {
                        color[next] = Color::Grey;
                        path.push(next);
                        stack.push((next, 0));
                    }
                    Color::Black => {}
                }
            } else {
                color[node] = Color::Black;
                path.pop();
            }
        }
    }

    None
}

/// Kahn-style layer assignment. Assumes an acyclic graph (callers run
/// [`find_cycle`] first); rules left unassigned by a cycle keep layer 0.
pub fn assign_layers(edges: &[Vec<usize>]) -> Vec<usize> {
    let n = edges.len();
    let mut in_degree = vec![0usize; n];
    for targets in edges {
        for &t in targets {
            in_degree[t] += 1;
        }
    }

    let mut layers = vec![0usize; n];
    let mut ready: Vec<usize> = (0..n).filter(|&i| in_degree[i] == 0).collect();

    while let Some(node) = ready.pop() {
        for &next in &edges[node] {
            if layers[node] + 1 > layers[next] {
                layers[next] = layers[node] + 1;
            }
            in_degree[next] -= 1;
            if in_degree[next] == 0 {
                ready.push(next);
            }
        }
    }

    layers
}

/// Size budgets for packing a layer into groups.
#[derive(Debug, Clone, Copy)]
pub struct GroupBudgets {
    pub max_rules_per_group: usize,
    pub max_lines_per_group: usize,
}

impl Default for GroupBudgets {
    fn default() -> Self {
        GroupBudgets {
            max_rules_per_group: 25,
            max_lines_per_group: 400,
        }
    }
}

/// One emitted group: a slice of a layer, bounded by the budgets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupSpec {
    pub index: usize,
    pub layer: usize,
    /// Rule indices, ordered by rule name.
    pub rules: Vec<usize>,
}

/// Pack rules into groups, layer by layer.
///
/// Rules within a layer are taken in name order so recompilation of an
/// unchanged document produces identical groups. Group indices increase
/// monotonically across layers. `line_estimates` is the emitter's per-rule
/// rendered-size estimate, index-aligned with `rules`.
pub fn group_rules(
    rules: &[Rule],
    layers: &[usize],
    line_estimates: &[usize],
    budgets: GroupBudgets,
) -> Vec<GroupSpec> {
    let max_rules = budgets.max_rules_per_group.max(1);
    let max_lines = budgets.max_lines_per_group.max(1);

    let layer_count = layers.iter().copied().max().map_or(0, |m| m + 1);
    let mut by_layer: Vec<Vec<usize>> = vec![Vec::new(); layer_count];
    for (idx, &layer) in layers.iter().enumerate() {
        by_layer[layer].push(idx);
    }

    let mut groups = Vec::new();
    let mut next_index = 0;

    for (layer, mut members) in by_layer.into_iter().enumerate() {
        members.sort_by(|&a, &b| rules[a].name.cmp(&rules[b].name));

        let mut current: Vec<usize> = Vec::new();
        let mut current_lines = 0usize;

        for idx in members {
            let lines = line_estimates[idx];
            let over_rules = current.len() >= max_rules;
            let over_lines = !current.is_empty() && current_lines + lines > max_lines;
            if over_rules || over_lines {
                groups.push(GroupSpec {
                    index: next_index,
                    layer,
                    rules: std::mem::take(&mut current),
                });
                next_index += 1;
                current_lines = 0;
            }
            current.push(idx);
            current_lines += lines;
        }

        if !current.is_empty() {
            groups.push(GroupSpec {
                index: next_index,
                layer,
                rules: current,
            });
            next_index += 1;
        }
    }

    groups
}

/// Full analysis result for a validated rule set.
#[derive(Debug, Clone)]
pub struct Analysis {
    pub io: Vec<RuleIo>,
    pub graph: DependencyGraph,
    pub layers: Vec<usize>,
    /// Inputs read from the store rather than produced by rules.
    pub external_inputs: BTreeSet<String>,
}

/// Analyze a rule set end to end. All-or-nothing; the validator produces
/// the aggregated diagnostics, this is the compiler's strict path.
pub fn analyze(rules: &[Rule]) -> Result<Analysis, AnalysisError> {
    let io: Vec<RuleIo> = rules
        .iter()
        .map(|r| {
            rule_io(r).map_err(|e| AnalysisError::Expression {
                rule: r.name.clone(),
                source: e,
            })
        })
        .collect::<Result<_, _>>()?;

    let graph = build_graph(&io);
    if let Some((key, claimants)) = graph.duplicate_producers.first() {
        return Err(AnalysisError::DuplicateProducer {
            key: key.clone(),
            rules: claimants.iter().map(|&i| rules[i].name.clone()).collect(),
        });
    }

    if let Some(cycle) = find_cycle(&graph.edges) {
        return Err(AnalysisError::Cycle {
            names: cycle.into_iter().map(|i| rules[i].name.clone()).collect(),
        });
    }

    let layers = assign_layers(&graph.edges);

    let mut external_inputs = BTreeSet::new();
    for entry in &io {
        for key in &entry.inputs {
            if !graph.producer_of.contains_key(key) {
                external_inputs.insert(key.clone());
            }
        }
    }

    Ok(Analysis {
        io,
        graph,
        layers,
        external_inputs,
    })
}
