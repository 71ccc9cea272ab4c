//! # Rule Set Validator
//!
//! Runs after parsing and before emission. Checks are aggregated: the whole
//! document is examined and every problem reported, rather than stopping at
//! the first. Only errors abort compilation; warnings (suspicious but legal
//! configurations) ride along in the report.
//!
//! Checked here:
//! - document version
//! - rule names unique and non-empty; at least one condition and one action
//! - every referenced sensor is declared in the system config or produced
//!   by some rule in the set
//! - operators within the allowed sets (temporal conditions take orderings
//!   only)
//! - expressions parse and reference only known identifiers
//! - temporal durations positive and within the configured point budget
//! - at most one producer rule per key; no dependency cycles
//!
//! The validator also computes the per-sensor ring buffer capacity the plan
//! needs: `ceil(max duration / sampling period) + margin`.

use crate::analysis::{self, RuleIo};
use crate::ast::{Condition, Rule, RuleSet, SUPPORTED_VERSION};
use crate::expr;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use std::sync::LazyLock;

static KEY_SHAPE: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(r"^[A-Za-z][A-Za-z0-9_.:-]*$").unwrap_or_else(|e| panic!("key regex: {e}"))
});

/// Issue severity. Errors abort emission, warnings do not.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
}

/// One validation finding.
#[derive(Debug, Clone)]
pub struct Issue {
    pub severity: Severity,
    /// Rule the issue belongs to, if any (version errors have none).
    pub rule: Option<String>,
    pub message: String,
}

impl fmt::Display for Issue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
        };
        match &self.rule {
            Some(rule) => write!(f, "{tag}: rule '{rule}': {}", self.message),
            None => write!(f, "{tag}: {}", self.message),
        }
    }
}

/// Aggregated validation outcome.
#[derive(Debug, Clone, Default)]
pub struct ValidationReport {
    pub issues: Vec<Issue>,
}

impl ValidationReport {
    pub fn is_ok(&self) -> bool {
        !self
            .issues
            .iter()
            .any(|i| i.severity == Severity::Error)
    }

    pub fn errors(&self) -> impl Iterator<Item = &Issue> {
        self.issues
            .iter()
            .filter(|i| i.severity == Severity::Error)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &Issue> {
        self.issues
            .iter()
            .filter(|i| i.severity == Severity::Warning)
    }

    fn error(&mut self, rule: Option<&str>, message: impl Into<String>) {
        self.issues.push(Issue {
            severity: Severity::Error,
            rule: rule.map(str::to_string),
            message: message.into(),
        });
    }

    fn warning(&mut self, rule: Option<&str>, message: impl Into<String>) {
        self.issues.push(Issue {
            severity: Severity::Warning,
            rule: rule.map(str::to_string),
            message: message.into(),
        });
    }
}

/// Tunables the validator needs from the system config.
#[derive(Debug, Clone)]
pub struct ValidatorOptions {
    /// Sensors declared in the system config.
    pub valid_sensors: Vec<String>,
    /// Engine sampling period; bounds temporal point counts.
    pub sampling_period_ms: u64,
    /// Maximum samples a single temporal window may require.
    pub max_temporal_points: usize,
    /// Default ring capacity for sensors without temporal conditions.
    pub default_buffer_capacity: usize,
    /// Extra slots on top of the computed requirement.
    pub buffer_margin: usize,
}

impl Default for ValidatorOptions {
    fn default() -> Self {
        ValidatorOptions {
            valid_sensors: Vec::new(),
            sampling_period_ms: 100,
            max_temporal_points: 1000,
            default_buffer_capacity: 100,
            buffer_margin: 10,
        }
    }
}

/// Validate a parsed rule set. Never partial: every check runs and the
/// report carries everything found.
pub fn validate(ruleset: &RuleSet, opts: &ValidatorOptions) -> ValidationReport {
    let mut report = ValidationReport::default();

    if ruleset.version != SUPPORTED_VERSION {
        report.error(
            None,
            format!(
                "unsupported ruleset version {} (supported: {})",
                ruleset.version, SUPPORTED_VERSION
            ),
        );
    }

    if ruleset.rules.is_empty() {
        report.warning(None, "rule set contains no rules");
    }

    check_names(&ruleset.rules, &mut report);

    // Per-rule IO, tolerant of expression errors (reported, then skipped).
    let ios: Vec<Option<RuleIo>> = ruleset
        .rules
        .iter()
        .map(|rule| match analysis::rule_io(rule) {
            Ok(io) => Some(io),
            Err(e) => {
                report.error(Some(&rule.name), format!("invalid expression: {e}"));
                None
            }
        })
        .collect();

    let produced: BTreeSet<&str> = ios
        .iter()
        .flatten()
        .flat_map(|io| io.outputs.iter().map(String::as_str))
        .collect();
    let declared: HashSet<&str> = opts.valid_sensors.iter().map(String::as_str).collect();
    let known = |key: &str| declared.contains(key) || produced.contains(key);

    for rule in &ruleset.rules {
        check_rule(rule, &known, opts, &mut report);
    }

    check_unused_sensors(&ios, &declared, &mut report);
    check_graph(&ruleset.rules, &ios, &mut report);

    report
}

fn check_names(rules: &[Rule], report: &mut ValidationReport) {
    let mut seen: HashSet<&str> = HashSet::new();
    for rule in rules {
        if rule.name.trim().is_empty() {
            report.error(None, "rule with empty name");
            continue;
        }
        if !seen.insert(rule.name.as_str()) {
            report.error(Some(&rule.name), "duplicate rule name");
        }
    }
}

fn check_rule(
    rule: &Rule,
    known: &dyn Fn(&str) -> bool,
    opts: &ValidatorOptions,
    report: &mut ValidationReport,
) {
    if rule.conditions.leaf_count() == 0 {
        report.error(Some(&rule.name), "rule has no conditions");
    }
    if rule.actions.is_empty() {
        report.error(Some(&rule.name), "rule has no actions");
    }

    rule.conditions.visit_leaves(&mut |cond| match cond {
        Condition::Comparison(c) => {
            if !known(&c.source) {
                report.error(
                    Some(&rule.name),
                    format!("unknown sensor '{}' in comparison", c.source),
                );
            }
        }
        Condition::ThresholdOverTime(t) => {
            if !known(&t.source) {
                report.error(
                    Some(&rule.name),
                    format!("unknown sensor '{}' in threshold_over_time", t.source),
                );
            }
            if !t.operator.is_ordering() {
                report.error(
                    Some(&rule.name),
                    format!(
                        "operator '{}' not allowed in threshold_over_time (orderings only)",
                        t.operator
                    ),
                );
            }
            if t.duration_ms <= 0 {
                report.error(
                    Some(&rule.name),
                    format!("threshold_over_time duration must be positive, got {}", t.duration_ms),
                );
            } else {
                let points = points_for(t.duration_ms, opts.sampling_period_ms);
                if points > opts.max_temporal_points {
                    report.error(
                        Some(&rule.name),
                        format!(
                            "threshold_over_time over {} ms needs {} samples at {} ms sampling, \
                             exceeding the maximum of {}",
                            t.duration_ms,
                            points,
                            opts.sampling_period_ms,
                            opts.max_temporal_points
                        ),
                    );
                }
            }
        }
        Condition::Expression(e) => {
            // Parse errors were reported by the IO pass; only check
            // identifier resolution when the expression is well-formed.
            if let Ok(ids) = expr::identifiers(&e.expression) {
                for id in ids {
                    if !known(&id) {
                        report.error(
                            Some(&rule.name),
                            format!("unknown identifier '{id}' in expression"),
                        );
                    }
                }
            }
        }
    });

    // Value expressions resolve against the same namespace.
    for action in &rule.actions {
        if let crate::ast::Action::SetValue(sv) = action {
            if !KEY_SHAPE.is_match(&sv.key) {
                report.warning(
                    Some(&rule.name),
                    format!("suspicious key '{}' in set_value", sv.key),
                );
            }
            if let Some(ve) = &sv.value_expression {
                if let Ok(ids) = expr::identifiers(ve) {
                    for id in ids {
                        if !known(&id) {
                            report.error(
                                Some(&rule.name),
                                format!("unknown identifier '{id}' in value_expression"),
                            );
                        }
                    }
                }
            }
        }
    }

    // One rule writing the same key twice is legal (last write wins) but
    // usually a modeling mistake.
    let mut written: HashSet<&str> = HashSet::new();
    for key in rule.output_keys() {
        if !written.insert(key) {
            report.warning(
                Some(&rule.name),
                format!("key '{key}' written more than once in a single cycle"),
            );
        }
    }
}

fn check_unused_sensors(
    ios: &[Option<RuleIo>],
    declared: &HashSet<&str>,
    report: &mut ValidationReport,
) {
    let read: HashSet<&str> = ios
        .iter()
        .flatten()
        .flat_map(|io| io.inputs.iter().map(String::as_str))
        .collect();
    for &sensor in declared {
        if !read.contains(sensor) {
            report.warning(None, format!("declared sensor '{sensor}' is never read"));
        }
    }
}

fn check_graph(rules: &[Rule], ios: &[Option<RuleIo>], report: &mut ValidationReport) {
    // Graph checks need every rule's IO; with expression errors present the
    // cycle answer would be unreliable anyway.
    let complete: Option<Vec<RuleIo>> = ios.iter().cloned().collect();
    let Some(complete) = complete else {
        return;
    };

    let graph = analysis::build_graph(&complete);
    for (key, claimants) in &graph.duplicate_producers {
        let names: Vec<&str> = claimants.iter().map(|&i| rules[i].name.as_str()).collect();
        report.error(
            None,
            format!(
                "key '{key}' is produced by multiple rules: {}",
                names.join(", ")
            ),
        );
    }

    if let Some(cycle) = analysis::find_cycle(&graph.edges) {
        let names: Vec<&str> = cycle.iter().map(|&i| rules[i].name.as_str()).collect();
        report.error(
            None,
            format!("dependency cycle between rules: {}", names.join(" -> ")),
        );
    }
}

fn points_for(duration_ms: i64, sampling_period_ms: u64) -> usize {
    let period = sampling_period_ms.max(1) as i64;
    ((duration_ms + period - 1) / period) as usize
}

/// Per-sensor ring capacity: enough samples to cover the longest temporal
/// window over that sensor, plus margin. Sensors without temporal
/// conditions get the default.
pub fn required_capacities(
    ruleset: &RuleSet,
    opts: &ValidatorOptions,
) -> HashMap<String, usize> {
    let mut max_duration: HashMap<String, i64> = HashMap::new();
    for rule in &ruleset.rules {
        rule.conditions.visit_leaves(&mut |cond| {
            if let Condition::ThresholdOverTime(t) = cond {
                let entry = max_duration.entry(t.source.clone()).or_insert(0);
                if t.duration_ms > *entry {
                    *entry = t.duration_ms;
                }
            }
        });
    }

    max_duration
        .into_iter()
        .map(|(sensor, duration)| {
            let needed = points_for(duration, opts.sampling_period_ms) + opts.buffer_margin;
            (sensor, needed.max(opts.default_buffer_capacity))
        })
        .collect()
}
