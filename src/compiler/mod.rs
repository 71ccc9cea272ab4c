//! # Ahead-of-Time Rule Compiler
//!
//! Pipeline orchestration: YAML document → AST → validation → dependency
//! analysis → layered grouping → executable artifact on disk.
//!
//! ```text
//! rules.yaml
//!     ↓
//! [parser]      → RuleSet (AST)
//!     ↓
//! [validator]   → aggregated errors/warnings
//!     ↓
//! [analysis]    → producer→consumer graph, layers
//!     ↓
//! [grouping]    → size-bounded groups, monotonic indices
//!     ↓
//! [emit]        → plan.json + manifest.json
//! ```
//!
//! Any error aborts emission; validation errors are aggregated and carried
//! as a list. Warnings never abort but are returned for display.

use crate::analysis::{self, AnalysisError, GroupBudgets};
use crate::ast::RuleSet;
use crate::emit::{self, EmitError, ExecutablePlan};
use crate::parser::{self, ParseError};
use crate::validator::{self, Issue, ValidatorOptions};
use std::fmt;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum CompileError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("{0}")]
    Validation(ValidationFailure),

    #[error(transparent)]
    Analysis(#[from] AnalysisError),

    #[error(transparent)]
    Emit(#[from] EmitError),
}

/// Aggregated validation errors, formatted one per line.
#[derive(Debug)]
pub struct ValidationFailure {
    pub issues: Vec<Issue>,
}

impl fmt::Display for ValidationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "validation failed with {} error(s):", self.issues.len())?;
        for issue in &self.issues {
            writeln!(f,"  {issue}")?;
        }
        Ok(())
    }
}

/// Compiler configuration, usually derived from the system config.
#[derive(Debug, Clone, Default)]
pub struct CompileOptions {
    pub validator: ValidatorOptions,
    pub budgets: GroupBudgets,
}

/// A successful compilation: the plan plus non-fatal findings.
#[derive(Debug)]
pub struct CompileOutput {
    pub plan: ExecutablePlan,
    pub warnings: Vec<Issue>,
}

/// Compile a parsed rule set into an executable plan.
pub fn compile(ruleset: &RuleSet, opts: &CompileOptions) -> Result<CompileOutput, CompileError> {
    let report = validator::validate(ruleset, &opts.validator);
    let warnings: Vec<Issue> = report.warnings().cloned().collect();
    if !report.is_ok() {
        return Err(CompileError::Validation(ValidationFailure {
            issues: report.errors().cloned().collect(),
        }));
    }

    let analysis = analysis::analyze(&ruleset.rules)?;
    debug!(
        rules = ruleset.rules.len(),
        layers = analysis.layers.iter().max().map_or(0, |m| m + 1),
        "dependency analysis complete"
    );

    let estimates: Vec<usize> = ruleset.rules.iter().map(emit::estimate_lines).collect();
    let groups = analysis::group_rules(&ruleset.rules, &analysis.layers, &estimates, opts.budgets);

    let capacities = validator::required_capacities(ruleset, &opts.validator);
    let plan = emit::build_plan(
        ruleset,
        &analysis,
        &groups,
        capacities,
        opts.validator.default_buffer_capacity,
        opts.validator.sampling_period_ms,
    );

    info!(
        rules = plan.rules.len(),
        groups = plan.groups.len(),
        layers = plan.layer_count(),
        "compiled rule set"
    );

    Ok(CompileOutput { plan, warnings })
}

/// Compile a rule document file.
pub fn compile_file(
    path: impl AsRef<Path>,
    opts: &CompileOptions,
) -> Result<CompileOutput, CompileError> {
    let ruleset = parser::parse_file(path)?;
    compile(&ruleset, opts)
}

/// Compile a rule document file and write the artifact directory.
pub fn compile_to_dir(
    path: impl AsRef<Path>,
    out_dir: impl AsRef<Path>,
    opts: &CompileOptions,
) -> Result<CompileOutput, CompileError> {
    let output = compile_file(path, opts)?;
    emit::write_artifact(&output.plan, out_dir)?;
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_str;

    const DOC: &str = r#"
version: 1
rules:
  - name: heat_index
    conditions:
      all:
        - condition:
            comparison:
              source: input:temperature
              operator: ">"
              value: 0
    actions:
      - set_value:
          key: output:heat_index
          value_expression: "0.5 * (input:temperature + 61 + (input:temperature - 68) * 1.2 + input:humidity * 0.094)"
  - name: heat_alert
    conditions:
      all:
        - condition:
            comparison:
              source: output:heat_index
              operator: ">"
              value: 85
    actions:
      - set_value:
          key: output:heat_alert
          value: 1
"#;

    fn options() -> CompileOptions {
        CompileOptions {
            validator: ValidatorOptions {
                valid_sensors: vec!["input:temperature".into(), "input:humidity".into()],
                ..ValidatorOptions::default()
            },
            budgets: GroupBudgets::default(),
        }
    }

    #[test]
    fn compiles_dependent_rules_into_ordered_layers() {
        let ruleset = parse_str(DOC, "<test>").unwrap();
        let output = compile(&ruleset, &options()).unwrap();
        let plan = output.plan;

        assert_eq!(plan.rules.len(), 2);
        let heat_index = plan.rules.iter().find(|r| r.name == "heat_index").unwrap();
        let heat_alert = plan.rules.iter().find(|r| r.name == "heat_alert").unwrap();
        assert_eq!(heat_index.layer, 0);
        assert_eq!(heat_alert.layer, 1);
        assert!(heat_index.group < heat_alert.group);

        assert_eq!(
            plan.input_sensors,
            vec!["input:humidity".to_string(), "input:temperature".to_string()]
        );
        assert!(plan
            .output_sensors
            .contains(&"output:heat_index".to_string()));
        assert!(plan.read_keys.contains(&"output:heat_index".to_string()));
    }

    #[test]
    fn validation_errors_abort_compilation() {
        let ruleset = parse_str(DOC, "<test>").unwrap();
        let bare = CompileOptions::default();
        let err = compile(&ruleset, &bare).unwrap_err();
        match err {
            CompileError::Validation(failure) => {
                assert!(!failure.issues.is_empty());
            }
            other => panic!("expected validation failure, got {other}"),
        }
    }

    #[test]
    fn group_indices_follow_coordinator_order() {
        let ruleset = parse_str(DOC, "<test>").unwrap();
        let plan = compile(&ruleset, &options()).unwrap().plan;
        let indices: Vec<usize> = plan.groups.iter().map(|g| g.index).collect();
        let mut sorted = indices.clone();
        sorted.sort_unstable();
        assert_eq!(indices, sorted);
        let layers: Vec<usize> = plan.groups.iter().map(|g| g.layer).collect();
        let mut sorted_layers = layers.clone();
        sorted_layers.sort_unstable();
        assert_eq!(layers, sorted_layers);
    }
}
