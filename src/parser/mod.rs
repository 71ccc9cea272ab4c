//! # Rule Document Parser
//!
//! Loads YAML rule documents into the typed AST. Parsing is schema-strict:
//! unknown keys anywhere in the document are errors, surfaced with the file
//! path and YAML line/column. Operator strings are canonicalized during
//! deserialization (`=` → `==`, see [`crate::ast::CompareOp`]).
//!
//! After deserialization a structural pass enforces the shape constraints
//! serde cannot express: every `set_value` action carries exactly one of
//! `value` / `value_expression`. The parser never evaluates expressions;
//! expression *validity* is the validator's job.

use crate::ast::{Action, Rule, RuleSet};
use std::fs;
use std::path::Path;
use thiserror::Error;

/// Parse failure. Syntactic errors carry the document origin and position.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{origin}:{line}:{column}: {message}")]
    Syntax {
        origin: String,
        line: usize,
        column: usize,
        message: String,
    },

    #[error("{origin}: rule '{rule}': {message}")]
    Structure {
        origin: String,
        rule: String,
        message: String,
    },
}

/// Parse a rule document from a string. `origin` labels error messages
/// (a file path, or something like `<inline>` in tests).
pub fn parse_str(source: &str, origin: &str) -> Result<RuleSet, ParseError> {
    let ruleset: RuleSet = serde_yaml::from_str(source).map_err(|e| {
        let (line, column) = e
            .location()
            .map(|loc| (loc.line(), loc.column()))
            .unwrap_or((0, 0));
        ParseError::Syntax {
            origin: origin.to_string(),
            line,
            column,
            message: e.to_string(),
        }
    })?;

    for rule in &ruleset.rules {
        check_rule_structure(rule, origin)?;
    }

    Ok(ruleset)
}

/// Parse a rule document from a file path.
pub fn parse_file(path: impl AsRef<Path>) -> Result<RuleSet, ParseError> {
    let path = path.as_ref();
    let origin = path.display().to_string();
    let source = fs::read_to_string(path).map_err(|e| ParseError::Io {
        path: origin.clone(),
        source: e,
    })?;
    parse_str(&source, &origin)
}

/// Serialize an AST back to YAML.
///
/// Round-trip property: `parse_str(to_yaml(rs)) == rs` for any parsed `rs`,
/// since serialization always emits canonical operator spellings.
pub fn to_yaml(ruleset: &RuleSet) -> Result<String, serde_yaml::Error> {
    serde_yaml::to_string(ruleset)
}

fn check_rule_structure(rule: &Rule, origin: &str) -> Result<(), ParseError> {
    for action in &rule.actions {
        if let Action::SetValue(sv) = action {
            match (&sv.value, &sv.value_expression) {
                (Some(_), Some(_)) => {
                    return Err(ParseError::Structure {
                        origin: origin.to_string(),
                        rule: rule.name.clone(),
                        message: format!(
                            "set_value for '{}' has both value and value_expression",
                            sv.key
                        ),
                    });
                }
                (None, None) => {
                    return Err(ParseError::Structure {
                        origin: origin.to_string(),
                        rule: rule.name.clone(),
                        message: format!(
                            "set_value for '{}' needs one of value or value_expression",
                            sv.key
                        ),
                    });
                }
                _ => {}
            }
        }
    }
    Ok(())
}
