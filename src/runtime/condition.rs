use crate::error::FlowError;
use crate::runtime::variables::{CompareOperator, Variables};
use anyhow::Result;
use evalexpr::{build_operator_tree, Node as EvalNode};
use serde::{Serialize, Deserialize};
use serde_json::Value;
use tracing::warn;

/// Serializable form of a condition, as written in a story file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConditionDef {
    Compare {
        variable: String,
        operator: CompareOperator,
        value: Value,
    },
    Expression {
        expr: String,
    },
}

/// A prepared boolean check over variables.
#[derive(Debug)]
pub enum Condition {
    Compare {
        variable: String,
        operator: CompareOperator,
        value: Value,
    },
    Expression {
        tree: EvalNode,
        raw: String,
    },
}

impl Condition {
    pub fn compare(variable: &str, operator: CompareOperator, value: impl Into<Value>) -> Self {
        Condition::Compare {
            variable: variable.to_string(),
            operator,
            value: value.into(),
        }
    }

    pub fn expression(expr: &str) -> Result<Self> {
        let raw = strip_placeholders(expr);
        let tree = build_operator_tree(&raw)?;
        Ok(Condition::Expression { tree, raw })
    }

    pub fn from_def(def: &ConditionDef) -> Result<Self> {
        match def {
            ConditionDef::Compare { variable, operator, value } => {
                Ok(Condition::compare(variable, *operator, value.clone()))
            }
            ConditionDef::Expression { expr } => Condition::expression(expr),
        }
    }

    /// Never fails: a missing variable or a broken expression counts as false.
    pub fn evaluate(&self, vars: &Variables) -> bool {
        match self {
            Condition::Compare { variable, operator, value } => {
                match vars.evaluate(variable, *operator, value) {
                    Ok(result) => result,
                    Err(FlowError::VariableNotFound(key)) => {
                        warn!(variable = %key, "Condition references a missing variable, treating as false");
                        false
                    }
                    Err(e) => {
                        warn!(variable = %variable, error = %e, "Condition failed, treating as false");
                        false
                    }
                }
            }
            Condition::Expression { tree, raw } => {
                tree.eval_boolean_with_context(&vars.eval_context())
                    .unwrap_or_else(|e| {
                        warn!(expr = %raw, error = %e, "Condition expression failed, treating as false");
                        false
                    })
            }
        }
    }

    pub fn summary(&self) -> String {
        match self {
            Condition::Compare { variable, operator, value } => format!("{} {} {}", variable, operator, value),
            Condition::Expression { raw, .. } => raw.clone(),
        }
    }
}

/// Turns `${name}` placeholders into bare names and drops a `${ ... }`
/// wrapper around the whole expression. Other braces are left alone.
fn strip_placeholders(expr: &str) -> String {
    let mut out = String::with_capacity(expr.len());
    let mut rest = expr;
    while let Some(start) = rest.find("${") {
        let after = &rest[start + 2..];
        let name_len = after
            .find(|c: char| !(c.is_alphanumeric() || c == '_' || c == '.'))
            .unwrap_or(after.len());
        out.push_str(&rest[..start]);
        if name_len > 0 && after[name_len..].starts_with('}') {
            out.push_str(&after[..name_len]);
            rest = &after[name_len + 1..];
        } else {
            out.push_str("${");
            rest = after;
        }
    }
    out.push_str(rest);

    let trimmed = out.trim();
    match trimmed.strip_prefix("${").and_then(|inner| inner.strip_suffix('}')) {
        Some(inner) => inner.trim().to_string(),
        None => out,
    }
}
