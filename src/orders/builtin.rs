use crate::runtime::context::Context;
use crate::runtime::order::{Order, OrderDefinition};
use crate::runtime::syscall::Syscall;
use crate::runtime::variables::{VariableScope, from_eval_value};
use anyhow::{Context as AnyhowContext, Result, anyhow, bail};
use evalexpr::{build_operator_tree, Node as EvalNode};
use serde_json::Value;
use tracing::debug;

#[derive(Debug)]
enum Source {
    Value(Value),
    Expression { tree: EvalNode, raw: String },
}

/// Writes a literal or the result of an expression into a variable.
#[derive(Debug)]
pub struct SetVariableOrder {
    key: String,
    source: Source,
    scope: Option<VariableScope>,
}

pub struct SetVariableDefinition;

impl OrderDefinition for SetVariableDefinition {
    fn name(&self) -> &str { "set_variable" }

    fn validate(&self, params: &Value) -> Result<()> {
        if params.get("key").and_then(|v| v.as_str()).is_none_or(str::is_empty) {
            bail!("Missing 'key'");
        }
        if params.get("value").is_none() && params.get("expression").and_then(|v| v.as_str()).is_none() {
            bail!("Either 'value' or 'expression' is required");
        }
        Ok(())
    }

    fn prepare(&self, params: Value) -> Result<Box<dyn Order>> {
        let key = params.get("key").and_then(|v| v.as_str()).unwrap_or_default().to_string();
        let source = match params.get("expression").and_then(|v| v.as_str()) {
            Some(expr) => {
                let raw = expr.trim().trim_start_matches("${").trim_end_matches('}').to_string();
                let tree = build_operator_tree(&raw)
                    .with_context(|| format!("Invalid expression '{}'", raw))?;
                Source::Expression { tree, raw }
            }
            None => Source::Value(params.get("value").cloned().unwrap_or(Value::Null)),
        };
        let scope = match params.get("scope") {
            Some(v) => Some(serde_json::from_value(v.clone()).context("Invalid 'scope'")?),
            None => None,
        };
        Ok(Box::new(SetVariableOrder { key, source, scope }))
    }
}

impl Order for SetVariableOrder {
    fn on_enter(&mut self, ctx: &mut Context<'_>, syscall: &mut dyn Syscall) -> Result<()> {
        let value = match &self.source {
            Source::Value(v) => v.clone(),
            Source::Expression { tree, raw } => {
                let eval_ctx = ctx.variables().eval_context();
                let result = tree.eval_with_context(&eval_ctx)
                    .with_context(|| format!("Failed to evaluate '{}'", raw))?;
                from_eval_value(result).ok_or_else(|| anyhow!("'{}' did not produce a storable value", raw))?
            }
        };
        debug!(node = %ctx.node_name(), key = %self.key, %value, "Setting variable");
        match self.scope {
            Some(scope) => ctx.variables_mut().declare(&self.key, value, scope),
            None => ctx.set_var(&self.key, value),
        }
        syscall.proceed();
        Ok(())
    }

    fn summary(&self) -> String {
        match &self.source {
            Source::Value(v) => format!("{} = {}", self.key, v),
            Source::Expression { raw, .. } => format!("{} = {}", self.key, raw),
        }
    }
}
