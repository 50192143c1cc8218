use crate::orders::interpolate;
use crate::runtime::context::Context;
use crate::runtime::order::{Order, OrderDefinition};
use crate::runtime::syscall::Syscall;
use serde_json::Value;
use anyhow::Result;
use tracing::info;

#[derive(Debug)]
pub struct LogOrder {
    msg: String,
}

pub struct LogDefinition;

impl OrderDefinition for LogDefinition {
    fn name(&self) -> &str { "log" }
    fn validate(&self, _params: &Value) -> Result<()> { Ok(()) }
    fn prepare(&self, params: Value) -> Result<Box<dyn Order>> {
        let msg = params.get("msg").and_then(|v| v.as_str()).unwrap_or_default().to_string();
        Ok(Box::new(LogOrder { msg }))
    }
}

impl Order for LogOrder {
    fn on_enter(&mut self, ctx: &mut Context<'_>, syscall: &mut dyn Syscall) -> Result<()> {
        let text = interpolate(&self.msg, |k| ctx.get_var(k));
        info!(node = %ctx.node_name(), "[LOG] {}", text);
        syscall.proceed();
        Ok(())
    }

    fn summary(&self) -> String {
        self.msg.clone()
    }
}

#[derive(Debug)]
pub struct StopOrder;

pub struct StopDefinition;

impl OrderDefinition for StopDefinition {
    fn name(&self) -> &str { "stop" }
    fn validate(&self, _params: &Value) -> Result<()> { Ok(()) }
    fn prepare(&self, _params: Value) -> Result<Box<dyn Order>> {
        Ok(Box::new(StopOrder))
    }
}

impl Order for StopOrder {
    fn on_enter(&mut self, _ctx: &mut Context<'_>, syscall: &mut dyn Syscall) -> Result<()> {
        syscall.stop();
        Ok(())
    }

    fn summary(&self) -> String {
        "Stop".to_string()
    }
}
