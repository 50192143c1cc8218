use crate::runtime::context::Context;
use crate::runtime::ids::NodeId;
use crate::runtime::order::{Order, OrderDefinition};
use crate::runtime::syscall::Syscall;
use anyhow::{Result, bail};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

fn index_param(params: &Value, key: &str) -> Option<usize> {
    params.get(key).and_then(|v| v.as_u64()).map(|i| i as usize)
}

/// Continues from another order of the same node.
#[derive(Debug)]
pub struct JumpOrder {
    index: Option<usize>,
}

pub struct JumpDefinition;

impl OrderDefinition for JumpDefinition {
    fn name(&self) -> &str { "jump" }
    fn validate(&self, params: &Value) -> Result<()> {
        if let Some(v) = params.get("index") {
            if !v.is_u64() && !v.is_null() {
                bail!("'index' must be a non-negative integer, got {}", v);
            }
        }
        Ok(())
    }
    fn prepare(&self, params: Value) -> Result<Box<dyn Order>> {
        Ok(Box::new(JumpOrder { index: index_param(&params, "index") }))
    }
}

impl Order for JumpOrder {
    fn on_enter(&mut self, ctx: &mut Context<'_>, syscall: &mut dyn Syscall) -> Result<()> {
        match self.index {
            Some(index) => syscall.jump(index),
            None => {
                warn!(node = %ctx.node_name(), "Jump without a target index, skipping");
                syscall.proceed();
            }
        }
        Ok(())
    }

    fn summary(&self) -> String {
        match self.index {
            Some(index) => format!("Jump to order {}", index),
            None => "Error: no order index selected".to_string(),
        }
    }
}

/// Hands control to another node.
#[derive(Debug)]
pub struct CallOrder {
    target: Option<NodeId>,
    index: usize,
}

pub struct CallDefinition;

impl OrderDefinition for CallDefinition {
    fn name(&self) -> &str { "call" }
    fn validate(&self, params: &Value) -> Result<()> {
        if let Some(v) = params.get("node") {
            if !v.is_u64() && !v.is_null() {
                bail!("'node' must be a node id, got {}", v);
            }
        }
        Ok(())
    }
    fn prepare(&self, params: Value) -> Result<Box<dyn Order>> {
        Ok(Box::new(CallOrder {
            target: index_param(&params, "node").map(NodeId),
            index: index_param(&params, "index").unwrap_or(0),
        }))
    }
}

impl Order for CallOrder {
    fn on_enter(&mut self, ctx: &mut Context<'_>, syscall: &mut dyn Syscall) -> Result<()> {
        match self.target {
            Some(target) => syscall.branch(target, self.index),
            None => {
                warn!(node = %ctx.node_name(), "Call without a target node, skipping");
                syscall.proceed();
            }
        }
        Ok(())
    }

    fn summary(&self) -> String {
        match self.target {
            Some(target) if self.index == 0 => format!("Call node {}", target),
            Some(target) => format!("Call node {} at order {}", target, self.index),
            None => "Error: no target node selected".to_string(),
        }
    }

    fn connected_nodes(&self) -> Vec<NodeId> {
        self.target.into_iter().collect()
    }
}

/// Suspends the node for a while.
#[derive(Debug)]
pub struct WaitOrder {
    duration: Duration,
}

pub struct WaitDefinition;

impl OrderDefinition for WaitDefinition {
    fn name(&self) -> &str { "wait" }
    fn validate(&self, params: &Value) -> Result<()> {
        match params.get("duration_ms") {
            Some(v) if v.is_u64() => Ok(()),
            Some(v) => bail!("'duration_ms' must be a non-negative integer, got {}", v),
            None => bail!("Missing 'duration_ms'"),
        }
    }
    fn prepare(&self, params: Value) -> Result<Box<dyn Order>> {
        let ms = params.get("duration_ms").and_then(|v| v.as_u64()).unwrap_or(0);
        Ok(Box::new(WaitOrder { duration: Duration::from_millis(ms) }))
    }
}

impl Order for WaitOrder {
    fn on_enter(&mut self, ctx: &mut Context<'_>, syscall: &mut dyn Syscall) -> Result<()> {
        let handle = syscall.suspend();
        let duration = self.duration;
        match tokio::runtime::Handle::try_current() {
            Ok(rt) => {
                debug!(node = %ctx.node_name(), ?duration, "Waiting");
                rt.spawn(async move {
                    tokio::time::sleep(duration).await;
                    handle.proceed();
                });
            }
            Err(_) => {
                warn!(node = %ctx.node_name(), "No async runtime for wait, continuing next tick");
                handle.proceed();
            }
        }
        Ok(())
    }

    fn summary(&self) -> String {
        format!("Wait {} ms", self.duration.as_millis())
    }
}

/// Sends a message to nodes listening for it.
#[derive(Debug)]
pub struct BroadcastOrder {
    message: String,
}

pub struct BroadcastDefinition;

impl OrderDefinition for BroadcastDefinition {
    fn name(&self) -> &str { "broadcast" }
    fn validate(&self, _params: &Value) -> Result<()> { Ok(()) }
    fn prepare(&self, params: Value) -> Result<Box<dyn Order>> {
        let message = params.get("message").and_then(|v| v.as_str()).unwrap_or_default().to_string();
        Ok(Box::new(BroadcastOrder { message }))
    }
}

impl Order for BroadcastOrder {
    fn on_enter(&mut self, ctx: &mut Context<'_>, syscall: &mut dyn Syscall) -> Result<()> {
        if self.message.is_empty() {
            warn!(node = %ctx.node_name(), "Broadcast without a message, skipping");
        } else {
            ctx.broadcast(&self.message);
        }
        syscall.proceed();
        Ok(())
    }

    fn summary(&self) -> String {
        if self.message.is_empty() {
            "Error: no message".to_string()
        } else {
            format!("Broadcast '{}'", self.message)
        }
    }
}
