use crate::error::{FlowError, FlowResult};
use crate::runtime::context::Context;
use crate::runtime::ids::NodeId;
use crate::runtime::syscall::Syscall;
use anyhow::Result;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt::Debug;

/// A single executable step owned by a node.
pub trait Order: Send + Debug {
    /// Begins the step. Signal completion through `syscall`, now or later
    /// through a handle from [`Syscall::suspend`].
    fn on_enter(&mut self, ctx: &mut Context<'_>, syscall: &mut dyn Syscall) -> Result<()>;

    /// Human readable description. Authoring problems start with `"Error: "`.
    fn summary(&self) -> String {
        String::new()
    }

    /// Nodes this order may hand control to.
    fn connected_nodes(&self) -> Vec<NodeId> {
        Vec::new()
    }
}

/// Factory for one order kind.
pub trait OrderDefinition: Send + Sync {
    fn name(&self) -> &str;
    fn validate(&self, params: &Value) -> Result<()>;
    fn prepare(&self, params: Value) -> Result<Box<dyn Order>>;
}

/// Maps order kinds to their definitions.
#[derive(Default)]
pub struct OrderRegistry {
    definitions: HashMap<String, Box<dyn OrderDefinition>>,
}

impl OrderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in order.
    pub fn standard() -> Self {
        let mut registry = Self::new();
        crate::orders::register_standard_orders(&mut registry);
        registry
    }

    pub fn register(&mut self, definition: Box<dyn OrderDefinition>) {
        self.definitions.insert(definition.name().to_string(), definition);
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.definitions.contains_key(kind)
    }

    pub fn kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self.definitions.keys().map(String::as_str).collect();
        kinds.sort_unstable();
        kinds
    }

    pub fn prepare(&self, kind: &str, params: Value) -> FlowResult<Box<dyn Order>> {
        let def = self.definitions.get(kind)
            .ok_or_else(|| FlowError::UnknownOrderKind(kind.to_string()))?;
        def.validate(&params)
            .and_then(|_| def.prepare(params))
            .map_err(|source| FlowError::PrepareOrder { kind: kind.to_string(), source })
    }
}
