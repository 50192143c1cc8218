use crate::dsl::{CompletionDef, NodeDef, Story, TriggerDef};
use crate::runtime::condition::Condition;
use crate::runtime::engine::Engine;
use crate::runtime::group::Completion;
use crate::runtime::handler::{ConditionalEventHandler, EventHandler};
use crate::runtime::ids::{GroupId, LinkTarget, NodeId};
use crate::runtime::order::OrderRegistry;
use crate::runtime::variables::{GlobalVariables, VariableScope};
use anyhow::{Context as AnyhowContext, Result, anyhow};
use serde_json::{Value, json};
use std::collections::{HashMap, HashSet};
use tracing::info;

/// Turns a [`Story`] into a ready-to-run [`Engine`].
pub struct Compiler {
    registry: OrderRegistry,
    globals: Option<GlobalVariables>,
    id_map: HashMap<String, NodeId>,
    group_map: HashMap<String, GroupId>,
}

impl Default for Compiler {
    fn default() -> Self {
        Self::new()
    }
}

impl Compiler {
    pub fn new() -> Self {
        Self::with_registry(OrderRegistry::standard())
    }

    pub fn with_registry(registry: OrderRegistry) -> Self {
        Self {
            registry,
            globals: None,
            id_map: HashMap::new(),
            group_map: HashMap::new(),
        }
    }

    /// Compiled engines share `globals` instead of owning their own.
    pub fn with_globals(mut self, globals: GlobalVariables) -> Self {
        self.globals = Some(globals);
        self
    }

    pub fn compile(mut self, story: Story) -> Result<Engine> {
        let registry = std::mem::take(&mut self.registry);
        let mut engine = Engine::with_config(registry, story.settings.clone());
        if let Some(globals) = self.globals.take() {
            engine = engine.with_globals(globals);
        }

        // 1. Pass 1: Indexing
        for def in &story.nodes {
            if self.id_map.contains_key(&def.name) {
                return Err(anyhow!("Duplicate node name: {}", def.name));
            }
            let id = engine.add_node(&def.name);
            if let Some(node) = engine.node_mut(id) {
                node.description = def.description.clone();
                node.repeatable = def.repeatable;
                node.saveable = def.saveable;
            }
            self.id_map.insert(def.name.clone(), id);
        }
        let mut group_names = HashSet::new();
        for group in &story.groups {
            if self.id_map.contains_key(&group.name) || !group_names.insert(group.name.as_str()) {
                return Err(anyhow!("Duplicate group name: {}", group.name));
            }
        }

        for (k, v) in &story.variables {
            engine.variables_mut().declare(k, v.clone(), VariableScope::Local);
        }
        for (k, v) in &story.globals {
            if !engine.variables().globals().contains(k) {
                engine.variables_mut().declare(k, v.clone(), VariableScope::Global);
            }
        }

        // 2. Pass 2: Handlers and orders
        for def in &story.nodes {
            let id = self.resolve_node(&def.name)?;
            self.compile_node(&mut engine, id, def)
                .with_context(|| format!("Failed to compile node '{}'", def.name))?;
        }

        // 3. Pass 3: Groups and links
        for def in &story.groups {
            let members = def.members.iter()
                .map(|m| self.resolve_node(m))
                .collect::<Result<Vec<_>>>()
                .with_context(|| format!("Invalid members in group '{}'", def.name))?;
            let completion = match &def.completion {
                CompletionDef::All => Completion::SpecificNodes(members.clone()),
                CompletionDef::SpecificNodes { nodes } => Completion::SpecificNodes(
                    nodes.iter().map(|n| self.resolve_node(n)).collect::<Result<Vec<_>>>()?,
                ),
                CompletionDef::Threshold { count } => Completion::Threshold(*count),
            };
            let id = engine.create_group(&def.name, &members, completion)
                .with_context(|| format!("Failed to create group '{}'", def.name))?;
            if let Some(group) = engine.group_mut(id) {
                group.minimised = def.minimised;
                group.tint = def.tint;
            }
            self.group_map.insert(def.name.clone(), id);
        }

        let mut keyed = HashSet::new();
        let mut unlocking = HashSet::new();
        for link in &story.links {
            let from = self.resolve_target(&link.from)?;
            let to = self.resolve_target(&link.to)?;
            if !unlocking.insert(from) {
                return Err(anyhow!("'{}' already unlocks another target", link.from));
            }
            if !keyed.insert(to) {
                return Err(anyhow!("'{}' is already unlocked by another source", link.to));
            }
            engine.set_target_unlock(from, Some(to))
                .with_context(|| format!("Invalid link {} -> {}", link.from, link.to))?;
        }

        info!(
            story = %story.id,
            nodes = story.nodes.len(),
            groups = story.groups.len(),
            links = story.links.len(),
            "Story compiled"
        );
        Ok(engine)
    }

    fn compile_node(&self, engine: &mut Engine, id: NodeId, def: &NodeDef) -> Result<()> {
        let handler = match &def.trigger {
            None => None,
            Some(TriggerDef::GameStarted) => Some(EventHandler::GameStarted),
            Some(TriggerDef::Message { message }) => Some(EventHandler::Message(message.clone())),
            Some(TriggerDef::Conditional { mode, conditions }) => {
                let conditions = conditions.iter()
                    .map(Condition::from_def)
                    .collect::<Result<Vec<_>>>()?;
                Some(EventHandler::Conditional(ConditionalEventHandler::new(*mode, conditions)))
            }
        };
        engine.set_handler(id, handler)?;

        for (index, order) in def.orders.iter().enumerate() {
            let params = self.resolve_params(&order.params)
                .with_context(|| format!("Order {} ({})", index, order.kind))?;
            engine.add_order(id, &order.kind, params)?;
            engine.set_order_enabled(id, index, order.enabled)?;
            engine.set_order_indent(id, index, order.indent)?;
        }
        Ok(())
    }

    /// Replaces a `node` name with its id.
    fn resolve_params(&self, params: &Value) -> Result<Value> {
        let mut params = match params {
            Value::Null => json!({}),
            other => other.clone(),
        };
        if let Some(obj) = params.as_object_mut() {
            if let Some(Value::String(name)) = obj.get("node") {
                let id = self.resolve_node(name)?;
                obj.insert("node".to_string(), json!(id.0));
            }
        }
        Ok(params)
    }

    fn resolve_node(&self, name: &str) -> Result<NodeId> {
        self.id_map.get(name)
            .copied()
            .ok_or_else(|| anyhow!("Target node not found: {}", name))
    }

    fn resolve_target(&self, name: &str) -> Result<LinkTarget> {
        if let Some(id) = self.id_map.get(name) {
            return Ok(LinkTarget::Node(*id));
        }
        self.group_map.get(name)
            .map(|id| LinkTarget::Group(*id))
            .ok_or_else(|| anyhow!("Link target not found: {}", name))
    }
}
