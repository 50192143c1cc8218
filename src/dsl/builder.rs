use crate::dsl::{CompletionDef, GroupDef, LinkDef, NodeDef, OrderDef, Story, TriggerDef};
use crate::runtime::condition::ConditionDef;
use crate::runtime::engine::EngineConfig;
use crate::runtime::handler::FireMode;
use serde_json::Value;
use std::collections::HashMap;

pub struct StoryBuilder {
    id: String,
    name: String,
    settings: EngineConfig,
    variables: HashMap<String, Value>,
    globals: HashMap<String, Value>,
    pub nodes: Vec<NodeDef>,
    groups: Vec<GroupDef>,
    links: Vec<LinkDef>,
}

impl StoryBuilder {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            name: id.to_string(),
            settings: EngineConfig::default(),
            variables: HashMap::new(),
            globals: HashMap::new(),
            nodes: Vec::new(),
            groups: Vec::new(),
            links: Vec::new(),
        }
    }

    pub fn name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    pub fn settings(mut self, settings: EngineConfig) -> Self {
        self.settings = settings;
        self
    }

    pub fn var(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.variables.insert(key.to_string(), value.into());
        self
    }

    pub fn global(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.globals.insert(key.to_string(), value.into());
        self
    }

    pub fn node(self, name: &str) -> NodeBuilder {
        NodeBuilder {
            story_builder: self,
            def: NodeDef {
                name: name.to_string(),
                description: String::new(),
                trigger: None,
                repeatable: true,
                saveable: true,
                orders: Vec::new(),
            },
        }
    }

    pub fn group(mut self, name: &str, members: &[&str], completion: CompletionDef) -> Self {
        self.groups.push(GroupDef {
            name: name.to_string(),
            members: members.iter().map(|m| m.to_string()).collect(),
            completion,
            minimised: false,
            tint: None,
        });
        self
    }

    /// `from` unlocks `to`.
    pub fn link(mut self, from: &str, to: &str) -> Self {
        self.links.push(LinkDef {
            from: from.to_string(),
            to: to.to_string(),
        });
        self
    }

    pub fn build(self) -> Story {
        Story {
            id: self.id,
            name: self.name,
            settings: self.settings,
            variables: self.variables,
            globals: self.globals,
            nodes: self.nodes,
            groups: self.groups,
            links: self.links,
        }
    }
}

pub struct NodeBuilder {
    story_builder: StoryBuilder,
    def: NodeDef,
}

impl NodeBuilder {
    pub fn description(mut self, text: &str) -> Self {
        self.def.description = text.to_string();
        self
    }

    pub fn on_start(mut self) -> Self {
        self.def.trigger = Some(TriggerDef::GameStarted);
        self
    }

    pub fn on_message(mut self, message: &str) -> Self {
        self.def.trigger = Some(TriggerDef::Message { message: message.to_string() });
        self
    }

    pub fn when(mut self, mode: FireMode, conditions: Vec<ConditionDef>) -> Self {
        self.def.trigger = Some(TriggerDef::Conditional { mode, conditions });
        self
    }

    pub fn repeatable(mut self, repeatable: bool) -> Self {
        self.def.repeatable = repeatable;
        self
    }

    pub fn saveable(mut self, saveable: bool) -> Self {
        self.def.saveable = saveable;
        self
    }

    pub fn order(mut self, kind: &str, params: Value) -> Self {
        self.def.orders.push(OrderDef {
            kind: kind.to_string(),
            params,
            enabled: true,
            indent: 0,
        });
        self
    }

    /// Adds an order that is skipped at run time.
    pub fn disabled_order(mut self, kind: &str, params: Value) -> Self {
        self.def.orders.push(OrderDef {
            kind: kind.to_string(),
            params,
            enabled: false,
            indent: 0,
        });
        self
    }

    pub fn build(mut self) -> StoryBuilder {
        self.story_builder.nodes.push(self.def);
        self.story_builder
    }
}
