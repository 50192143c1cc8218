pub mod builder;

use crate::runtime::condition::ConditionDef;
use crate::runtime::engine::EngineConfig;
use crate::runtime::handler::FireMode;
use serde::{Serialize, Deserialize};
use serde_json::Value;
use std::collections::HashMap;

fn yes() -> bool {
    true
}

/// A story as written in a YAML file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Story {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub settings: EngineConfig,
    /// Local variables declared before the engine starts.
    #[serde(default)]
    pub variables: HashMap<String, Value>,
    /// Variables shared with every engine using the same globals.
    #[serde(default)]
    pub globals: HashMap<String, Value>,
    pub nodes: Vec<NodeDef>,
    #[serde(default)]
    pub groups: Vec<GroupDef>,
    #[serde(default)]
    pub links: Vec<LinkDef>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeDef {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub trigger: Option<TriggerDef>,
    #[serde(default = "yes")]
    pub repeatable: bool,
    #[serde(default = "yes")]
    pub saveable: bool,
    #[serde(default)]
    pub orders: Vec<OrderDef>,
}

/// What starts a node.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TriggerDef {
    GameStarted,
    Message {
        message: String,
    },
    Conditional {
        #[serde(default)]
        mode: FireMode,
        #[serde(default)]
        conditions: Vec<ConditionDef>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrderDef {
    pub kind: String,
    /// A `node` entry naming another node is resolved to its id on compile.
    #[serde(default)]
    pub params: Value,
    #[serde(default = "yes")]
    pub enabled: bool,
    #[serde(default)]
    pub indent: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GroupDef {
    pub name: String,
    pub members: Vec<String>,
    #[serde(default)]
    pub completion: CompletionDef,
    #[serde(default)]
    pub minimised: bool,
    #[serde(default)]
    pub tint: Option<[f32; 4]>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CompletionDef {
    /// Every member has to finish.
    #[default]
    All,
    SpecificNodes {
        nodes: Vec<String>,
    },
    Threshold {
        count: usize,
    },
}

/// `from` unlocks `to` once complete. Both ends name a node or a group.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LinkDef {
    pub from: String,
    pub to: String,
}
