use crate::runtime::ids::{GroupId, LinkTarget, NodeId};
use crate::runtime::variables::CompareOperator;
use serde_json::Value;
use thiserror::Error;

/// Errors returned by the engine's execution and authoring API.
#[derive(Error, Debug)]
pub enum FlowError {
    #[error("Node {0} not found")]
    UnknownNode(NodeId),

    #[error("Group {0} not found")]
    UnknownGroup(GroupId),

    #[error("Node name '{0}' is already in use")]
    DuplicateName(String),

    #[error("{0} cannot be linked to itself")]
    SelfLink(LinkTarget),

    #[error("Letting {from} unlock {to} would create a lock cycle")]
    LockCycle { from: LinkTarget, to: LinkTarget },

    #[error("A group needs at least two members, got {0}")]
    GroupTooSmall(usize),

    #[error("Node {node} already belongs to {group}")]
    AlreadyGrouped { node: NodeId, group: GroupId },

    #[error("Node {node} is not a member of {group}")]
    NotAMember { node: NodeId, group: GroupId },

    #[error("Order index {index} is out of range for node '{node}' ({len} orders)")]
    OrderIndex { node: String, index: usize, len: usize },

    #[error("Node '{0}' cannot be edited while it is running")]
    NodeRunning(String),

    #[error("No node is selected")]
    NothingSelected,

    #[error("Unknown order kind '{0}'")]
    UnknownOrderKind(String),

    #[error("Failed to prepare order '{kind}': {source}")]
    PrepareOrder {
        kind: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Order {index} in node '{node}' failed: {source}")]
    OrderFailed {
        node: String,
        index: usize,
        #[source]
        source: anyhow::Error,
    },

    #[error("Variable '{0}' not found")]
    VariableNotFound(String),

    #[error("Cannot compare {left} with {right} using '{operator}'")]
    TypeMismatch {
        operator: CompareOperator,
        left: Value,
        right: Value,
    },
}

pub type FlowResult<T> = Result<T, FlowError>;
