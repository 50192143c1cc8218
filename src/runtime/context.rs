use crate::runtime::ids::NodeId;
use crate::runtime::variables::Variables;
use serde_json::Value;
use std::collections::VecDeque;

/// What an order can see and touch while it is being entered.
pub struct Context<'a> {
    node: NodeId,
    node_name: &'a str,
    order_index: usize,
    variables: &'a mut Variables,
    messages: &'a mut VecDeque<String>,
}

impl<'a> Context<'a> {
    pub(crate) fn new(
        node: NodeId,
        node_name: &'a str,
        order_index: usize,
        variables: &'a mut Variables,
        messages: &'a mut VecDeque<String>,
    ) -> Self {
        Self {
            node,
            node_name,
            order_index,
            variables,
            messages,
        }
    }

    pub fn node(&self) -> NodeId {
        self.node
    }

    pub fn node_name(&self) -> &str {
        self.node_name
    }

    pub fn order_index(&self) -> usize {
        self.order_index
    }

    pub fn get_var(&self, key: &str) -> Option<Value> {
        self.variables.get(key)
    }

    pub fn set_var(&mut self, key: &str, value: Value) {
        self.variables.set(key, value);
    }

    pub fn variables(&self) -> &Variables {
        self.variables
    }

    pub fn variables_mut(&mut self) -> &mut Variables {
        self.variables
    }

    /// Queues a message; nodes listening for it are considered on the next tick.
    pub fn broadcast(&mut self, message: &str) {
        self.messages.push_back(message.to_string());
    }
}
