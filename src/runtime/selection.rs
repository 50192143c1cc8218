use crate::error::{FlowError, FlowResult};
use crate::runtime::engine::Engine;
use crate::runtime::ids::NodeId;

/// Nodes and orders picked in an authoring tool. The last selected node is
/// the active one; order indices refer to it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selection {
    nodes: Vec<NodeId>,
    orders: Vec<usize>,
}

impl Selection {
    pub fn nodes(&self) -> &[NodeId] {
        &self.nodes
    }

    pub fn active_node(&self) -> Option<NodeId> {
        self.nodes.last().copied()
    }

    pub fn orders(&self) -> &[usize] {
        &self.orders
    }

    pub(crate) fn forget_node(&mut self, id: NodeId) {
        if self.active_node() == Some(id) {
            self.orders.clear();
        }
        self.nodes.retain(|n| *n != id);
    }

    pub(crate) fn forget_orders(&mut self, id: NodeId) {
        if self.active_node() == Some(id) {
            self.orders.clear();
        }
    }
}

impl Engine {
    pub fn selection(&self) -> &Selection {
        &self.selection
    }

    /// Selects `id`, replacing the selection unless `additive`.
    pub fn select_node(&mut self, id: NodeId, additive: bool) -> FlowResult<()> {
        if self.node(id).is_none() {
            return Err(FlowError::UnknownNode(id));
        }
        if !additive {
            self.selection.nodes.clear();
        }
        self.selection.nodes.retain(|n| *n != id);
        self.selection.nodes.push(id);
        self.selection.orders.clear();
        Ok(())
    }

    pub fn deselect_node(&mut self, id: NodeId) {
        self.selection.forget_node(id);
    }

    pub fn clear_selection(&mut self) {
        self.selection = Selection::default();
    }

    /// Selects orders of the active node by index.
    pub fn select_orders(&mut self, indices: &[usize]) -> FlowResult<()> {
        let active = self.selection.active_node().ok_or(FlowError::NothingSelected)?;
        let node = self.node(active).ok_or(FlowError::UnknownNode(active))?;
        for &i in indices {
            node.check_index(i)?;
        }
        let mut orders = indices.to_vec();
        orders.sort_unstable();
        orders.dedup();
        self.selection.orders = orders;
        Ok(())
    }

    /// Replays the active node from its first selected order, or from the
    /// top when no order is selected.
    pub fn play_selected(&mut self) -> FlowResult<bool> {
        let Some(active) = self.selection.active_node() else {
            return Ok(false);
        };
        let from = self.selection.orders.first().copied().unwrap_or(0);
        self.play_from(active, from)
    }
}
