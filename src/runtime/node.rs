use crate::error::{FlowError, FlowResult};
use crate::runtime::handler::EventHandler;
use crate::runtime::ids::{GroupId, ItemId, LinkTarget, NodeId};
use crate::runtime::lock::LockLinks;
use crate::runtime::order::Order;
use serde_json::Value;
use std::time::Instant;
use uuid::Uuid;

/// An order together with the bookkeeping its node keeps about it.
#[derive(Debug)]
pub struct OrderSlot {
    item_id: ItemId,
    kind: String,
    params: Value,
    index: usize,
    pub enabled: bool,
    /// Nesting level inside conditional blocks.
    pub indent: usize,
    executing: bool,
    last_entered: Option<Instant>,
    pub(crate) order: Box<dyn Order>,
}

impl OrderSlot {
    pub(crate) fn new(item_id: ItemId, kind: &str, params: Value, order: Box<dyn Order>) -> Self {
        Self {
            item_id,
            kind: kind.to_string(),
            params,
            index: 0,
            enabled: true,
            indent: 0,
            executing: false,
            last_entered: None,
            order,
        }
    }

    pub fn item_id(&self) -> ItemId {
        self.item_id
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn params(&self) -> &Value {
        &self.params
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn is_executing(&self) -> bool {
        self.executing
    }

    /// When the order was last entered; drives the editor's highlight fade.
    pub fn last_entered(&self) -> Option<Instant> {
        self.last_entered
    }

    pub fn summary(&self) -> String {
        self.order.summary()
    }

    pub fn connected_nodes(&self) -> Vec<NodeId> {
        self.order.connected_nodes()
    }

    pub(crate) fn mark_entered(&mut self) {
        self.executing = true;
        self.last_entered = Some(Instant::now());
    }

    pub(crate) fn clear_executing(&mut self) {
        self.executing = false;
    }
}

/// An ordered list of orders plus trigger and lock metadata.
#[derive(Debug)]
pub struct Node {
    id: NodeId,
    pub(crate) name: String,
    pub description: String,
    pub(crate) orders: Vec<OrderSlot>,
    pub(crate) handler: Option<EventHandler>,
    /// Whether the node may run again after its first execution.
    pub repeatable: bool,
    /// Whether execution counts are written into save snapshots.
    pub saveable: bool,
    pub(crate) group: Option<GroupId>,
    pub(crate) links: LockLinks,
    pub(crate) execution_count: u32,
    pub(crate) finished_count: u32,
    pub(crate) current_index: usize,
    pub(crate) running: bool,
    pub(crate) in_flight: bool,
    pub(crate) yielded: bool,
    pub(crate) run_id: Uuid,
}

impl Node {
    pub(crate) fn new(id: NodeId, name: String) -> Self {
        Self {
            id,
            name,
            description: String::new(),
            orders: Vec::new(),
            handler: None,
            repeatable: true,
            saveable: true,
            group: None,
            links: LockLinks::default(),
            execution_count: 0,
            finished_count: 0,
            current_index: 0,
            running: false,
            in_flight: false,
            yielded: false,
            run_id: Uuid::new_v4(),
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn orders(&self) -> &[OrderSlot] {
        &self.orders
    }

    pub fn order(&self, index: usize) -> Option<&OrderSlot> {
        self.orders.get(index)
    }

    pub fn order_by_item(&self, item_id: ItemId) -> Option<&OrderSlot> {
        self.orders.iter().find(|slot| slot.item_id == item_id)
    }

    pub fn handler(&self) -> Option<&EventHandler> {
        self.handler.as_ref()
    }

    pub fn group(&self) -> Option<GroupId> {
        self.group
    }

    pub fn target_key(&self) -> Option<LinkTarget> {
        self.links.target_key
    }

    pub fn target_unlock(&self) -> Option<LinkTarget> {
        self.links.target_unlock
    }

    /// Own lock flag only; the engine also considers the node's group.
    pub fn is_locked(&self) -> bool {
        self.links.locked
    }

    pub fn execution_count(&self) -> u32 {
        self.execution_count
    }

    pub fn finished_count(&self) -> u32 {
        self.finished_count
    }

    /// A node counts as complete once it has finished at least one run.
    pub fn is_complete(&self) -> bool {
        self.finished_count > 0
    }

    pub fn current_index(&self) -> usize {
        self.current_index
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// True while an entered order has not yet signalled.
    pub fn is_waiting(&self) -> bool {
        self.running && self.in_flight
    }

    pub(crate) fn ensure_editable(&self) -> FlowResult<()> {
        if self.running {
            return Err(FlowError::NodeRunning(self.name.clone()));
        }
        Ok(())
    }

    pub(crate) fn check_index(&self, index: usize) -> FlowResult<()> {
        if index >= self.orders.len() {
            return Err(FlowError::OrderIndex {
                node: self.name.clone(),
                index,
                len: self.orders.len(),
            });
        }
        Ok(())
    }

    pub(crate) fn insert_slot(&mut self, at: usize, slot: OrderSlot) -> FlowResult<()> {
        if at > self.orders.len() {
            return Err(FlowError::OrderIndex {
                node: self.name.clone(),
                index: at,
                len: self.orders.len(),
            });
        }
        self.orders.insert(at, slot);
        self.reindex();
        Ok(())
    }

    pub(crate) fn remove_slot(&mut self, index: usize) -> FlowResult<OrderSlot> {
        self.check_index(index)?;
        let slot = self.orders.remove(index);
        self.reindex();
        Ok(slot)
    }

    pub(crate) fn move_slot(&mut self, from: usize, to: usize) -> FlowResult<()> {
        self.check_index(from)?;
        self.check_index(to)?;
        let slot = self.orders.remove(from);
        self.orders.insert(to, slot);
        self.reindex();
        Ok(())
    }

    fn reindex(&mut self) {
        for (i, slot) in self.orders.iter_mut().enumerate() {
            slot.index = i;
        }
    }

    /// Drops the running state without touching the current index.
    pub(crate) fn halt(&mut self) {
        if let Some(slot) = self.orders.get_mut(self.current_index) {
            slot.clear_executing();
        }
        self.running = false;
        self.in_flight = false;
        self.yielded = false;
        self.run_id = Uuid::new_v4();
    }
}
