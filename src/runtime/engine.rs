use crate::error::{FlowError, FlowResult};
use crate::runtime::context::Context;
use crate::runtime::handler::{EventHandler, FireMode};
use crate::runtime::ids::{GroupId, ItemId, LinkTarget, NodeId};
use crate::runtime::group::Group;
use crate::runtime::node::{Node, OrderSlot};
use crate::runtime::order::{Order, OrderRegistry};
use crate::runtime::selection::Selection;
use crate::runtime::syscall::{Step, Syscall};
use crate::runtime::task::{ContinueHandle, Resume};
use crate::runtime::variables::{GlobalVariables, Variables};
use serde::{Serialize, Deserialize};
use serde_json::Value;
use std::collections::VecDeque;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Orders one node may enter back to back before yielding to the next tick.
    pub max_steps_per_tick: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_steps_per_tick: 10_000,
        }
    }
}

impl EngineConfig {
    /// The budget actually applied. Zero would stall every node, so it
    /// counts as one.
    pub fn step_budget(&self) -> usize {
        self.max_steps_per_tick.max(1)
    }
}

/// Observable things that happened since the last [`Engine::drain_events`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlowEvent {
    NodeStarted(NodeId),
    NodeFinished(NodeId),
    NodeStopped(NodeId),
    HandlerFired(NodeId),
    Unlocked(LinkTarget),
    GroupCompleted(GroupId),
}

struct EngineSyscall {
    node: NodeId,
    run_id: Uuid,
    order_index: usize,
    sender: UnboundedSender<Resume>,
    step: Step,
}

impl Syscall for EngineSyscall {
    fn proceed(&mut self) {
        self.step = Step::Next;
    }

    fn jump(&mut self, order_index: usize) {
        self.step = Step::Jump(order_index);
    }

    fn branch(&mut self, node: NodeId, order_index: usize) {
        self.step = Step::Branch { node, index: order_index };
    }

    fn suspend(&mut self) -> ContinueHandle {
        self.step = Step::Pending;
        ContinueHandle::new(self.node, self.run_id, self.order_index, self.sender.clone())
    }

    fn stop(&mut self) {
        self.step = Step::Stop;
    }
}

/// Owns every node and group of one story and schedules their execution.
pub struct Engine {
    id: Uuid,
    config: EngineConfig,
    registry: OrderRegistry,
    pub(crate) nodes: Vec<Option<Node>>,
    pub(crate) groups: Vec<Option<Group>>,
    pub(crate) variables: Variables,
    pub(crate) selection: Selection,
    pub(crate) events: Vec<FlowEvent>,
    next_item_id: u64,
    resume_tx: UnboundedSender<Resume>,
    resume_rx: UnboundedReceiver<Resume>,
    messages: VecDeque<String>,
    started: bool,
    tick_count: u64,
}

impl Engine {
    pub fn new(registry: OrderRegistry) -> Self {
        Self::with_config(registry, EngineConfig::default())
    }

    pub fn with_config(registry: OrderRegistry, config: EngineConfig) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            id: Uuid::new_v4(),
            config,
            registry,
            nodes: Vec::new(),
            groups: Vec::new(),
            variables: Variables::new(),
            selection: Selection::default(),
            events: Vec::new(),
            next_item_id: 1,
            resume_tx: tx,
            resume_rx: rx,
            messages: VecDeque::new(),
            started: false,
            tick_count: 0,
        }
    }

    /// Shares `globals` with every other engine holding the same handle.
    pub fn with_globals(mut self, globals: GlobalVariables) -> Self {
        self.variables = Variables::with_globals(globals);
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn set_config(&mut self, config: EngineConfig) {
        self.config = config;
    }

    pub fn registry(&self) -> &OrderRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut OrderRegistry {
        &mut self.registry
    }

    pub fn variables(&self) -> &Variables {
        &self.variables
    }

    pub fn variables_mut(&mut self) -> &mut Variables {
        &mut self.variables
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }

    pub fn drain_events(&mut self) -> Vec<FlowEvent> {
        std::mem::take(&mut self.events)
    }

    // --- Nodes ---

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.0).and_then(Option::as_ref)
    }

    /// Mutable access for plain settings (description, flags).
    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(id.0).and_then(Option::as_mut)
    }

    fn node_ref(&self, id: NodeId) -> FlowResult<&Node> {
        self.node(id).ok_or(FlowError::UnknownNode(id))
    }

    fn node_mut_ref(&mut self, id: NodeId) -> FlowResult<&mut Node> {
        self.node_mut(id).ok_or(FlowError::UnknownNode(id))
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter().flatten()
    }

    pub fn node_count(&self) -> usize {
        self.nodes().count()
    }

    pub fn find_node(&self, name: &str) -> Option<NodeId> {
        self.nodes().find(|n| n.name == name).map(Node::id)
    }

    /// Adds a node. A taken name gets a numeric suffix.
    pub fn add_node(&mut self, name: &str) -> NodeId {
        let name = self.unique_node_name(name);
        let id = NodeId(self.nodes.len());
        debug!(node = %name, %id, "Node added");
        self.nodes.push(Some(Node::new(id, name)));
        id
    }

    pub fn unique_node_name(&self, base: &str) -> String {
        if self.find_node(base).is_none() {
            return base.to_string();
        }
        (1..)
            .map(|i| format!("{} ({})", base, i))
            .find(|candidate| self.find_node(candidate).is_none())
            .unwrap_or_else(|| base.to_string())
    }

    pub fn rename_node(&mut self, id: NodeId, name: &str) -> FlowResult<()> {
        if self.find_node(name).is_some_and(|other| other != id) {
            return Err(FlowError::DuplicateName(name.to_string()));
        }
        self.node_mut_ref(id)?.name = name.to_string();
        Ok(())
    }

    /// Destroys a node with its orders and handler, healing every reference to it.
    pub fn remove_node(&mut self, id: NodeId) -> FlowResult<()> {
        let group = self.node_ref(id)?.group;
        self.stop_node(id);
        if let Some(g) = group {
            self.remove_from_group(g, id)?;
        }
        self.detach_links(LinkTarget::Node(id));
        self.selection.forget_node(id);
        if let Some(node) = self.nodes.get_mut(id.0).and_then(Option::take) {
            info!(node = %node.name, orders = node.orders.len(), "Node removed");
        }
        Ok(())
    }

    pub fn set_handler(&mut self, id: NodeId, handler: Option<EventHandler>) -> FlowResult<()> {
        self.node_mut_ref(id)?.handler = handler;
        Ok(())
    }

    // --- Orders ---

    fn next_item_id(&mut self) -> ItemId {
        let id = ItemId(self.next_item_id);
        self.next_item_id += 1;
        id
    }

    /// Appends an order prepared through the registry.
    pub fn add_order(&mut self, node: NodeId, kind: &str, params: Value) -> FlowResult<ItemId> {
        let at = self.node_ref(node)?.orders.len();
        self.insert_order(node, at, kind, params)
    }

    pub fn insert_order(&mut self, node: NodeId, at: usize, kind: &str, params: Value) -> FlowResult<ItemId> {
        self.node_ref(node)?.ensure_editable()?;
        let order = self.registry.prepare(kind, params.clone())?;
        let item_id = self.next_item_id();
        self.node_mut_ref(node)?.insert_slot(at, OrderSlot::new(item_id, kind, params, order))?;
        Ok(item_id)
    }

    /// Appends an already built order. It cannot be duplicated unless `kind`
    /// is also registered.
    pub fn add_order_instance(&mut self, node: NodeId, kind: &str, order: Box<dyn Order>) -> FlowResult<ItemId> {
        let target = self.node_ref(node)?;
        target.ensure_editable()?;
        let at = target.orders.len();
        let item_id = self.next_item_id();
        self.node_mut_ref(node)?.insert_slot(at, OrderSlot::new(item_id, kind, Value::Null, order))?;
        Ok(item_id)
    }

    pub fn remove_order(&mut self, node: NodeId, index: usize) -> FlowResult<()> {
        let target = self.node_mut_ref(node)?;
        target.ensure_editable()?;
        target.remove_slot(index)?;
        self.selection.forget_orders(node);
        Ok(())
    }

    pub fn move_order(&mut self, node: NodeId, from: usize, to: usize) -> FlowResult<()> {
        let target = self.node_mut_ref(node)?;
        target.ensure_editable()?;
        target.move_slot(from, to)
    }

    pub fn set_order_enabled(&mut self, node: NodeId, index: usize, enabled: bool) -> FlowResult<()> {
        let target = self.node_mut_ref(node)?;
        target.check_index(index)?;
        target.orders[index].enabled = enabled;
        Ok(())
    }

    pub fn set_order_indent(&mut self, node: NodeId, index: usize, indent: usize) -> FlowResult<()> {
        let target = self.node_mut_ref(node)?;
        target.check_index(index)?;
        target.orders[index].indent = indent;
        Ok(())
    }

    /// Copies orders of `source` into `target` at `at`, with fresh item ids.
    /// Nothing is inserted unless every copy can be prepared.
    pub fn duplicate_orders(&mut self, source: NodeId, indices: &[usize], target: NodeId, at: usize) -> FlowResult<Vec<ItemId>> {
        self.node_ref(target)?.ensure_editable()?;
        let src = self.node_ref(source)?;
        let mut templates = Vec::with_capacity(indices.len());
        for &i in indices {
            src.check_index(i)?;
            let slot = &src.orders[i];
            templates.push((slot.kind().to_string(), slot.params().clone(), slot.enabled, slot.indent));
        }

        let mut copies = Vec::with_capacity(templates.len());
        for (kind, params, enabled, indent) in templates {
            let order = self.registry.prepare(&kind, params.clone())?;
            copies.push((kind, params, enabled, indent, order));
        }

        let len = self.node_ref(target)?.orders.len();
        if at > len {
            return Err(FlowError::OrderIndex { node: self.node_ref(target)?.name.clone(), index: at, len });
        }
        let mut ids = Vec::with_capacity(copies.len());
        for (offset, (kind, params, enabled, indent, order)) in copies.into_iter().enumerate() {
            let item_id = self.next_item_id();
            let mut slot = OrderSlot::new(item_id, &kind, params, order);
            slot.enabled = enabled;
            slot.indent = indent;
            self.node_mut_ref(target)?.insert_slot(at + offset, slot)?;
            ids.push(item_id);
        }
        Ok(ids)
    }

    pub fn order_summaries(&self, node: NodeId) -> FlowResult<Vec<String>> {
        Ok(self.node_ref(node)?.orders.iter().map(OrderSlot::summary).collect())
    }

    /// Existing nodes the orders of `node` may branch to.
    pub fn connected_nodes(&self, node: NodeId) -> FlowResult<Vec<NodeId>> {
        let mut connected = Vec::new();
        for slot in &self.node_ref(node)?.orders {
            for target in slot.connected_nodes() {
                if self.node(target).is_some() && !connected.contains(&target) {
                    connected.push(target);
                }
            }
        }
        Ok(connected)
    }

    // --- Execution ---

    /// Whether the scheduler may start `id` now.
    pub fn is_eligible(&self, id: NodeId) -> bool {
        let Some(node) = self.node(id) else {
            return false;
        };
        !node.running
            && !self.is_node_locked(id)
            && (node.repeatable || node.execution_count == 0)
    }

    pub fn running_nodes(&self) -> Vec<NodeId> {
        self.nodes().filter(|n| n.running).map(Node::id).collect()
    }

    pub fn is_idle(&self) -> bool {
        self.nodes().all(|n| !n.running) && self.messages.is_empty()
    }

    /// Queues a message for nodes with a matching message handler.
    pub fn send_message(&mut self, message: &str) {
        self.messages.push_back(message.to_string());
    }

    /// Fires `GameStarted` handlers and evaluates every `Start` conditional
    /// handler once. Called by the first tick if the host does not.
    pub fn start(&mut self) -> FlowResult<()> {
        if self.started {
            return Ok(());
        }
        self.started = true;
        info!(engine = %self.id, nodes = self.node_count(), groups = self.groups().count(), "Engine started");

        let on_start: Vec<NodeId> = self.nodes()
            .filter(|n| matches!(n.handler, Some(EventHandler::GameStarted)))
            .map(Node::id)
            .collect();
        let mut failure = self.start_fired(on_start).err();

        let fired = self.evaluate_handlers(FireMode::Start);
        keep_first(&mut failure, self.start_fired(fired));
        failure.map_or(Ok(()), Err)
    }

    /// One scheduler pass: deliver continue signals, resume yielded nodes,
    /// dispatch messages, then evaluate `Update` handlers and start what fired.
    ///
    /// A failing order halts only its own node. The pass still runs to the
    /// end and the first failure is returned afterwards.
    pub fn tick(&mut self) -> FlowResult<()> {
        let mut failure = None;
        if !self.started {
            keep_first(&mut failure, self.start());
        }
        self.tick_count += 1;

        let mut queued = Vec::new();
        while let Ok(resume) = self.resume_rx.try_recv() {
            queued.push(resume);
        }
        for resume in queued {
            keep_first(&mut failure, self.apply_resume(resume));
        }

        let yielded: Vec<NodeId> = self.nodes().filter(|n| n.running && n.yielded).map(Node::id).collect();
        for id in yielded {
            if let Some(node) = self.node_mut(id) {
                node.yielded = false;
            }
            keep_first(&mut failure, self.drive(id));
        }

        keep_first(&mut failure, self.dispatch_messages());

        let fired = self.evaluate_handlers(FireMode::Update);
        keep_first(&mut failure, self.start_fired(fired));
        failure.map_or(Ok(()), Err)
    }

    /// Starts `id` at `start_index`.
    ///
    /// Returns `Ok(false)` without touching the node when it is already
    /// running, is not repeatable and has run before, or the index is out of
    /// range. Index 0 on an empty node finishes it straight away.
    pub fn start_execution(&mut self, id: NodeId, start_index: usize) -> FlowResult<bool> {
        if !self.begin_execution(id, start_index, false)? {
            return Ok(false);
        }
        self.drive(id)?;
        Ok(true)
    }

    /// Stops everything, then runs `id` from `order_index`, ignoring the
    /// repeatable flag.
    pub fn play_from(&mut self, id: NodeId, order_index: usize) -> FlowResult<bool> {
        self.node_ref(id)?;
        self.stop_all_nodes();
        if !self.begin_execution(id, order_index, true)? {
            return Ok(false);
        }
        self.drive(id)?;
        Ok(true)
    }

    /// Stops a running node, keeping its current order index. Any signal
    /// from its in-flight order is ignored afterwards. Returns false when
    /// there was nothing to stop.
    pub fn stop_node(&mut self, id: NodeId) -> bool {
        let Some(node) = self.node_mut(id) else {
            return false;
        };
        if !node.running {
            return false;
        }
        node.halt();
        info!(node = %node.name, index = node.current_index, "Node stopped");
        self.events.push(FlowEvent::NodeStopped(id));
        true
    }

    pub fn stop_all_nodes(&mut self) {
        for id in self.running_nodes() {
            self.stop_node(id);
        }
    }

    fn begin_execution(&mut self, id: NodeId, start_index: usize, force: bool) -> FlowResult<bool> {
        let node = self.node_mut_ref(id)?;
        if node.running {
            warn!(node = %node.name, "Node is already running");
            return Ok(false);
        }
        if !force && !node.repeatable && node.execution_count > 0 {
            info!(node = %node.name, "Node is not repeatable and has already run");
            return Ok(false);
        }
        let len = node.orders.len();
        if start_index >= len && !(start_index == 0 && len == 0) {
            warn!(node = %node.name, start_index, len, "Start index out of range");
            return Ok(false);
        }

        node.running = true;
        node.in_flight = false;
        node.yielded = false;
        node.current_index = start_index;
        node.execution_count += 1;
        node.run_id = Uuid::new_v4();
        info!(node = %node.name, start_index, run = node.execution_count, "Node started");
        self.events.push(FlowEvent::NodeStarted(id));
        Ok(true)
    }

    /// Runs `first` and then whatever it branches to, until each suspends,
    /// finishes or stops.
    fn drive(&mut self, first: NodeId) -> FlowResult<()> {
        let mut next = Some(first);
        while let Some(id) = next.take() {
            next = self.run_node(id)?;
        }
        Ok(())
    }

    fn run_node(&mut self, id: NodeId) -> FlowResult<Option<NodeId>> {
        let mut steps = 0;
        loop {
            let (index, len, enabled) = match self.node(id) {
                Some(node) if node.running && !node.in_flight && !node.yielded => {
                    let index = node.current_index;
                    let enabled = node.orders.get(index).is_none_or(|slot| slot.enabled);
                    (index, node.orders.len(), enabled)
                }
                _ => return Ok(None),
            };

            if index >= len {
                self.finish_node(id);
                return Ok(None);
            }

            if steps >= self.config.step_budget() {
                let node = self.node_mut_ref(id)?;
                warn!(node = %node.name, index, "Step budget exhausted, resuming next tick");
                node.yielded = true;
                return Ok(None);
            }
            steps += 1;

            if !enabled {
                self.node_mut_ref(id)?.current_index = index + 1;
                continue;
            }

            let step = match self.enter_order(id, index) {
                Ok(step) => step,
                Err(e) => {
                    if let Some(node) = self.node_mut(id) {
                        node.halt();
                    }
                    return Err(e);
                }
            };
            if let Some(target) = self.apply_step(id, index, step)? {
                return Ok(Some(target));
            }
        }
    }

    fn enter_order(&mut self, id: NodeId, index: usize) -> FlowResult<Step> {
        let Engine { nodes, variables, resume_tx, messages, .. } = self;
        let node = nodes.get_mut(id.0).and_then(Option::as_mut).ok_or(FlowError::UnknownNode(id))?;
        let Node { name, orders, in_flight, run_id, .. } = node;

        let slot = &mut orders[index];
        slot.mark_entered();
        *in_flight = true;
        debug!(node = %name, index, kind = slot.kind(), "Entering order");

        let mut syscall = EngineSyscall {
            node: id,
            run_id: *run_id,
            order_index: index,
            sender: resume_tx.clone(),
            step: Step::Pending,
        };
        let mut ctx = Context::new(id, name, index, variables, messages);
        slot.order.on_enter(&mut ctx, &mut syscall)
            .map_err(|source| FlowError::OrderFailed { node: name.clone(), index, source })?;
        Ok(syscall.step)
    }

    /// Applies what the order at `index` asked for. Returns a node control
    /// was handed to.
    fn apply_step(&mut self, id: NodeId, index: usize, step: Step) -> FlowResult<Option<NodeId>> {
        match step {
            Step::Pending => Ok(None),
            Step::Next => {
                self.complete_order(id, index, index + 1);
                Ok(None)
            }
            Step::Jump(target_index) => {
                self.complete_order(id, index, target_index);
                Ok(None)
            }
            Step::Stop => {
                self.complete_order(id, index, index);
                self.stop_node(id);
                Ok(None)
            }
            Step::Branch { node: target, index: start_index } => {
                if self.node(target).is_none() {
                    warn!(from = %id, %target, "Branch target is missing, continuing");
                    self.complete_order(id, index, index + 1);
                    return Ok(None);
                }
                self.complete_order(id, index, index + 1);
                // Control leaves this node here, which counts as its end.
                self.finish_node(id);
                if target != id {
                    self.stop_node(target);
                }
                if self.begin_execution(target, start_index, false)? {
                    Ok(Some(target))
                } else {
                    Ok(None)
                }
            }
        }
    }

    fn complete_order(&mut self, id: NodeId, index: usize, next_index: usize) {
        if let Some(node) = self.node_mut(id) {
            if let Some(slot) = node.orders.get_mut(index) {
                slot.clear_executing();
            }
            node.in_flight = false;
            node.current_index = next_index;
        }
    }

    fn finish_node(&mut self, id: NodeId) {
        let Some(node) = self.node_mut(id) else {
            return;
        };
        node.halt();
        node.finished_count += 1;
        let group = node.group;
        info!(node = %node.name, finished = node.finished_count, "Node finished");

        self.events.push(FlowEvent::NodeFinished(id));
        self.propagate_unlock(LinkTarget::Node(id));
        if let Some(g) = group {
            self.record_group_completion(g, id);
        }
    }

    fn apply_resume(&mut self, resume: Resume) -> FlowResult<()> {
        let current = self.node(resume.node).is_some_and(|n| {
            n.running && n.in_flight && n.run_id == resume.run_id && n.current_index == resume.order_index
        });
        if !current {
            debug!(node = %resume.node, index = resume.order_index, "Ignoring stale continue signal");
            return Ok(());
        }

        let handed_to = self.apply_step(resume.node, resume.order_index, resume.step)?;
        self.drive(resume.node)?;
        if let Some(target) = handed_to {
            self.drive(target)?;
        }
        Ok(())
    }

    fn dispatch_messages(&mut self) -> FlowResult<()> {
        let mut failure = None;
        let messages: Vec<String> = self.messages.drain(..).collect();
        for message in messages {
            let listeners: Vec<NodeId> = self.nodes()
                .filter(|n| matches!(&n.handler, Some(EventHandler::Message(m)) if *m == message))
                .map(Node::id)
                .collect();
            debug!(%message, listeners = listeners.len(), "Dispatching message");
            keep_first(&mut failure, self.start_fired(listeners));
        }
        failure.map_or(Ok(()), Err)
    }

    /// Evaluates conditional handlers of the given mode. `Start` handlers are
    /// all evaluated; `Update` handlers only for nodes that could start now.
    fn evaluate_handlers(&mut self, mode: FireMode) -> Vec<NodeId> {
        let candidates: Vec<NodeId> = self.nodes()
            .filter(|n| match &n.handler {
                Some(EventHandler::Conditional(h)) => h.mode() == mode,
                _ => false,
            })
            .map(Node::id)
            .filter(|id| mode == FireMode::Start || self.is_eligible(*id))
            .collect();

        let mut fired = Vec::new();
        for id in candidates {
            let Some(node) = self.nodes.get_mut(id.0).and_then(Option::as_mut) else {
                continue;
            };
            if let Some(EventHandler::Conditional(handler)) = node.handler.as_mut() {
                if handler.evaluate(&self.variables) {
                    fired.push(id);
                }
            }
        }
        fired
    }

    /// Settles every fired handler first, then starts the eligible nodes.
    fn start_fired(&mut self, fired: Vec<NodeId>) -> FlowResult<()> {
        for &id in &fired {
            if let Some(node) = self.node_mut(id) {
                let repeatable = node.repeatable;
                if let Some(EventHandler::Conditional(handler)) = node.handler.as_mut() {
                    handler.settle(repeatable);
                }
            }
        }

        let mut failure = None;
        for id in fired {
            if !self.is_eligible(id) {
                if let Some(node) = self.node(id) {
                    debug!(node = %node.name, "Handler fired but node is not eligible");
                }
                continue;
            }
            self.events.push(FlowEvent::HandlerFired(id));
            keep_first(&mut failure, self.start_execution(id, 0).map(|_| ()));
        }
        failure.map_or(Ok(()), Err)
    }
}

fn keep_first(failure: &mut Option<FlowError>, result: FlowResult<()>) {
    if let Err(e) = result {
        if failure.is_none() {
            *failure = Some(e);
        } else {
            warn!(error = %e, "Further order failure in the same pass");
        }
    }
}
