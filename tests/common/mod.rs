#![allow(dead_code)]

use lute::runtime::context::Context;
use lute::runtime::engine::Engine;
use lute::runtime::ids::NodeId;
use lute::runtime::order::{Order, OrderRegistry};
use lute::runtime::syscall::Syscall;
use lute::runtime::task::ContinueHandle;
use std::sync::{Arc, Mutex};

pub type Trace = Arc<Mutex<Vec<String>>>;

pub fn trace() -> Trace {
    Arc::new(Mutex::new(Vec::new()))
}

pub fn entries(trace: &Trace) -> Vec<String> {
    trace.lock().unwrap().clone()
}

pub fn engine() -> Engine {
    Engine::new(OrderRegistry::standard())
}

/// Records `"<node>:<label>"` and continues immediately.
#[derive(Debug)]
pub struct RecordOrder {
    pub label: String,
    pub trace: Trace,
}

impl Order for RecordOrder {
    fn on_enter(&mut self, ctx: &mut Context<'_>, syscall: &mut dyn Syscall) -> anyhow::Result<()> {
        self.trace.lock().unwrap().push(format!("{}:{}", ctx.node_name(), self.label));
        syscall.proceed();
        Ok(())
    }

    fn summary(&self) -> String {
        self.label.clone()
    }
}

pub fn record(engine: &mut Engine, node: NodeId, label: &str, trace: &Trace) {
    engine
        .add_order_instance(node, "record", Box::new(RecordOrder { label: label.to_string(), trace: trace.clone() }))
        .unwrap();
}

/// Suspends and parks its handle for the test to use.
#[derive(Debug)]
pub struct HoldOrder {
    pub handle: Arc<Mutex<Option<ContinueHandle>>>,
    pub entered: Arc<Mutex<u32>>,
}

impl Order for HoldOrder {
    fn on_enter(&mut self, _ctx: &mut Context<'_>, syscall: &mut dyn Syscall) -> anyhow::Result<()> {
        *self.entered.lock().unwrap() += 1;
        *self.handle.lock().unwrap() = Some(syscall.suspend());
        Ok(())
    }
}

pub struct Hold {
    pub handle: Arc<Mutex<Option<ContinueHandle>>>,
    pub entered: Arc<Mutex<u32>>,
}

impl Hold {
    pub fn take(&self) -> ContinueHandle {
        self.handle.lock().unwrap().take().expect("order has not been entered")
    }

    pub fn entered(&self) -> u32 {
        *self.entered.lock().unwrap()
    }
}

pub fn hold(engine: &mut Engine, node: NodeId) -> Hold {
    let handle = Arc::new(Mutex::new(None));
    let entered = Arc::new(Mutex::new(0));
    engine
        .add_order_instance(node, "hold", Box::new(HoldOrder { handle: handle.clone(), entered: entered.clone() }))
        .unwrap();
    Hold { handle, entered }
}

/// Branches to `target` at `index`.
#[derive(Debug)]
pub struct BranchOrder {
    pub target: NodeId,
    pub index: usize,
}

impl Order for BranchOrder {
    fn on_enter(&mut self, _ctx: &mut Context<'_>, syscall: &mut dyn Syscall) -> anyhow::Result<()> {
        syscall.branch(self.target, self.index);
        Ok(())
    }

    fn connected_nodes(&self) -> Vec<NodeId> {
        vec![self.target]
    }
}

/// Always fails.
#[derive(Debug)]
pub struct FailOrder;

impl Order for FailOrder {
    fn on_enter(&mut self, _ctx: &mut Context<'_>, _syscall: &mut dyn Syscall) -> anyhow::Result<()> {
        anyhow::bail!("boom")
    }
}

/// Builds a node whose orders just record their labels.
pub fn recording_node(engine: &mut Engine, name: &str, labels: &[&str], trace: &Trace) -> NodeId {
    let id = engine.add_node(name);
    for label in labels {
        record(engine, id, label, trace);
    }
    id
}
