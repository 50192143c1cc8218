use crate::runtime::ids::NodeId;
use crate::runtime::syscall::Step;
use tokio::sync::mpsc::UnboundedSender;
use tracing::debug;
use uuid::Uuid;

/// A continuation signal waiting to be applied on the next tick.
#[derive(Debug, Clone)]
pub struct Resume {
    pub node: NodeId,
    /// Token of the node run the order was entered in.
    pub run_id: Uuid,
    pub order_index: usize,
    pub step: Step,
}

/// Lets a suspended order finish later, from a timer, callback or another task.
///
/// Consuming methods make each handle signal at most once. Signals for a run
/// that has since been stopped, restarted or advanced are dropped by the engine.
#[derive(Debug, Clone)]
pub struct ContinueHandle {
    node: NodeId,
    run_id: Uuid,
    order_index: usize,
    sender: UnboundedSender<Resume>,
}

impl ContinueHandle {
    pub(crate) fn new(node: NodeId, run_id: Uuid, order_index: usize, sender: UnboundedSender<Resume>) -> Self {
        Self {
            node,
            run_id,
            order_index,
            sender,
        }
    }

    pub fn node(&self) -> NodeId {
        self.node
    }

    pub fn order_index(&self) -> usize {
        self.order_index
    }

    pub fn proceed(self) {
        self.send(Step::Next);
    }

    pub fn jump(self, order_index: usize) {
        self.send(Step::Jump(order_index));
    }

    pub fn branch(self, node: NodeId, order_index: usize) {
        self.send(Step::Branch { node, index: order_index });
    }

    pub fn stop(self) {
        self.send(Step::Stop);
    }

    fn send(self, step: Step) {
        let resume = Resume {
            node: self.node,
            run_id: self.run_id,
            order_index: self.order_index,
            step,
        };
        if self.sender.send(resume).is_err() {
            debug!(node = %self.node, "Engine dropped before order continued");
        }
    }
}
