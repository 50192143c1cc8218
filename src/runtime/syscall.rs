use crate::runtime::ids::NodeId;
use crate::runtime::task::ContinueHandle;

/// What the owning node should do once an order has been entered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// The order is still in flight and will signal through a [`ContinueHandle`].
    Pending,
    /// Advance to the next order.
    Next,
    /// Continue from another order index of the same node.
    Jump(usize),
    /// Hand control to another node, starting at `index`.
    Branch { node: NodeId, index: usize },
    /// Stop the owning node.
    Stop,
}

/// Interface through which an order controls its node's scheduling.
///
/// An order that returns from `on_enter` without calling any of these is
/// suspended until a handle obtained from [`Syscall::suspend`] is used.
pub trait Syscall {
    /// Done, move on to the next order.
    fn proceed(&mut self);

    /// Continue from `order_index` in the same node.
    fn jump(&mut self, order_index: usize);

    /// Transfer to `node`, starting at `order_index`.
    fn branch(&mut self, node: NodeId, order_index: usize);

    /// Stay in flight and hand out a handle for finishing later.
    fn suspend(&mut self) -> ContinueHandle;

    /// Stop the owning node.
    fn stop(&mut self);
}
