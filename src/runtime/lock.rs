use crate::error::{FlowError, FlowResult};
use crate::runtime::engine::{Engine, FlowEvent};
use crate::runtime::ids::{GroupId, LinkTarget, NodeId};
use std::collections::HashSet;
use tracing::{info, warn};

/// Lock relationship carried by both nodes and groups.
///
/// `target_key` is what must complete before the owner unlocks,
/// `target_unlock` is what the owner unlocks when it completes. For every
/// pair `a.target_unlock == Some(b)` implies `b.target_key == Some(a)`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LockLinks {
    pub(crate) target_key: Option<LinkTarget>,
    pub(crate) target_unlock: Option<LinkTarget>,
    pub(crate) locked: bool,
}

/// Vertices of the dependency graph used for cycle detection. A group has
/// separate vertices for its lock (gating its members) and its completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Vertex {
    Node(NodeId),
    Lock(GroupId),
    Complete(GroupId),
}

impl Engine {
    pub(crate) fn links(&self, target: LinkTarget) -> Option<&LockLinks> {
        match target {
            LinkTarget::Node(id) => self.node(id).map(|n| &n.links),
            LinkTarget::Group(id) => self.group(id).map(|g| &g.links),
        }
    }

    pub(crate) fn links_mut(&mut self, target: LinkTarget) -> Option<&mut LockLinks> {
        match target {
            LinkTarget::Node(id) => self.node_mut(id).map(|n| &mut n.links),
            LinkTarget::Group(id) => self.group_mut(id).map(|g| &mut g.links),
        }
    }

    pub fn contains(&self, target: LinkTarget) -> bool {
        self.links(target).is_some()
    }

    fn ensure_exists(&self, target: LinkTarget) -> FlowResult<()> {
        match target {
            LinkTarget::Node(id) if self.node(id).is_none() => Err(FlowError::UnknownNode(id)),
            LinkTarget::Group(id) if self.group(id).is_none() => Err(FlowError::UnknownGroup(id)),
            _ => Ok(()),
        }
    }

    pub fn target_key(&self, target: LinkTarget) -> Option<LinkTarget> {
        self.links(target).and_then(|l| l.target_key)
    }

    pub fn target_unlock(&self, target: LinkTarget) -> Option<LinkTarget> {
        self.links(target).and_then(|l| l.target_unlock)
    }

    /// Own lock flag of a node or group.
    pub fn is_locked(&self, target: LinkTarget) -> bool {
        self.links(target).is_some_and(|l| l.locked)
    }

    /// A node is held back by its own lock or by its group's.
    pub fn is_node_locked(&self, id: NodeId) -> bool {
        let Some(node) = self.node(id) else {
            return false;
        };
        node.links.locked || node.group.is_some_and(|g| self.is_locked(LinkTarget::Group(g)))
    }

    /// Whether `target` has completed in the sense used by lock links.
    pub fn is_satisfied(&self, target: LinkTarget) -> bool {
        match target {
            LinkTarget::Node(id) => self.node(id).is_some_and(|n| n.is_complete()),
            LinkTarget::Group(id) => self.group(id).is_some_and(|g| g.is_complete()),
        }
    }

    /// Everything that must complete before `target` unlocks. A single key
    /// today; callers treat it as a list.
    pub fn prerequisites(&self, target: LinkTarget) -> Vec<LinkTarget> {
        self.target_key(target).into_iter().collect()
    }

    /// Makes `from` unlock `to` on completion, replacing any previous link.
    ///
    /// Validation happens before anything is touched, so a rejected call
    /// leaves every link as it was. `to = None` clears the link.
    pub fn set_target_unlock(&mut self, from: LinkTarget, to: Option<LinkTarget>) -> FlowResult<()> {
        self.ensure_exists(from)?;
        if let Some(to) = to {
            self.ensure_exists(to)?;
            if from == to {
                return Err(FlowError::SelfLink(from));
            }
            if self.would_cycle(from, to) {
                return Err(FlowError::LockCycle { from, to });
            }
        }

        let previous = self.target_unlock(from);
        if previous == to {
            return Ok(());
        }

        if let Some(old) = previous {
            if let Some(links) = self.links_mut(old) {
                if links.target_key == Some(from) {
                    links.target_key = None;
                }
            }
            self.refresh_lock(old);
        }

        if let Some(to) = to {
            // `to` can only have one key; its former owner loses the link.
            if let Some(other) = self.target_key(to) {
                if other != from {
                    if let Some(links) = self.links_mut(other) {
                        links.target_unlock = None;
                    }
                }
            }
            if let Some(links) = self.links_mut(to) {
                links.target_key = Some(from);
            }
        }

        if let Some(links) = self.links_mut(from) {
            links.target_unlock = to;
        }

        if let Some(to) = to {
            self.refresh_lock(to);
            info!(%from, %to, locked = self.is_locked(to), "Lock link set");
        } else {
            info!(%from, "Lock link cleared");
        }
        Ok(())
    }

    pub fn clear_target_unlock(&mut self, from: LinkTarget) -> FlowResult<()> {
        self.set_target_unlock(from, None)
    }

    /// Removes every link touching `target`, on both sides.
    pub(crate) fn detach_links(&mut self, target: LinkTarget) {
        if let Some(key) = self.target_key(target) {
            if let Some(links) = self.links_mut(key) {
                if links.target_unlock == Some(target) {
                    links.target_unlock = None;
                }
            }
        }
        if let Some(unlock) = self.target_unlock(target) {
            if let Some(links) = self.links_mut(unlock) {
                if links.target_key == Some(target) {
                    links.target_key = None;
                }
            }
            self.refresh_lock(unlock);
        }
        if let Some(links) = self.links_mut(target) {
            *links = LockLinks::default();
        }
    }

    pub(crate) fn refresh_lock(&mut self, target: LinkTarget) {
        let satisfied = self.prerequisites(target).iter().all(|p| self.is_satisfied(*p));
        if let Some(links) = self.links_mut(target) {
            links.locked = !satisfied;
        }
    }

    pub(crate) fn refresh_all_locks(&mut self) {
        for target in self.link_targets() {
            self.refresh_lock(target);
        }
    }

    /// Called when `source` completes: unlocks whatever it targets once all of
    /// that target's prerequisites hold.
    pub(crate) fn propagate_unlock(&mut self, source: LinkTarget) {
        let Some(target) = self.target_unlock(source) else {
            return;
        };
        if !self.prerequisites(target).contains(&source) {
            warn!(%source, %target, "Unlock link is not mirrored by a key link, skipping");
            return;
        }
        let was_locked = self.is_locked(target);
        self.refresh_lock(target);
        if was_locked && !self.is_locked(target) {
            info!(%source, %target, "Unlocked");
            self.events.push(FlowEvent::Unlocked(target));
        }
    }

    pub(crate) fn link_targets(&self) -> Vec<LinkTarget> {
        let nodes = self.nodes().map(|n| LinkTarget::Node(n.id()));
        let groups = self.groups().map(|g| LinkTarget::Group(g.id()));
        nodes.chain(groups).collect()
    }

    /// True when `from` already depends, directly or not, on `to`, so that
    /// letting `from` unlock `to` would deadlock both.
    fn would_cycle(&self, from: LinkTarget, to: LinkTarget) -> bool {
        let start = match from {
            LinkTarget::Node(id) => Vertex::Node(id),
            LinkTarget::Group(id) => Vertex::Complete(id),
        };
        let goal = match to {
            LinkTarget::Node(id) => Vertex::Node(id),
            LinkTarget::Group(id) => Vertex::Lock(id),
        };

        self.depends_on(start, goal)
    }

    /// True when putting `node` into `group` would make either wait on the other.
    pub(crate) fn membership_would_cycle(&self, group: GroupId, node: NodeId) -> bool {
        self.depends_on(Vertex::Lock(group), Vertex::Node(node))
            || self.depends_on(Vertex::Node(node), Vertex::Complete(group))
    }

    fn depends_on(&self, start: Vertex, goal: Vertex) -> bool {
        let mut stack = vec![start];
        let mut seen = HashSet::new();
        while let Some(vertex) = stack.pop() {
            if vertex == goal {
                return true;
            }
            if !seen.insert(vertex) {
                continue;
            }
            stack.extend(self.dependencies(vertex));
        }
        false
    }

    fn dependencies(&self, vertex: Vertex) -> Vec<Vertex> {
        let key_vertex = |key: LinkTarget| match key {
            LinkTarget::Node(id) => Vertex::Node(id),
            LinkTarget::Group(id) => Vertex::Complete(id),
        };
        match vertex {
            Vertex::Node(id) => {
                let Some(node) = self.node(id) else {
                    return Vec::new();
                };
                let mut deps: Vec<Vertex> = node.links.target_key.map(key_vertex).into_iter().collect();
                if let Some(g) = node.group {
                    deps.push(Vertex::Lock(g));
                }
                deps
            }
            Vertex::Lock(id) => self.target_key(LinkTarget::Group(id)).map(key_vertex).into_iter().collect(),
            Vertex::Complete(id) => self.group(id)
                .map(|g| g.members().iter().map(|m| Vertex::Node(*m)).collect())
                .unwrap_or_default(),
        }
    }

    /// Clears links whose other side is missing or does not point back, drops
    /// stale group memberships and disbands groups that are too small.
    /// Returns how many problems were fixed.
    pub fn repair_links(&mut self) -> usize {
        let mut fixes = 0;

        let mut stale_keys = Vec::new();
        let mut stale_unlocks = Vec::new();
        for target in self.link_targets() {
            if let Some(key) = self.target_key(target) {
                if self.target_unlock(key) != Some(target) {
                    stale_keys.push(target);
                }
            }
            if let Some(unlock) = self.target_unlock(target) {
                if self.target_key(unlock) != Some(target) {
                    stale_unlocks.push(target);
                }
            }
        }
        for target in stale_keys {
            warn!(%target, "Clearing dangling key link");
            if let Some(links) = self.links_mut(target) {
                links.target_key = None;
            }
            fixes += 1;
        }
        for target in stale_unlocks {
            warn!(%target, "Clearing dangling unlock link");
            if let Some(links) = self.links_mut(target) {
                links.target_unlock = None;
            }
            fixes += 1;
        }

        let stray: Vec<NodeId> = self.nodes()
            .filter(|n| n.group.is_some_and(|g| !self.group(g).is_some_and(|g| g.members().contains(&n.id()))))
            .map(|n| n.id())
            .collect();
        for id in stray {
            warn!(node = %id, "Clearing stale group membership");
            if let Some(node) = self.node_mut(id) {
                node.group = None;
            }
            fixes += 1;
        }
        fixes += self.prune_group_members();

        let undersized: Vec<GroupId> = self.groups()
            .filter(|g| g.members().len() <= 1)
            .map(|g| g.id())
            .collect();
        for id in undersized {
            warn!(group = %id, "Disbanding group with too few members");
            let _ = self.disband_group(id);
            fixes += 1;
        }

        self.refresh_all_locks();
        fixes
    }
}
