use crate::error::{FlowError, FlowResult};
use crate::runtime::engine::{Engine, FlowEvent};
use crate::runtime::ids::{GroupId, LinkTarget, NodeId};
use crate::runtime::lock::LockLinks;
use std::collections::HashSet;
use tracing::{info, warn};

/// How a group decides it is complete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completion {
    /// Every listed member has finished at least once.
    SpecificNodes(Vec<NodeId>),
    /// At least this many distinct members have finished.
    Threshold(usize),
}

/// A set of nodes with its own completion condition and lock links.
#[derive(Debug)]
pub struct Group {
    id: GroupId,
    name: String,
    members: Vec<NodeId>,
    completion: Completion,
    completed: HashSet<NodeId>,
    /// Listed nodes still unfinished, in `SpecificNodes` mode.
    remaining: usize,
    complete: bool,
    pub(crate) links: LockLinks,
    pub minimised: bool,
    pub tint: Option<[f32; 4]>,
}

impl Group {
    fn new(id: GroupId, name: &str, members: Vec<NodeId>, completion: Completion) -> Self {
        let mut group = Self {
            id,
            name: name.to_string(),
            members,
            completion,
            completed: HashSet::new(),
            remaining: 0,
            complete: false,
            links: LockLinks::default(),
            minimised: false,
            tint: None,
        };
        group.normalize();
        group
    }

    pub fn id(&self) -> GroupId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn members(&self) -> &[NodeId] {
        &self.members
    }

    pub fn completion(&self) -> &Completion {
        &self.completion
    }

    pub fn threshold(&self) -> Option<usize> {
        match self.completion {
            Completion::Threshold(count) => Some(count),
            Completion::SpecificNodes(_) => None,
        }
    }

    /// Distinct members that have finished so far.
    pub fn completed_count(&self) -> usize {
        self.completed.len()
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    pub fn target_key(&self) -> Option<LinkTarget> {
        self.links.target_key
    }

    pub fn target_unlock(&self) -> Option<LinkTarget> {
        self.links.target_unlock
    }

    /// Clamps the threshold into `[1, members]` and keeps the specific list a
    /// duplicate-free subset of the members.
    fn normalize(&mut self) {
        let members = &self.members;
        match &mut self.completion {
            Completion::Threshold(count) => {
                *count = (*count).clamp(1, members.len().max(1));
            }
            Completion::SpecificNodes(nodes) => {
                let mut seen = HashSet::new();
                nodes.retain(|n| members.contains(n) && seen.insert(*n));
                if nodes.is_empty() {
                    warn!(group = %self.name, "No member selected for completion, requiring all members");
                    *nodes = members.clone();
                }
            }
        }
    }

    /// Recomputes the completion state from scratch. Only needed when the
    /// membership or mode changes; finishes go through `record_completion`.
    fn rebuild(&mut self, finished: &HashSet<NodeId>) {
        self.completed = self.members.iter().copied().filter(|m| finished.contains(m)).collect();
        self.remaining = match &self.completion {
            Completion::SpecificNodes(nodes) => nodes.iter().filter(|n| !self.completed.contains(n)).count(),
            Completion::Threshold(_) => 0,
        };
        self.complete = self.check();
    }

    fn check(&self) -> bool {
        match &self.completion {
            Completion::Threshold(count) => self.completed.len() >= *count,
            Completion::SpecificNodes(_) => self.remaining == 0,
        }
    }

    /// Counts a member's finish. Returns true only on the finish that makes
    /// the group complete.
    pub(crate) fn record_completion(&mut self, node: NodeId) -> bool {
        if !self.members.contains(&node) || !self.completed.insert(node) {
            return false;
        }
        if let Completion::SpecificNodes(nodes) = &self.completion {
            if nodes.contains(&node) {
                self.remaining = self.remaining.saturating_sub(1);
            }
        }
        if self.complete {
            return false;
        }
        self.complete = self.check();
        self.complete
    }
}

impl Engine {
    pub fn group(&self, id: GroupId) -> Option<&Group> {
        self.groups.get(id.0).and_then(Option::as_ref)
    }

    /// Mutable access for display settings; membership goes through the engine.
    pub fn group_mut(&mut self, id: GroupId) -> Option<&mut Group> {
        self.groups.get_mut(id.0).and_then(Option::as_mut)
    }

    pub fn groups(&self) -> impl Iterator<Item = &Group> {
        self.groups.iter().flatten()
    }

    pub fn find_group(&self, name: &str) -> Option<GroupId> {
        self.groups().find(|g| g.name == name).map(|g| g.id)
    }

    /// Groups ungrouped nodes. Needs at least two distinct members.
    pub fn create_group(&mut self, name: &str, members: &[NodeId], completion: Completion) -> FlowResult<GroupId> {
        let mut unique: Vec<NodeId> = Vec::with_capacity(members.len());
        for m in members {
            if !unique.contains(m) {
                unique.push(*m);
            }
        }
        if unique.len() < 2 {
            return Err(FlowError::GroupTooSmall(unique.len()));
        }
        for m in &unique {
            let node = self.node(*m).ok_or(FlowError::UnknownNode(*m))?;
            if let Some(group) = node.group {
                return Err(FlowError::AlreadyGrouped { node: *m, group });
            }
        }

        let id = GroupId(self.groups.len());
        let group = Group::new(id, name, unique.clone(), completion);
        self.groups.push(Some(group));
        for m in &unique {
            if let Some(node) = self.node_mut(*m) {
                node.group = Some(id);
            }
        }
        self.refresh_group(id);
        info!(group = %name, members = unique.len(), "Group created");
        Ok(id)
    }

    /// Releases every member and removes the group with its links.
    pub fn disband_group(&mut self, id: GroupId) -> FlowResult<()> {
        let members = self.group(id).ok_or(FlowError::UnknownGroup(id))?.members.clone();
        self.detach_links(LinkTarget::Group(id));
        for m in members {
            if let Some(node) = self.node_mut(m) {
                if node.group == Some(id) {
                    node.group = None;
                }
            }
        }
        if let Some(group) = self.groups.get_mut(id.0).and_then(Option::take) {
            info!(group = %group.name, "Group disbanded");
        }
        Ok(())
    }

    pub fn add_to_group(&mut self, id: GroupId, node: NodeId) -> FlowResult<()> {
        if self.group(id).is_none() {
            return Err(FlowError::UnknownGroup(id));
        }
        match self.node(node).ok_or(FlowError::UnknownNode(node))?.group {
            Some(current) if current == id => return Ok(()),
            Some(current) => return Err(FlowError::AlreadyGrouped { node, group: current }),
            None => {}
        }
        if self.membership_would_cycle(id, node) {
            return Err(FlowError::LockCycle { from: LinkTarget::Node(node), to: LinkTarget::Group(id) });
        }

        if let Some(group) = self.group_mut(id) {
            group.members.push(node);
        }
        if let Some(n) = self.node_mut(node) {
            n.group = Some(id);
        }
        self.refresh_group(id);
        Ok(())
    }

    /// Takes `node` out of `id`; a group left with one member is disbanded.
    pub fn remove_from_group(&mut self, id: GroupId, node: NodeId) -> FlowResult<()> {
        let group = self.group_mut(id).ok_or(FlowError::UnknownGroup(id))?;
        let Some(pos) = group.members.iter().position(|m| *m == node) else {
            return Err(FlowError::NotAMember { node, group: id });
        };
        group.members.remove(pos);
        let left = group.members.len();

        if let Some(n) = self.node_mut(node) {
            n.group = None;
        }
        if left <= 1 {
            self.disband_group(id)
        } else {
            self.refresh_group(id);
            Ok(())
        }
    }

    pub fn set_group_completion(&mut self, id: GroupId, completion: Completion) -> FlowResult<()> {
        let group = self.group_mut(id).ok_or(FlowError::UnknownGroup(id))?;
        group.completion = completion;
        self.refresh_group(id);
        Ok(())
    }

    /// Incremental path taken when a member finishes.
    pub(crate) fn record_group_completion(&mut self, id: GroupId, node: NodeId) {
        let Some(group) = self.group_mut(id) else {
            return;
        };
        let became_complete = group.record_completion(node);
        let (name, done, threshold) = (group.name.clone(), group.completed_count(), group.threshold());
        if became_complete {
            info!(group = %name, completed = done, ?threshold, "Group complete");
            self.events.push(FlowEvent::GroupCompleted(id));
            self.propagate_unlock(LinkTarget::Group(id));
        }
    }

    fn finished_nodes(&self) -> HashSet<NodeId> {
        self.nodes().filter(|n| n.is_complete()).map(|n| n.id()).collect()
    }

    /// Full recount after a membership or mode change.
    fn refresh_group(&mut self, id: GroupId) {
        let finished = self.finished_nodes();
        let Some(group) = self.group_mut(id) else {
            return;
        };
        let was_complete = group.complete;
        group.normalize();
        group.rebuild(&finished);
        let now_complete = group.complete;
        let unlock = group.links.target_unlock;

        if !was_complete && now_complete {
            self.events.push(FlowEvent::GroupCompleted(id));
            self.propagate_unlock(LinkTarget::Group(id));
        } else if let Some(target) = unlock {
            self.refresh_lock(target);
        }
    }

    pub(crate) fn rebuild_groups(&mut self) {
        let finished = self.finished_nodes();
        for group in self.groups.iter_mut().flatten() {
            group.normalize();
            group.rebuild(&finished);
        }
    }

    /// Drops members whose node is gone or points at another group.
    pub(crate) fn prune_group_members(&mut self) -> usize {
        let mut pruned = 0;
        let ids: Vec<GroupId> = self.groups().map(|g| g.id).collect();
        for id in ids {
            let members = self.group(id).map(|g| g.members.clone()).unwrap_or_default();
            let keep: Vec<NodeId> = members.iter()
                .copied()
                .filter(|m| self.node(*m).is_some_and(|n| n.group == Some(id)))
                .collect();
            if keep.len() != members.len() {
                pruned += members.len() - keep.len();
                warn!(group = %id, removed = members.len() - keep.len(), "Dropping stale group members");
                if let Some(group) = self.group_mut(id) {
                    group.members = keep;
                }
                if self.group(id).is_some_and(|g| g.members.len() > 1) {
                    self.refresh_group(id);
                }
            }
        }
        pruned
    }
}
