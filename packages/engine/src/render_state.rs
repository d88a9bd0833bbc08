//! Ephemeral bookkeeping for a single reconciliation pass
//!
//! Flags, node/instance links, and pre-pass snapshots live here instead of
//! on the nodes and instances themselves, so a pass leaves no residue: the
//! whole table drops with the pass.

use crate::component::{InstanceId, Props, State};
use crate::vnode::VNodeId;
use std::collections::{HashMap, HashSet};

#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct Flags {
    /// Instance was created during this pass.
    pub is_new: bool,
    pub captured: bool,
    /// Part of a node/instance pair, possibly speculative.
    pub mapped: bool,
    /// Confirmed node/instance pair.
    pub linked: bool,
    /// Linked, but the ancestor chain changed; reparent instead of rebuild.
    pub relocated: bool,
    /// The realized element received at least one actual write.
    pub updated: bool,
    /// `should_rerender` declined; subtree left as-is.
    pub skipped: bool,
    pub rendered: bool,
    /// Removed from its old position by the child scan, but claimed by a
    /// node elsewhere; must not be disposed.
    pub detached: bool,
}

#[derive(Debug)]
pub(crate) struct PendingRef {
    pub owner: InstanceId,
    pub key: String,
    pub node: VNodeId,
    /// Structural ref rather than an explicitly declared one.
    pub structural: bool,
}

#[derive(Debug, Default)]
pub(crate) struct RenderingState {
    node_flags: HashMap<VNodeId, Flags>,
    inst_flags: HashMap<InstanceId, Flags>,
    node_to_inst: HashMap<VNodeId, InstanceId>,
    inst_to_node: HashMap<InstanceId, VNodeId>,
    /// Pre-pass props and state per instance, for `did_update`.
    pub previous: HashMap<InstanceId, (Props, State)>,
    /// Refs observed during capture, finalized once instances exist.
    pub pending_refs: Vec<PendingRef>,
    /// Owners whose `render()` ran this pass; their ref tables are rebuilt.
    pub rendered_owners: HashSet<InstanceId>,
}

impl RenderingState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn node(&self, id: VNodeId) -> Flags {
        self.node_flags.get(&id).copied().unwrap_or_default()
    }

    pub fn inst(&self, id: InstanceId) -> Flags {
        self.inst_flags.get(&id).copied().unwrap_or_default()
    }

    pub fn mark_node(&mut self, id: VNodeId, f: impl FnOnce(&mut Flags)) {
        f(self.node_flags.entry(id).or_default());
    }

    pub fn mark_inst(&mut self, id: InstanceId, f: impl FnOnce(&mut Flags)) {
        f(self.inst_flags.entry(id).or_default());
    }

    pub fn instance_for(&self, node: VNodeId) -> Option<InstanceId> {
        self.node_to_inst.get(&node).copied()
    }

    pub fn node_for(&self, inst: InstanceId) -> Option<VNodeId> {
        self.inst_to_node.get(&inst).copied()
    }

    /// Confirm a node/instance pair.
    pub fn link(&mut self, node: VNodeId, inst: InstanceId) {
        self.node_to_inst.insert(node, inst);
        self.inst_to_node.insert(inst, node);
        self.mark_node(node, |f| {
            f.linked = true;
            f.mapped = true;
        });
        self.mark_inst(inst, |f| {
            f.linked = true;
            f.mapped = true;
        });
    }

    /// Speculative pairing made while walking ancestor chains. The pair is
    /// still honored by the update phase, but carries no ref identity.
    pub fn map_pair(&mut self, node: VNodeId, inst: InstanceId) {
        self.node_to_inst.insert(node, inst);
        self.inst_to_node.insert(inst, node);
        self.mark_node(node, |f| f.mapped = true);
        self.mark_inst(inst, |f| f.mapped = true);
    }
}
