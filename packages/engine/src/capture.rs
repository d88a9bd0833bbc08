//! Capture phase: render invocation, instance linking, ref resolution
//!
//! # Shape of a pass
//!
//! A [`Pass`] owns the pass-scoped virtual tree and rendering state and
//! borrows the persistent pieces (DOM backend, component store) from the
//! engine. Capture walks the tree top-down, invoking `render()` on
//! component nodes and linking fresh nodes to the instances that carried
//! them last pass. Once the final tree shape is known, linking is
//! propagated up the ancestor chains, which is also where relocations are
//! detected. The update phase (see `update.rs`) then realizes the tree
//! against the DOM.

use crate::component::{ComponentStore, Context, InstanceId, InstanceKind, Props};
use crate::engine::PassReport;
use crate::error::{EngineError, EngineResult};
use crate::render_state::{PendingRef, RenderingState};
use crate::vnode::{RenderContext, VNode, VNodeId, VNodeKind, VTree};
use std::collections::BTreeMap;
use tracing::{debug, warn};
use vellum_dom::DomAdapter;

pub(crate) struct Pass<'a, D: DomAdapter> {
    pub dom: &'a mut D,
    pub store: &'a mut ComponentStore,
    pub tree: VTree,
    pub state: RenderingState,
    pub report: PassReport,
    /// Root node of the pass; always re-rendered.
    pub top: Option<VNodeId>,
    /// Context donor for nodes built outside any rendered ancestor, used by
    /// the incremental insertion API.
    pub context_root: Option<InstanceId>,
}

impl<'a, D: DomAdapter> Pass<'a, D> {
    pub fn new(dom: &'a mut D, store: &'a mut ComponentStore) -> Self {
        Self {
            dom,
            store,
            tree: VTree::new(),
            state: RenderingState::new(),
            report: PassReport::default(),
            top: None,
            context_root: None,
        }
    }

    /// Run a full pass rooted at `root`: capture, link propagation, DOM
    /// update, ref finalization, lifecycle dispatch.
    pub fn reconcile(
        &mut self,
        root: InstanceId,
        root_is_new: bool,
        previous: Option<(Props, crate::component::State)>,
    ) -> EngineResult<()> {
        let inst = self.store.expect(root)?;
        if !inst.is_component() {
            return Err(EngineError::NotAComponent(root));
        }
        let (class, props) = match &inst.kind {
            InstanceKind::Component { class, .. } => (class.clone(), inst.props.clone()),
            _ => return Err(EngineError::NotAComponent(root)),
        };
        let owner_bags = inst.owner_bags.clone();

        // A synthetic top-level node stands in for the owner's view of the
        // root, carrying whatever decorations were last applied to it.
        let wrapper = self
            .tree
            .push(VNodeKind::Component { class, props }, Some(root));
        self.tree.node_mut(wrapper).bags = owner_bags;
        self.top = Some(wrapper);
        if let Some(prev) = previous {
            self.state.previous.insert(root, prev);
        }
        if root_is_new {
            self.state.mark_inst(root, |f| f.is_new = true);
            self.state.mark_node(wrapper, |f| f.is_new = true);
        }
        self.state.link(wrapper, root);

        self.capture(wrapper)?;
        self.propagate_linking();
        self.update_root(wrapper)?;
        self.finalize_refs();
        self.dispatch_lifecycle(root)?;

        debug!(
            nodes = self.tree.len(),
            writes = self.report.dom_writes,
            relocated = self.report.relocated.len(),
            disposed = self.report.disposed.len(),
            "pass complete"
        );
        Ok(())
    }

    /// Capture a subtree. Memoized: a node reached twice (declared child
    /// later placed into an output) is processed once.
    pub fn capture(&mut self, vel: VNodeId) -> EngineResult<()> {
        if self.state.node(vel).captured {
            return Ok(());
        }
        self.state.mark_node(vel, |f| f.captured = true);
        if self.tree.node(vel).is_component() {
            self.capture_component(vel)
        } else {
            for child in self.tree.node(vel).children.clone() {
                self.capture(child)?;
            }
            Ok(())
        }
    }

    fn capture_component(&mut self, vel: VNodeId) -> EngineResult<()> {
        let inst_id = match self.state.instance_for(vel) {
            Some(id) => id,
            None => self.instantiate(vel)?,
        };
        let is_new = self.state.inst(inst_id).is_new;
        let is_top = self.top == Some(vel);

        // Declared children are mirrored into props before the behavior
        // sees them.
        let declared = self.tree.node(vel).children.clone();
        let new_props = {
            let node = self.tree.node_mut(vel);
            if let VNodeKind::Component { props, .. } = &mut node.kind {
                props.set_children(declared);
                props.clone()
            } else {
                return Err(EngineError::UnknownNode(vel));
            }
        };

        let rerender = {
            let inst = self.store.expect(inst_id)?;
            is_top
                || inst.dom.is_none()
                || inst
                    .behavior()
                    .map(|b| b.should_rerender(&new_props, &inst.state))
                    .unwrap_or(true)
        };
        if !rerender {
            self.state.mark_node(vel, |f| f.skipped = true);
            self.state.mark_inst(inst_id, |f| f.skipped = true);
            // Declared children the owner linked across the boundary still
            // refresh; unlinked ones have no known position and are left
            // alone.
            for child in self.tree.node(vel).children.clone() {
                if self.state.instance_for(child).is_some() {
                    self.capture(child)?;
                }
            }
            debug!(instance = ?inst_id, "subtree skipped");
            return Ok(());
        }

        {
            let inst = self.store.expect(inst_id)?;
            let snapshot = (inst.props.clone(), inst.state.clone());
            self.state
                .previous
                .entry(inst_id)
                .or_insert(snapshot);
            if !is_top && !is_new {
                if let Some(b) = inst.behavior() {
                    b.will_receive_props(&inst.props, &new_props);
                }
            }
        }
        {
            // Owner-set decorations are snapshotted before merging so a
            // later skipped pass can diff just the owner's share.
            let owner_bags = self.tree.node(vel).bags.clone();
            let inst = self.store.expect_mut(inst_id)?;
            inst.props = new_props;
            inst.owner_bags = owner_bags;
        }
        self.state.rendered_owners.insert(inst_id);

        let (content, declared_refs) = {
            let inst = self.store.expect(inst_id)?;
            let behavior = inst
                .behavior()
                .ok_or(EngineError::NotAComponent(inst_id))?;
            let mut rc = RenderContext::new(
                &mut self.tree,
                inst_id,
                inst.props.clone(),
                inst.state.clone(),
                Some(vel),
            );
            let content = behavior.render(&mut rc)?;
            (content, std::mem::take(&mut rc.declared_refs))
        };
        if !self.tree.contains(content) {
            return Err(EngineError::UnknownNode(content));
        }

        if self.tree.node(content).is_component() {
            // Forwarding: this node becomes a transparent proxy for the
            // inner component's realized element.
            self.tree.node_mut(vel).forwarded = Some(content);
            self.tree.node_mut(content).parent = Some(vel);
        } else if self.tree.node(content).is_element() {
            self.merge_rendered(vel, content);
        } else {
            let name = self
                .store
                .expect(inst_id)?
                .class_name()
                .unwrap_or_default()
                .to_string();
            return Err(EngineError::InvalidRenderOutput { component: name });
        }
        self.state.mark_node(vel, |f| f.rendered = true);

        self.resolve_refs(inst_id, vel, declared_refs)?;

        if let Some(fwd) = self.tree.node(vel).forwarded {
            self.capture(fwd)?;
        } else {
            for child in self.tree.node(vel).children.clone() {
                self.capture(child)?;
            }
        }
        Ok(())
    }

    /// Create the instance for a freshly appeared node, injecting context
    /// from the nearest component ancestor at construction time.
    fn instantiate(&mut self, vel: VNodeId) -> EngineResult<InstanceId> {
        let ancestor = self.nearest_component_ancestor(vel).or(self.context_root);
        let context = match ancestor {
            Some(a) => {
                let inst = self.store.expect(a)?;
                let mut ctx = inst.context.clone();
                if let Some(b) = inst.behavior() {
                    ctx.extend(b.child_context(&inst.props, &inst.state));
                }
                ctx
            }
            None => Context::new(),
        };
        let id = match &self.tree.node(vel).kind {
            VNodeKind::Component { class, props } => {
                let props = props.clone();
                let id = self
                    .store
                    .create_component(class.clone(), context, ancestor);
                if let Some(inst) = self.store.get_mut(id) {
                    inst.props = props;
                }
                id
            }
            VNodeKind::Element { tag } => {
                let tag = tag.clone();
                self.store.create_element(tag, ancestor)
            }
            VNodeKind::Text { .. } => self.store.create_text(ancestor),
        };
        self.state.mark_inst(id, |f| f.is_new = true);
        self.state.mark_node(vel, |f| f.is_new = true);
        self.state.link(vel, id);
        Ok(id)
    }

    fn nearest_component_ancestor(&self, vel: VNodeId) -> Option<InstanceId> {
        let mut cursor = self.tree.node(vel).parent;
        while let Some(p) = cursor {
            if let Some(inst) = self.state.instance_for(p) {
                if self.store.get(inst).is_some_and(|i| i.is_component()) {
                    return Some(inst);
                }
            }
            cursor = self.tree.node(p).parent;
        }
        None
    }

    /// Merge an element render output into the component node that produced
    /// it: tag, decorations, and children collapse onto the outer node,
    /// with the owner's decorations winning conflicts.
    fn merge_rendered(&mut self, outer: VNodeId, content: VNodeId) {
        let (tag, content_bags, content_children, literal) = {
            let c = self.tree.node(content);
            let tag = match &c.kind {
                VNodeKind::Element { tag } => tag.clone(),
                _ => String::new(),
            };
            (
                tag,
                c.bags.clone(),
                c.children.clone(),
                c.content.clone(),
            )
        };
        let owner_bags = self.tree.node(outer).bags.clone();
        let merged = crate::vnode::Bags::layered(&content_bags, &owner_bags);
        {
            let node = self.tree.node_mut(outer);
            node.host_tag = Some(tag);
            node.bags = merged;
            if literal.is_some() {
                node.content = literal;
                node.children = Vec::new();
            } else {
                node.content = None;
                node.children = content_children.clone();
            }
        }
        for child in content_children {
            self.tree.node_mut(child).parent = Some(outer);
        }
    }

    /// Resolve the refs observable in `owner`'s fresh output: explicit own
    /// refs, foreign refs injected through props, and structural refs for
    /// unnamed component children. Matching previous instances are linked.
    fn resolve_refs(
        &mut self,
        owner: InstanceId,
        vel: VNodeId,
        declared: Vec<(String, VNodeId)>,
    ) -> EngineResult<()> {
        let reachable = self.reachable_output(vel);

        for (name, node) in &declared {
            if !reachable.contains(node) {
                warn!(ref_name = %name, "declared ref never placed in the output; dropped");
            }
        }

        let mut own: Vec<(String, VNodeId)> = Vec::new();
        let mut foreign: Vec<VNodeId> = Vec::new();
        let mut unnamed_components: Vec<VNodeId> = Vec::new();
        for node in &reachable {
            let n = self.tree.node(*node);
            match (&n.ref_name, n.owner) {
                (Some(name), Some(o)) if o == owner => own.push((name.clone(), *node)),
                (Some(_), _) => foreign.push(*node),
                (None, Some(o)) if o == owner && n.is_component() => {
                    unnamed_components.push(*node)
                }
                _ => {}
            }
        }

        // Structural keys: tag path from the owner's node, disambiguated by
        // occurrence counter.
        let mut structural: Vec<(String, VNodeId)> = Vec::new();
        let mut seen: BTreeMap<String, usize> = BTreeMap::new();
        for node in unnamed_components {
            let base = self.structural_path(node, vel);
            let n = seen.entry(base.clone()).or_insert(0);
            let key = if *n == 0 {
                base
            } else {
                format!("{base}~{n}")
            };
            *n += 1;
            structural.push((key, node));
        }

        let (old_refs, old_structural) = {
            let inst = self.store.expect(owner)?;
            (inst.refs.clone(), inst.structural_refs.clone())
        };

        // Unnamed components link before explicit refs so that a named node
        // nested inside one walks an already-linked ancestor chain.
        for (key, node) in structural {
            self.link_against(node, old_structural.get(&key).copied());
            self.state.pending_refs.push(PendingRef {
                owner,
                key,
                node,
                structural: true,
            });
        }
        for (name, node) in own {
            self.link_against(node, old_refs.get(&name).copied());
            self.state.pending_refs.push(PendingRef {
                owner,
                key: name,
                node,
                structural: false,
            });
        }
        for node in foreign {
            let (f_owner, name) = {
                let n = self.tree.node(node);
                (n.owner, n.ref_name.clone())
            };
            let (Some(f_owner), Some(name)) = (f_owner, name) else {
                continue;
            };
            let prev = self
                .store
                .get(f_owner)
                .and_then(|i| i.refs.get(&name).copied());
            self.link_against(node, prev);
            self.state.pending_refs.push(PendingRef {
                owner: f_owner,
                key: name,
                node,
                structural: false,
            });
        }
        Ok(())
    }

    /// Link `node` to `prev` when the previous instance is alive,
    /// unclaimed, and of a compatible kind.
    fn link_against(&mut self, node: VNodeId, prev: Option<InstanceId>) {
        if self.state.instance_for(node).is_some() {
            return;
        }
        let Some(prev) = prev else { return };
        if self.state.node_for(prev).is_some() {
            return;
        }
        let Some(inst) = self.store.get(prev) else {
            return;
        };
        if compatible(self.tree.node(node), inst) {
            self.state.link(node, prev);
        }
    }

    /// Nodes observable by the owner in its fresh output: its rendered
    /// subtree, descending through component nodes' declared children but
    /// never into their not-yet-rendered output.
    fn reachable_output(&self, vel: VNodeId) -> Vec<VNodeId> {
        let mut out = Vec::new();
        let mut stack: Vec<VNodeId> = Vec::new();
        let root = self.tree.node(vel);
        if let Some(fwd) = root.forwarded {
            stack.push(fwd);
        } else {
            stack.extend(root.children.iter().rev());
        }
        while let Some(node) = stack.pop() {
            out.push(node);
            stack.extend(self.tree.node(node).children.iter().rev());
        }
        out
    }

    fn structural_path(&self, node: VNodeId, root: VNodeId) -> String {
        let mut segments: Vec<String> = vec![node_label(self.tree.node(node))];
        let mut cursor = self.tree.node(node).parent;
        while let Some(p) = cursor {
            if p == root {
                break;
            }
            segments.push(node_label(self.tree.node(p)));
            cursor = self.tree.node(p).parent;
        }
        segments.reverse();
        segments.join(".")
    }

    /// After capture the final tree shape is known: walk it in document
    /// order and extend every confirmed link up the ancestor chain. A chain
    /// that no longer matches marks the pair relocated.
    pub fn propagate_linking(&mut self) {
        let Some(top) = self.top else { return };
        let mut order = Vec::new();
        let mut stack = vec![top];
        while let Some(node) = stack.pop() {
            order.push(node);
            let n = self.tree.node(node);
            if let Some(fwd) = n.forwarded {
                stack.push(fwd);
            }
            stack.extend(n.children.iter().rev());
        }
        for node in order {
            if Some(node) == self.top {
                continue;
            }
            if let Some(inst) = self.state.instance_for(node) {
                if !self.state.inst(inst).is_new && self.state.node(node).linked {
                    self.map_ancestors(node, inst);
                }
            }
        }
    }

    /// Walk both ancestor chains in lockstep from a linked pair. Unclaimed
    /// element pairs with matching tags are optimistically mapped; any
    /// disagreement marks the original pair relocated.
    fn map_ancestors(&mut self, node: VNodeId, inst: InstanceId) {
        let mut v = self.tree.node(node).parent;
        let mut c = self.store.get(inst).and_then(|i| i.parent);
        loop {
            match (v, c) {
                (Some(vp), Some(cp)) => {
                    let vp_claimed = self.state.instance_for(vp).is_some();
                    let cp_claimed = self.state.node_for(cp).is_some();
                    if vp_claimed || cp_claimed {
                        if self.state.instance_for(vp) == Some(cp) {
                            return;
                        }
                        self.mark_relocated(node, inst);
                        return;
                    }
                    let tags_match = {
                        let vn = self.tree.node(vp);
                        let same = self
                            .store
                            .get(cp)
                            .and_then(|i| i.tag())
                            .zip(vn.host_tag())
                            .is_some_and(|(a, b)| a == b);
                        vn.is_element() && vn.ref_name.is_none() && same
                    };
                    if tags_match {
                        self.state.map_pair(vp, cp);
                        v = self.tree.node(vp).parent;
                        c = self.store.get(cp).and_then(|i| i.parent);
                    } else {
                        self.mark_relocated(node, inst);
                        return;
                    }
                }
                (None, None) => return,
                _ => {
                    self.mark_relocated(node, inst);
                    return;
                }
            }
        }
    }

    fn mark_relocated(&mut self, node: VNodeId, inst: InstanceId) {
        if self.state.inst(inst).relocated {
            return;
        }
        debug!(instance = ?inst, "relocation detected");
        self.state.mark_node(node, |f| f.relocated = true);
        self.state.mark_inst(inst, |f| f.relocated = true);
        self.report.relocated.push(inst);
    }

    /// Rebuild the ref tables of every owner that rendered this pass from
    /// the refs observed during capture. Runs after the update phase, once
    /// every surviving node has an instance.
    pub fn finalize_refs(&mut self) {
        let mut refs: BTreeMap<InstanceId, BTreeMap<String, InstanceId>> = BTreeMap::new();
        let mut structural: BTreeMap<InstanceId, BTreeMap<String, InstanceId>> = BTreeMap::new();
        for pr in &self.state.pending_refs {
            // A ref on a node that never made it into a captured output is
            // stale; its instance is disposed by the child scan.
            if !self.state.node(pr.node).captured {
                continue;
            }
            let Some(inst) = self.state.instance_for(pr.node) else {
                continue;
            };
            if !self.store.contains(inst) {
                continue;
            }
            let table = if pr.structural {
                &mut structural
            } else {
                &mut refs
            };
            table.entry(pr.owner).or_default().insert(pr.key.clone(), inst);
        }
        for owner in self.state.rendered_owners.clone() {
            if let Some(inst) = self.store.get_mut(owner) {
                inst.refs = refs.remove(&owner).unwrap_or_default();
                inst.structural_refs = structural.remove(&owner).unwrap_or_default();
            }
        }
    }
}

fn node_label(node: &VNode) -> String {
    match &node.kind {
        VNodeKind::Element { tag } => tag.clone(),
        VNodeKind::Component { class, .. } => class.name().to_string(),
        VNodeKind::Text { .. } => "text".to_string(),
    }
}

/// Kind compatibility between a fresh node and a previous instance.
pub(crate) fn compatible(node: &VNode, inst: &crate::component::Instance) -> bool {
    match &node.kind {
        VNodeKind::Element { tag } => inst.tag() == Some(tag.as_str()),
        VNodeKind::Component { class, .. } => inst.class_name() == Some(class.name()),
        VNodeKind::Text { .. } => matches!(inst.kind, InstanceKind::Text),
    }
}
