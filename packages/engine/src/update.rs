//! Update phase: realizing the captured tree against the DOM
//!
//! Runs after capture and link propagation. Every node either reuses the
//! element of its linked instance (diffing decorations against what the
//! backend reports) or realizes a fresh one. Children are reconciled with
//! a two-pointer scan that prefers moving linked elements over rebuilding
//! them. Writes are counted and attributed to the instance that owns the
//! touched node, which is what drives `did_update` dispatch afterwards.

use crate::capture::Pass;
use crate::component::{ComponentStore, InstanceId, InstanceKind};
use crate::error::{EngineError, EngineResult};
use crate::vnode::{Bags, VNodeId};
use std::collections::HashSet;
use tracing::trace;
use vellum_dom::{DomAdapter, DomHandle};

impl<'a, D: DomAdapter> Pass<'a, D> {
    pub(crate) fn update_root(&mut self, top: VNodeId) -> EngineResult<()> {
        self.realize(top)?;
        Ok(())
    }

    /// Realize one node, returning its instance. The instance's element
    /// exists when this returns; attachment to a parent is the caller's
    /// business.
    pub(crate) fn realize(&mut self, vel: VNodeId) -> EngineResult<InstanceId> {
        if self.state.node(vel).skipped {
            return self.update_skipped(vel);
        }
        if self.tree.node(vel).is_text() {
            return self.realize_text(vel);
        }
        if let Some(fwd) = self.tree.node(vel).forwarded {
            // Transparent proxy: the outer instance borrows the inner
            // one's element.
            let inner = self.realize(fwd)?;
            let outer = self
                .state
                .instance_for(vel)
                .ok_or(EngineError::UnknownNode(vel))?;
            let dom = self.store.get(inner).and_then(|i| i.dom);
            {
                let o = self.store.expect_mut(outer)?;
                o.dom = dom;
                o.children = vec![inner];
            }
            if let Some(i) = self.store.get_mut(inner) {
                i.parent = Some(outer);
            }
            return Ok(outer);
        }
        self.realize_host(vel)
    }

    fn realize_text(&mut self, vel: VNodeId) -> EngineResult<InstanceId> {
        let content = self
            .tree
            .node(vel)
            .text_content()
            .unwrap_or_default()
            .to_string();
        if let Some(inst) = self.state.instance_for(vel) {
            if let Some(dom) = self.store.get(inst).and_then(|i| i.dom) {
                if self.dom.text_content(dom)? != content {
                    self.dom.set_text_content(dom, &content)?;
                    self.touch(vel);
                }
                return Ok(inst);
            }
        }
        let inst = match self.state.instance_for(vel) {
            Some(i) => i,
            None => {
                let owner = self.tree.node(vel).owner;
                let i = self.store.create_text(owner);
                self.state.mark_inst(i, |f| f.is_new = true);
                self.state.link(vel, i);
                i
            }
        };
        let dom = self.dom.create_text(&content);
        self.touch(vel);
        self.store.expect_mut(inst)?.dom = Some(dom);
        Ok(inst)
    }

    /// Realize an element node or a component node whose output merged
    /// into it.
    fn realize_host(&mut self, vel: VNodeId) -> EngineResult<InstanceId> {
        let tag = self
            .tree
            .node(vel)
            .host_tag()
            .ok_or(EngineError::UnknownNode(vel))?
            .to_string();
        let inst = match self.state.instance_for(vel) {
            Some(i) => i,
            None => {
                let owner = self.tree.node(vel).owner;
                let i = self.store.create_element(tag.clone(), owner);
                self.state.mark_inst(i, |f| f.is_new = true);
                self.state.link(vel, i);
                i
            }
        };
        let bags = self.tree.node(vel).bags.clone();
        let dom = match self.store.expect(inst)?.dom {
            Some(d) => {
                let writes = self.diff_bags(d, &bags)?;
                self.credit(vel, inst, writes);
                d
            }
            None => {
                let d = self.dom.create_element(&tag);
                let writes = 1 + self.apply_bags(d, &bags)?;
                self.credit(vel, inst, writes);
                self.store.expect_mut(inst)?.dom = Some(d);
                d
            }
        };

        if let Some(literal) = self.tree.node(vel).content.clone() {
            let kids = self.dom.children(dom)?;
            let already = kids.len() == 1
                && self.dom.is_text(kids[0])?
                && self.dom.text_content(kids[0])? == literal;
            if !already {
                for child in self.store.expect(inst)?.children.clone() {
                    self.dispose_subtree(child);
                }
                self.dom.set_text_content(dom, &literal)?;
                self.credit(vel, inst, 1);
            }
            self.store.expect_mut(inst)?.children = Vec::new();
        } else {
            self.reconcile_children(inst, dom, vel)?;
        }
        Ok(inst)
    }

    /// A skipped subtree keeps its previous output, but decorations set by
    /// the owner are still re-applied, and declared children that were
    /// injected across the ownership boundary still update in place.
    fn update_skipped(&mut self, vel: VNodeId) -> EngineResult<InstanceId> {
        let inst = self
            .state
            .instance_for(vel)
            .ok_or(EngineError::UnknownNode(vel))?;
        let dom = self
            .store
            .expect(inst)?
            .dom
            .ok_or(EngineError::NotRendered(inst))?;
        let previous = self.store.expect(inst)?.owner_bags.clone();
        let next = self.tree.node(vel).bags.clone();
        let writes = self.diff_owner_bags(dom, &next, &previous)?;
        self.touch_n(vel, writes);
        self.store.expect_mut(inst)?.owner_bags = next;

        for child in self.tree.node(vel).children.clone() {
            if let Some(ci) = self.state.instance_for(child) {
                if !self.state.inst(ci).is_new {
                    self.realize(child)?;
                }
            }
        }
        trace!(instance = ?inst, "skipped subtree refreshed");
        Ok(inst)
    }

    /// Two-pointer scan over the host's previous children and the node's
    /// fresh child list. Linked pairs are reused in place; identity held
    /// elsewhere causes detachment rather than disposal; nodes with no
    /// identity on either side are replaced outright.
    fn reconcile_children(
        &mut self,
        host: InstanceId,
        host_dom: DomHandle,
        vel: VNodeId,
    ) -> EngineResult<()> {
        let new_vels = self.tree.node(vel).children.clone();
        let new_linked: HashSet<InstanceId> = new_vels
            .iter()
            .filter_map(|v| self.state.instance_for(*v))
            .collect();

        // Previous children relocating into another part of the tree leave
        // this list before the scan; their elements are reclaimed by the
        // new site, never disposed.
        let mut old: Vec<InstanceId> = Vec::new();
        for child in self.store.expect(host)?.children.clone() {
            if !self.store.contains(child) {
                continue;
            }
            if self.state.inst(child).relocated && !new_linked.contains(&child) {
                self.unhook(host_dom, child, vel)?;
                continue;
            }
            old.push(child);
        }

        let mut result: Vec<InstanceId> = Vec::new();
        let mut i = 0;
        let mut j = 0;
        while j < new_vels.len() {
            while i < old.len() && self.state.inst(old[i]).detached {
                i += 1;
            }
            let nv = new_vels[j];
            if i >= old.len() {
                let ni = self.realize(nv)?;
                self.place(host, host_dom, ni, None, nv)?;
                result.push(ni);
                j += 1;
                continue;
            }
            let ov = old[i];

            // Unlinked text on both sides pairs up without ceremony; equal
            // content costs nothing, changed content is one write in place.
            if self.state.instance_for(nv).is_none()
                && self.state.node_for(ov).is_none()
                && self.tree.node(nv).is_text()
                && matches!(self.store.expect(ov)?.kind, InstanceKind::Text)
            {
                let content = self
                    .tree
                    .node(nv)
                    .text_content()
                    .unwrap_or_default()
                    .to_string();
                let od = self
                    .store
                    .expect(ov)?
                    .dom
                    .ok_or(EngineError::NotRendered(ov))?;
                self.state.link(nv, ov);
                if self.dom.text_content(od)? != content {
                    self.dom.set_text_content(od, &content)?;
                    self.touch(nv);
                }
                result.push(ov);
                i += 1;
                j += 1;
                continue;
            }

            // Opportunistic reuse: unclaimed element pairs with the same
            // tag and no ref identity link on the spot.
            if self.state.instance_for(nv).is_none()
                && self.state.node_for(ov).is_none()
                && !self.state.inst(ov).mapped
                && self.tree.node(nv).is_element()
                && self.tree.node(nv).ref_name.is_none()
                && self.store.expect(ov)?.tag() == self.tree.node(nv).host_tag()
            {
                self.state.link(nv, ov);
            }

            let ni = self.realize(nv)?;
            if ni == ov {
                result.push(ni);
                i += 1;
                j += 1;
                continue;
            }
            if self.state.inst(ni).relocated {
                // Reclaim the element from wherever it sat before.
                self.place(host, host_dom, ni, Some(ov), nv)?;
                result.push(ni);
                j += 1;
                continue;
            }

            let old_claimed = self.claimed(ov);
            let new_preexisting = !self.state.inst(ni).is_new;
            if old_claimed {
                // The old child's identity lives on elsewhere in the new
                // tree; take it out of the way and retry this slot.
                self.state.mark_inst(ov, |f| f.detached = true);
                self.unhook(host_dom, ov, vel)?;
                i += 1;
            } else if new_preexisting {
                self.place(host, host_dom, ni, Some(ov), nv)?;
                result.push(ni);
                j += 1;
            } else {
                // No identity on either side: replace outright.
                let od = self
                    .store
                    .expect(ov)?
                    .dom
                    .ok_or(EngineError::NotRendered(ov))?;
                let nd = self
                    .store
                    .expect(ni)?
                    .dom
                    .ok_or(EngineError::NotRendered(ni))?;
                self.dom.replace_child(host_dom, nd, od)?;
                self.touch(nv);
                self.dispose_subtree(ov);
                self.store.expect_mut(ni)?.parent = Some(host);
                result.push(ni);
                i += 1;
                j += 1;
            }
        }

        // Whatever remains of the old list is gone from the new one.
        while i < old.len() {
            let ov = old[i];
            i += 1;
            if self.state.inst(ov).detached {
                continue;
            }
            self.unhook(host_dom, ov, vel)?;
            if !self.claimed(ov) {
                self.dispose_subtree(ov);
            }
        }

        self.store.expect_mut(host)?.children = result;
        Ok(())
    }

    /// Insert `child`'s element under the host, before `anchor`'s element
    /// when given, appending otherwise. The backend detaches from any
    /// previous parent itself.
    fn place(
        &mut self,
        host: InstanceId,
        host_dom: DomHandle,
        child: InstanceId,
        anchor: Option<InstanceId>,
        nv: VNodeId,
    ) -> EngineResult<()> {
        let cd = self
            .store
            .expect(child)?
            .dom
            .ok_or(EngineError::NotRendered(child))?;
        match anchor.and_then(|a| self.store.get(a).and_then(|i| i.dom)) {
            Some(ad) => self.dom.insert_before(host_dom, cd, ad)?,
            None => self.dom.append_child(host_dom, cd)?,
        }
        self.touch(nv);
        self.store.expect_mut(child)?.parent = Some(host);
        Ok(())
    }

    /// Remove a child's element from the host, when it is still attached
    /// there. Elements already reclaimed by a new site are left alone.
    fn unhook(
        &mut self,
        host_dom: DomHandle,
        child: InstanceId,
        container: VNodeId,
    ) -> EngineResult<()> {
        if let Some(d) = self.store.get(child).and_then(|i| i.dom) {
            if self.dom.parent(d)? == Some(host_dom) {
                self.dom.remove_child(host_dom, d)?;
                self.touch(container);
            }
        }
        Ok(())
    }

    pub(crate) fn dispose_subtree(&mut self, inst: InstanceId) {
        dispose_tree(self.store, inst, &mut self.report.disposed);
    }

    /// Whether the instance's identity lives on in this pass's output. Ref
    /// resolution links declared children eagerly; the link only counts
    /// when the node also made it into a captured subtree. A declared child
    /// the receiving component left out of its output is gone for good.
    fn claimed(&self, inst: InstanceId) -> bool {
        self.state
            .node_for(inst)
            .is_some_and(|n| self.state.node(n).captured)
    }

    /// Full diff of a node's decorations against what the backend reports.
    fn diff_bags(&mut self, dom: DomHandle, bags: &Bags) -> EngineResult<u64> {
        let mut writes = 0u64;

        let current = self.dom.attributes(dom)?;
        for (k, v) in &bags.attributes {
            if current.get(k) != Some(v) {
                self.dom.set_attribute(dom, k, v)?;
                writes += 1;
            }
        }
        for k in current.keys() {
            if !bags.attributes.contains_key(k) {
                self.dom.remove_attribute(dom, k)?;
                writes += 1;
            }
        }

        let current = self.dom.classes(dom)?;
        for c in &bags.classes {
            if !current.contains(c) {
                self.dom.add_class(dom, c)?;
                writes += 1;
            }
        }
        for c in &current {
            if !bags.classes.contains(c) {
                self.dom.remove_class(dom, c)?;
                writes += 1;
            }
        }

        let current = self.dom.styles(dom)?;
        for (k, v) in &bags.styles {
            if current.get(k) != Some(v) {
                self.dom.set_style(dom, k, v)?;
                writes += 1;
            }
        }
        for k in current.keys() {
            if !bags.styles.contains_key(k) {
                self.dom.remove_style(dom, k)?;
                writes += 1;
            }
        }

        let current = self.dom.properties(dom)?;
        for (k, v) in &bags.properties {
            if current.get(k) != Some(v) {
                self.dom.set_property(dom, k, v.clone())?;
                writes += 1;
            }
        }
        for k in current.keys() {
            if !bags.properties.contains_key(k) {
                self.dom.remove_property(dom, k)?;
                writes += 1;
            }
        }

        let current = self.dom.listeners(dom)?;
        for (event, token) in &bags.listeners {
            if current.get(event) != Some(token) {
                self.dom.add_listener(dom, event, *token)?;
                writes += 1;
            }
        }
        for event in current.keys() {
            if !bags.listeners.contains_key(event) {
                self.dom.remove_listener(dom, event)?;
                writes += 1;
            }
        }

        Ok(writes)
    }

    /// Apply every decoration to a fresh element.
    fn apply_bags(&mut self, dom: DomHandle, bags: &Bags) -> EngineResult<u64> {
        let mut writes = 0u64;
        for (k, v) in &bags.attributes {
            self.dom.set_attribute(dom, k, v)?;
            writes += 1;
        }
        for c in &bags.classes {
            self.dom.add_class(dom, c)?;
            writes += 1;
        }
        for (k, v) in &bags.styles {
            self.dom.set_style(dom, k, v)?;
            writes += 1;
        }
        for (k, v) in &bags.properties {
            self.dom.set_property(dom, k, v.clone())?;
            writes += 1;
        }
        for (event, token) in &bags.listeners {
            self.dom.add_listener(dom, event, *token)?;
            writes += 1;
        }
        Ok(writes)
    }

    /// Partial diff used for skipped subtrees: only keys the owner set,
    /// previously or now, are considered. Whatever the skipped component's
    /// own render left on the element stays untouched.
    fn diff_owner_bags(
        &mut self,
        dom: DomHandle,
        next: &Bags,
        previous: &Bags,
    ) -> EngineResult<u64> {
        let mut writes = 0u64;

        for (k, v) in &next.attributes {
            if self.dom.attribute(dom, k)?.as_deref() != Some(v) {
                self.dom.set_attribute(dom, k, v)?;
                writes += 1;
            }
        }
        for k in previous.attributes.keys() {
            if !next.attributes.contains_key(k) && self.dom.attribute(dom, k)?.is_some() {
                self.dom.remove_attribute(dom, k)?;
                writes += 1;
            }
        }

        let current = self.dom.classes(dom)?;
        for c in &next.classes {
            if !current.contains(c) {
                self.dom.add_class(dom, c)?;
                writes += 1;
            }
        }
        for c in &previous.classes {
            if !next.classes.contains(c) && current.contains(c) {
                self.dom.remove_class(dom, c)?;
                writes += 1;
            }
        }

        for (k, v) in &next.styles {
            if self.dom.style(dom, k)?.as_deref() != Some(v) {
                self.dom.set_style(dom, k, v)?;
                writes += 1;
            }
        }
        for k in previous.styles.keys() {
            if !next.styles.contains_key(k) && self.dom.style(dom, k)?.is_some() {
                self.dom.remove_style(dom, k)?;
                writes += 1;
            }
        }

        for (k, v) in &next.properties {
            if self.dom.property(dom, k)?.as_ref() != Some(v) {
                self.dom.set_property(dom, k, v.clone())?;
                writes += 1;
            }
        }
        for k in previous.properties.keys() {
            if !next.properties.contains_key(k) && self.dom.property(dom, k)?.is_some() {
                self.dom.remove_property(dom, k)?;
                writes += 1;
            }
        }

        let current = self.dom.listeners(dom)?;
        for (event, token) in &next.listeners {
            if current.get(event) != Some(token) {
                self.dom.add_listener(dom, event, *token)?;
                writes += 1;
            }
        }
        for event in previous.listeners.keys() {
            if !next.listeners.contains_key(event) && current.contains_key(event) {
                self.dom.remove_listener(dom, event)?;
                writes += 1;
            }
        }

        Ok(writes)
    }

    fn touch(&mut self, vel: VNodeId) {
        self.touch_n(vel, 1);
    }

    /// Count writes and mark the node's owner updated.
    fn touch_n(&mut self, vel: VNodeId, writes: u64) {
        if writes == 0 {
            return;
        }
        self.report.dom_writes += writes;
        if let Some(owner) = self.tree.node(vel).owner {
            self.state.mark_inst(owner, |f| f.updated = true);
        }
    }

    /// Count writes on a realized host. On a merged component node the
    /// element content came out of that component's own render, so the
    /// update is the component's, not its owner's.
    fn credit(&mut self, vel: VNodeId, inst: InstanceId, writes: u64) {
        if writes == 0 {
            return;
        }
        if self.tree.node(vel).is_component() {
            self.report.dom_writes += writes;
            self.state.mark_inst(inst, |f| f.updated = true);
        } else {
            self.touch_n(vel, writes);
        }
    }

    /// Fire lifecycle hooks for the pass: `did_mount` for fresh instances
    /// under a mounted root, `did_update` for pre-existing instances whose
    /// elements actually changed. Children fire before parents.
    pub(crate) fn dispatch_lifecycle(&mut self, root: InstanceId) -> EngineResult<()> {
        let root_mounted = self.store.get(root).is_some_and(|i| i.mounted);
        if root_mounted {
            let mut mounted = std::mem::take(&mut self.report.mounted);
            fire_mounts(self.store, root, &mut mounted);
            self.report.mounted = mounted;
        }

        let mut order = Vec::new();
        collect_post_order(self.store, root, &mut order);
        for id in order {
            let flags = self.state.inst(id);
            if !flags.updated || flags.is_new {
                continue;
            }
            let Some(inst) = self.store.get(id) else { continue };
            let Some(behavior) = inst.behavior() else {
                continue;
            };
            if let Some((props, state)) = self.state.previous.get(&id) {
                behavior.did_update(props, state);
            }
            self.report.updated.push(id);
        }
        Ok(())
    }
}

pub(crate) fn collect_post_order(
    store: &ComponentStore,
    root: InstanceId,
    out: &mut Vec<InstanceId>,
) {
    let children = store
        .get(root)
        .map(|i| i.children.clone())
        .unwrap_or_default();
    for c in children {
        collect_post_order(store, c, out);
    }
    if store.contains(root) {
        out.push(root);
    }
}

/// Flip the mounted bit bottom-up, firing `did_mount` for every instance
/// seeing it for the first time.
pub(crate) fn fire_mounts(
    store: &mut ComponentStore,
    root: InstanceId,
    mounted: &mut Vec<InstanceId>,
) {
    let mut order = Vec::new();
    collect_post_order(store, root, &mut order);
    for id in order {
        let newly = match store.get_mut(id) {
            Some(inst) if !inst.mounted => {
                inst.mounted = true;
                true
            }
            _ => false,
        };
        if newly {
            if let Some(inst) = store.get(id) {
                if let Some(behavior) = inst.behavior() {
                    behavior.did_mount();
                }
            }
            mounted.push(id);
        }
    }
}

/// Dispose an instance subtree bottom-up; `dispose` fires exactly once per
/// instance as it leaves the store.
pub(crate) fn dispose_tree(
    store: &mut ComponentStore,
    inst: InstanceId,
    disposed: &mut Vec<InstanceId>,
) {
    let children = store
        .get(inst)
        .map(|i| i.children.clone())
        .unwrap_or_default();
    for c in children {
        dispose_tree(store, c, disposed);
    }
    if let Some(instance) = store.remove(inst) {
        if let Some(behavior) = instance.behavior() {
            behavior.dispose();
        }
        disposed.push(inst);
    }
}
