//! Public engine facade
//!
//! An [`Engine`] owns a DOM backend and the persistent component store and
//! exposes the operations an embedder drives reconciliation with: initial
//! render, mounting, targeted re-renders, props/state updates, and the
//! incremental child operations used for surgical edits.

use crate::capture::Pass;
use crate::component::{
    ComponentClass, ComponentStore, Context, Instance, InstanceId, Props, State,
};
use crate::error::{EngineError, EngineResult};
use crate::update::{dispose_tree, fire_mounts};
use crate::vnode::{RenderContext, VNodeId};
use serde::Serialize;
use std::collections::HashSet;
use vellum_dom::{DomAdapter, DomHandle};

/// What a pass did: write counts plus the instances each lifecycle event
/// fired for, in dispatch order.
#[derive(Debug, Default, Clone, Serialize)]
pub struct PassReport {
    /// Actual DOM mutations issued.
    pub dom_writes: u64,
    /// Pre-existing component instances whose elements changed.
    pub updated: Vec<InstanceId>,
    /// Instances newly placed under a mounted root.
    pub mounted: Vec<InstanceId>,
    /// Instances that left the tree for good.
    pub disposed: Vec<InstanceId>,
    /// Instances preserved across an ancestry change.
    pub relocated: Vec<InstanceId>,
}

pub struct Engine<D: DomAdapter> {
    dom: D,
    store: ComponentStore,
    in_pass: bool,
}

impl<D: DomAdapter> Engine<D> {
    pub fn new(dom: D) -> Self {
        Self {
            dom,
            store: ComponentStore::new(),
            in_pass: false,
        }
    }

    pub fn dom(&self) -> &D {
        &self.dom
    }

    pub fn dom_mut(&mut self) -> &mut D {
        &mut self.dom
    }

    /// Build a fresh root instance and realize its tree. The result is
    /// detached; `mount` attaches it.
    pub fn render(
        &mut self,
        class: &ComponentClass,
        props: Props,
    ) -> EngineResult<(InstanceId, PassReport)> {
        if self.in_pass {
            return Err(EngineError::ReentrantRender);
        }
        let root = self
            .store
            .create_component(class.clone(), Context::new(), None);
        self.store.expect_mut(root)?.props = props;
        let report = self.run_pass(root, true, None)?;
        Ok((root, report))
    }

    /// Attach a rendered root under a backend node and fire `did_mount`
    /// through the subtree, children before parents.
    pub fn mount(&mut self, root: InstanceId, target: DomHandle) -> EngineResult<PassReport> {
        if self.in_pass {
            return Err(EngineError::ReentrantRender);
        }
        let inst = self.store.expect(root)?;
        if inst.mounted {
            return Err(EngineError::AlreadyMounted(root));
        }
        let dom = inst.dom.ok_or(EngineError::NotRendered(root))?;
        self.dom.append_child(target, dom)?;
        let mut report = PassReport {
            dom_writes: 1,
            ..PassReport::default()
        };
        fire_mounts(&mut self.store, root, &mut report.mounted);
        Ok(report)
    }

    /// Re-run reconciliation rooted at an existing component instance.
    ///
    /// An instance whose props carry declared children cannot rebuild them
    /// itself; those nodes come out of an ancestor's `render()`. The pass
    /// is re-rooted at the nearest component ancestor whose props carry no
    /// injected children, so the side that renders them renders them again.
    pub fn rerender(&mut self, inst: InstanceId) -> EngineResult<PassReport> {
        let target = self.rerender_root(inst)?;
        self.run_pass(target, false, None)
    }

    fn rerender_root(&self, inst: InstanceId) -> EngineResult<InstanceId> {
        let mut cursor = inst;
        while !self.store.expect(cursor)?.props.children().is_empty() {
            let mut parent = self.store.expect(cursor)?.parent;
            while let Some(p) = parent {
                if self.store.expect(p)?.is_component() {
                    break;
                }
                parent = self.store.expect(p)?.parent;
            }
            let Some(p) = parent else { break };
            cursor = p;
        }
        Ok(cursor)
    }

    /// Replace a component's props and reconcile. `will_receive_props`
    /// fires before the pass with the outgoing and incoming values.
    pub fn set_props(&mut self, inst: InstanceId, props: Props) -> EngineResult<PassReport> {
        if self.in_pass {
            return Err(EngineError::ReentrantRender);
        }
        let previous = {
            let i = self.store.expect(inst)?;
            if !i.is_component() {
                return Err(EngineError::NotAComponent(inst));
            }
            if let Some(b) = i.behavior() {
                b.will_receive_props(&i.props, &props);
            }
            (i.props.clone(), i.state.clone())
        };
        self.store.expect_mut(inst)?.props = props;
        self.run_pass(inst, false, Some(previous))
    }

    /// Replace a component's engine-managed state and reconcile.
    pub fn set_state(&mut self, inst: InstanceId, state: State) -> EngineResult<PassReport> {
        if self.in_pass {
            return Err(EngineError::ReentrantRender);
        }
        let previous = {
            let i = self.store.expect(inst)?;
            if !i.is_component() {
                return Err(EngineError::NotAComponent(inst));
            }
            if let Some(b) = i.behavior() {
                b.will_update_state(&i.state, &state);
            }
            (i.props.clone(), i.state.clone())
        };
        self.store.expect_mut(inst)?.state = state;
        self.run_pass(inst, false, Some(previous))
    }

    /// Build and append a child under an existing instance's element
    /// without re-rendering the rest of the tree.
    pub fn append_child<F>(&mut self, parent: InstanceId, build: F) -> EngineResult<InstanceId>
    where
        F: FnOnce(&mut RenderContext) -> EngineResult<VNodeId>,
    {
        self.insert_impl(parent, None, build)
    }

    /// Build and insert a child at `index`; `index == len` appends.
    pub fn insert_at<F>(
        &mut self,
        parent: InstanceId,
        index: usize,
        build: F,
    ) -> EngineResult<InstanceId>
    where
        F: FnOnce(&mut RenderContext) -> EngineResult<VNodeId>,
    {
        self.insert_impl(parent, Some(index), build)
    }

    /// Remove and dispose the child at `index` under an instance.
    pub fn remove_at(&mut self, parent: InstanceId, index: usize) -> EngineResult<PassReport> {
        if self.in_pass {
            return Err(EngineError::ReentrantRender);
        }
        let parent_dom = self
            .store
            .expect(parent)?
            .dom
            .ok_or(EngineError::NotRendered(parent))?;
        let children = self.store.expect(parent)?.children.clone();
        let child = *children
            .get(index)
            .ok_or(EngineError::IndexOutOfBounds {
                index,
                len: children.len(),
            })?;

        let mut report = PassReport::default();
        if let Some(d) = self.store.get(child).and_then(|i| i.dom) {
            if self.dom.parent(d)? == Some(parent_dom) {
                self.dom.remove_child(parent_dom, d)?;
                report.dom_writes += 1;
            }
        }
        dispose_tree(&mut self.store, child, &mut report.disposed);

        let dead: HashSet<InstanceId> = report.disposed.iter().copied().collect();
        let p = self.store.expect_mut(parent)?;
        p.children.retain(|c| !dead.contains(c));
        p.refs.retain(|_, v| !dead.contains(v));
        p.structural_refs.retain(|_, v| !dead.contains(v));
        Ok(report)
    }

    pub fn instance(&self, id: InstanceId) -> Option<&Instance> {
        self.store.get(id)
    }

    pub fn instance_count(&self) -> usize {
        self.store.len()
    }

    /// Look up an instance by the ref name its owner declared.
    pub fn get_ref(&self, owner: InstanceId, name: &str) -> Option<InstanceId> {
        self.store.get(owner).and_then(|i| i.refs.get(name).copied())
    }

    /// Look up an instance by structural key (`tag.path` with an `~n`
    /// occurrence suffix past the first).
    pub fn structural_ref(&self, owner: InstanceId, key: &str) -> Option<InstanceId> {
        self.store
            .get(owner)
            .and_then(|i| i.structural_refs.get(key).copied())
    }

    /// The backend node an instance realized to.
    pub fn dom_handle(&self, inst: InstanceId) -> EngineResult<DomHandle> {
        self.store
            .expect(inst)?
            .dom
            .ok_or(EngineError::NotRendered(inst))
    }

    fn run_pass(
        &mut self,
        root: InstanceId,
        root_is_new: bool,
        previous: Option<(Props, State)>,
    ) -> EngineResult<PassReport> {
        if self.in_pass {
            return Err(EngineError::ReentrantRender);
        }
        self.in_pass = true;
        let mut pass = Pass::new(&mut self.dom, &mut self.store);
        let outcome = pass.reconcile(root, root_is_new, previous);
        let report = std::mem::take(&mut pass.report);
        drop(pass);
        self.in_pass = false;
        outcome.map(|_| report)
    }

    fn insert_impl<F>(
        &mut self,
        parent: InstanceId,
        index: Option<usize>,
        build: F,
    ) -> EngineResult<InstanceId>
    where
        F: FnOnce(&mut RenderContext) -> EngineResult<VNodeId>,
    {
        if self.in_pass {
            return Err(EngineError::ReentrantRender);
        }
        let parent_dom = self
            .store
            .expect(parent)?
            .dom
            .ok_or(EngineError::NotRendered(parent))?;
        let len = self.store.expect(parent)?.children.len();
        let at = match index {
            Some(ix) if ix > len => return Err(EngineError::IndexOutOfBounds { index: ix, len }),
            Some(ix) => ix,
            None => len,
        };
        let anchor = self.store.expect(parent)?.children.get(at).copied();

        self.in_pass = true;
        let result = Self::insert_under(
            &mut self.dom,
            &mut self.store,
            parent,
            parent_dom,
            anchor,
            build,
        );
        self.in_pass = false;
        let inst = result?;

        let p = self.store.expect_mut(parent)?;
        let at = at.min(p.children.len());
        p.children.insert(at, inst);
        Ok(inst)
    }

    fn insert_under<F>(
        dom: &mut D,
        store: &mut ComponentStore,
        parent: InstanceId,
        parent_dom: DomHandle,
        anchor: Option<InstanceId>,
        build: F,
    ) -> EngineResult<InstanceId>
    where
        F: FnOnce(&mut RenderContext) -> EngineResult<VNodeId>,
    {
        let mut pass = Pass::new(dom, store);
        pass.context_root = Some(parent);

        let (vel, declared) = {
            let p = pass.store.expect(parent)?;
            let props = p.props.clone();
            let state = p.state.clone();
            let mut rc = RenderContext::new(&mut pass.tree, parent, props, state, None);
            let vel = build(&mut rc)?;
            (vel, std::mem::take(&mut rc.declared_refs))
        };
        if !pass.tree.contains(vel) {
            return Err(EngineError::UnknownNode(vel));
        }
        if pass.tree.node(vel).parent.is_some() {
            return Err(EngineError::AlreadyAttached(vel));
        }

        pass.capture(vel)?;
        let inst = pass.realize(vel)?;

        let cd = pass
            .store
            .expect(inst)?
            .dom
            .ok_or(EngineError::NotRendered(inst))?;
        match anchor.and_then(|a| pass.store.get(a).and_then(|i| i.dom)) {
            Some(ad) => pass.dom.insert_before(parent_dom, cd, ad)?,
            None => pass.dom.append_child(parent_dom, cd)?,
        }
        pass.store.expect_mut(inst)?.parent = Some(parent);
        pass.finalize_refs();

        // Refs the builder declared belong to the parent, whose table is
        // extended rather than rebuilt.
        for (name, node) in declared {
            if let Some(i) = pass.state.instance_for(node) {
                pass.store.expect_mut(parent)?.refs.insert(name, i);
            }
        }

        if pass.store.expect(parent)?.mounted {
            let mut mounted = Vec::new();
            fire_mounts(pass.store, inst, &mut mounted);
        }
        Ok(inst)
    }
}
