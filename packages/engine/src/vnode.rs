//! Virtual nodes and the per-pass virtual tree
//!
//! # Lifetime
//!
//! A `VTree` lives for exactly one reconciliation pass. `render()`
//! implementations build nodes into it through a [`RenderContext`], the
//! update phase reads it while diffing against the persistent component
//! store, and the whole arena is dropped when the pass ends. Node ids are
//! plain arena indices and must never be held across passes.

use crate::component::{ComponentClass, InstanceId, Props, State};
use crate::error::{EngineError, EngineResult};
use std::collections::{BTreeMap, BTreeSet};
use vellum_common::Value;
use vellum_dom::ListenerId;

/// Index of a node in the pass-scoped [`VTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VNodeId(u32);

#[derive(Debug, Clone)]
pub enum VNodeKind {
    Element { tag: String },
    Component { class: ComponentClass, props: Props },
    Text { content: String },
}

/// The decorations a node carries besides its children: attributes,
/// classes, inline styles, DOM properties, and listener tokens.
///
/// Everything is kept in ordered maps so diffing walks keys in a stable
/// order and repeated passes issue writes deterministically.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Bags {
    pub attributes: BTreeMap<String, String>,
    pub classes: BTreeSet<String>,
    pub styles: BTreeMap<String, String>,
    pub properties: BTreeMap<String, Value>,
    pub listeners: BTreeMap<String, ListenerId>,
}

impl Bags {
    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
            && self.classes.is_empty()
            && self.styles.is_empty()
            && self.properties.is_empty()
            && self.listeners.is_empty()
    }

    /// `base` with `over` layered on top; `over` wins on conflicts.
    pub fn layered(base: &Bags, over: &Bags) -> Bags {
        let mut out = base.clone();
        out.attributes
            .extend(over.attributes.iter().map(|(k, v)| (k.clone(), v.clone())));
        out.classes.extend(over.classes.iter().cloned());
        out.styles
            .extend(over.styles.iter().map(|(k, v)| (k.clone(), v.clone())));
        out.properties
            .extend(over.properties.iter().map(|(k, v)| (k.clone(), v.clone())));
        out.listeners
            .extend(over.listeners.iter().map(|(k, v)| (k.clone(), *v)));
        out
    }
}

#[derive(Debug)]
pub struct VNode {
    pub(crate) kind: VNodeKind,
    /// Instance whose `render()` created this node.
    pub(crate) owner: Option<InstanceId>,
    pub(crate) parent: Option<VNodeId>,
    pub(crate) children: Vec<VNodeId>,
    pub(crate) bags: Bags,
    /// Explicit ref name declared by the owner.
    pub(crate) ref_name: Option<String>,
    /// Literal inner content; mutually exclusive with `children`.
    pub(crate) content: Option<String>,
    /// Set on a component node whose render output was itself a component:
    /// this node becomes a transparent proxy for the inner one.
    pub(crate) forwarded: Option<VNodeId>,
    /// Tag merged in from an element render output.
    pub(crate) host_tag: Option<String>,
}

impl VNode {
    fn new(kind: VNodeKind, owner: Option<InstanceId>) -> Self {
        Self {
            kind,
            owner,
            parent: None,
            children: Vec::new(),
            bags: Bags::default(),
            ref_name: None,
            content: None,
            forwarded: None,
            host_tag: None,
        }
    }

    pub(crate) fn is_component(&self) -> bool {
        matches!(self.kind, VNodeKind::Component { .. })
    }

    pub(crate) fn is_element(&self) -> bool {
        matches!(self.kind, VNodeKind::Element { .. })
    }

    pub(crate) fn is_text(&self) -> bool {
        matches!(self.kind, VNodeKind::Text { .. })
    }

    /// Tag this node realizes to, once merging has happened: the element's
    /// own tag, or the tag a component node absorbed from its output.
    pub(crate) fn host_tag(&self) -> Option<&str> {
        match &self.kind {
            VNodeKind::Element { tag } => Some(tag),
            VNodeKind::Component { .. } => self.host_tag.as_deref(),
            VNodeKind::Text { .. } => None,
        }
    }

    pub(crate) fn text_content(&self) -> Option<&str> {
        match &self.kind {
            VNodeKind::Text { content } => Some(content),
            _ => None,
        }
    }
}

/// Pass-scoped arena of virtual nodes.
#[derive(Debug, Default)]
pub struct VTree {
    nodes: Vec<VNode>,
}

impl VTree {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&mut self, kind: VNodeKind, owner: Option<InstanceId>) -> VNodeId {
        let id = VNodeId(self.nodes.len() as u32);
        self.nodes.push(VNode::new(kind, owner));
        id
    }

    pub(crate) fn contains(&self, id: VNodeId) -> bool {
        (id.0 as usize) < self.nodes.len()
    }

    /// Ids are only minted by `push`, so indexing is infallible for any id
    /// that came out of this tree. Caller-supplied ids are bounds-checked at
    /// the `RenderContext` boundary.
    pub(crate) fn node(&self, id: VNodeId) -> &VNode {
        &self.nodes[id.0 as usize]
    }

    pub(crate) fn node_mut(&mut self, id: VNodeId) -> &mut VNode {
        &mut self.nodes[id.0 as usize]
    }

    pub(crate) fn len(&self) -> usize {
        self.nodes.len()
    }
}

/// Builder handed to `Component::render`.
///
/// All construction is fail-fast: structural mistakes (attaching a node
/// twice, mixing literal content with children, duplicate ref names) error
/// at the call site rather than surfacing later as a mangled tree.
pub struct RenderContext<'t> {
    tree: &'t mut VTree,
    owner: InstanceId,
    props: Props,
    state: State,
    /// The component node currently being rendered, if any. Its declared
    /// children may be re-parented into the output being built here.
    host: Option<VNodeId>,
    pub(crate) declared_refs: Vec<(String, VNodeId)>,
}

impl<'t> RenderContext<'t> {
    pub(crate) fn new(
        tree: &'t mut VTree,
        owner: InstanceId,
        props: Props,
        state: State,
        host: Option<VNodeId>,
    ) -> Self {
        Self {
            tree,
            owner,
            props,
            state,
            host,
            declared_refs: Vec::new(),
        }
    }

    /// Props the component was invoked with, including declared children.
    pub fn props(&self) -> &Props {
        &self.props
    }

    pub fn state(&self) -> &State {
        &self.state
    }

    pub fn element(&mut self, tag: &str) -> VNodeId {
        self.tree.push(
            VNodeKind::Element {
                tag: tag.to_string(),
            },
            Some(self.owner),
        )
    }

    pub fn text(&mut self, content: &str) -> VNodeId {
        self.tree.push(
            VNodeKind::Text {
                content: content.to_string(),
            },
            Some(self.owner),
        )
    }

    /// Create a component node. Children already present in `props` become
    /// the node's declared children.
    pub fn component(&mut self, class: &ComponentClass, mut props: Props) -> EngineResult<VNodeId> {
        let children = props.take_children();
        for c in &children {
            self.check(*c)?;
        }
        let id = self.tree.push(
            VNodeKind::Component {
                class: class.clone(),
                props,
            },
            Some(self.owner),
        );
        for c in children {
            self.attach(id, c)?;
        }
        Ok(id)
    }

    pub fn attr(&mut self, node: VNodeId, name: &str, value: &str) -> EngineResult<()> {
        self.decorated(node)?
            .attributes
            .insert(name.to_string(), value.to_string());
        Ok(())
    }

    pub fn class(&mut self, node: VNodeId, name: &str) -> EngineResult<()> {
        self.decorated(node)?.classes.insert(name.to_string());
        Ok(())
    }

    pub fn style(&mut self, node: VNodeId, name: &str, value: &str) -> EngineResult<()> {
        self.decorated(node)?
            .styles
            .insert(name.to_string(), value.to_string());
        Ok(())
    }

    pub fn property(
        &mut self,
        node: VNodeId,
        name: &str,
        value: impl Into<Value>,
    ) -> EngineResult<()> {
        self.decorated(node)?
            .properties
            .insert(name.to_string(), value.into());
        Ok(())
    }

    /// Register a listener token for `event`. The engine only diffs tokens;
    /// dispatch is the embedder's business.
    pub fn on(&mut self, node: VNodeId, event: &str, listener: ListenerId) -> EngineResult<()> {
        self.decorated(node)?
            .listeners
            .insert(event.to_string(), listener);
        Ok(())
    }

    /// Name a node so the owner can retrieve its instance across passes.
    pub fn reference(&mut self, node: VNodeId, name: &str) -> EngineResult<()> {
        self.check(node)?;
        if self.tree.node(node).is_text() {
            return Err(EngineError::InvalidTextOperation(node));
        }
        if self.declared_refs.iter().any(|(n, _)| n == name) {
            return Err(EngineError::DuplicateRef {
                name: name.to_string(),
            });
        }
        self.tree.node_mut(node).ref_name = Some(name.to_string());
        self.declared_refs.push((name.to_string(), node));
        Ok(())
    }

    pub fn append(&mut self, parent: VNodeId, child: VNodeId) -> EngineResult<()> {
        self.check(parent)?;
        self.check(child)?;
        self.attach(parent, child)
    }

    /// Set literal inner content on an element or component node.
    pub fn inner_text(&mut self, node: VNodeId, content: &str) -> EngineResult<()> {
        self.check(node)?;
        let n = self.tree.node(node);
        if n.is_text() {
            return Err(EngineError::InvalidTextOperation(node));
        }
        if !n.children.is_empty() {
            return Err(EngineError::MixedContent(node));
        }
        self.tree.node_mut(node).content = Some(content.to_string());
        Ok(())
    }

    fn check(&self, id: VNodeId) -> EngineResult<()> {
        if self.tree.contains(id) {
            Ok(())
        } else {
            Err(EngineError::UnknownNode(id))
        }
    }

    fn decorated(&mut self, node: VNodeId) -> EngineResult<&mut Bags> {
        self.check(node)?;
        if self.tree.node(node).is_text() {
            return Err(EngineError::InvalidTextOperation(node));
        }
        Ok(&mut self.tree.node_mut(node).bags)
    }

    fn attach(&mut self, parent: VNodeId, child: VNodeId) -> EngineResult<()> {
        if self.tree.node(parent).is_text() {
            return Err(EngineError::InvalidTextOperation(parent));
        }
        if self.tree.node(parent).content.is_some() {
            return Err(EngineError::MixedContent(parent));
        }
        match self.tree.node(child).parent {
            // Declared children of the component being rendered may be
            // re-parented into its output.
            Some(p) if Some(p) == self.host => {
                let host = self.tree.node_mut(p);
                host.children.retain(|c| *c != child);
                if let VNodeKind::Component { props, .. } = &mut host.kind {
                    props.remove_child(child);
                }
            }
            Some(_) => return Err(EngineError::AlreadyAttached(child)),
            None => {}
        }
        self.tree.node_mut(child).parent = Some(parent);
        self.tree.node_mut(parent).children.push(child);
        // Declared children of a component node are mirrored into its props.
        if let VNodeKind::Component { props, .. } = &mut self.tree.node_mut(parent).kind {
            props.push_child(child);
        }
        Ok(())
    }
}
