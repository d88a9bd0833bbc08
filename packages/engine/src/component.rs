//! Component behaviors and the persistent instance store
//!
//! # Model
//!
//! A [`ComponentClass`] is the unit of identity and construction: two nodes
//! reconcile to the same instance only when their classes match. The
//! [`Component`] trait is the behavior surface the class constructs; hooks
//! take `&self`, so behaviors keep interior state in cells or push it into
//! the engine-managed [`State`] map.
//!
//! Instances live in the [`ComponentStore`] across passes. The store also
//! tracks plain element and text hosts so that every realized DOM node has
//! a persistent identity the next pass can link against.

use crate::error::{EngineError, EngineResult};
use crate::vnode::{Bags, RenderContext, VNodeId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::rc::Rc;
use vellum_common::{IdGenerator, Value};
use vellum_dom::DomHandle;

/// Persistent identity of a component, element, or text instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InstanceId(u64);

/// Engine-managed component state.
pub type State = BTreeMap<String, Value>;

/// Values flowing implicitly from ancestor components to descendants,
/// merged at construction time. Frozen for the instance's lifetime.
pub type Context = BTreeMap<String, Value>;

/// Named inputs a component is invoked with, plus its declared children.
#[derive(Debug, Clone, Default)]
pub struct Props {
    values: BTreeMap<String, Value>,
    children: Vec<VNodeId>,
}

impl Props {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.values.insert(key.to_string(), value.into());
        self
    }

    pub fn set(&mut self, key: &str, value: impl Into<Value>) {
        self.values.insert(key.to_string(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn string(&self, key: &str) -> Option<&str> {
        self.values.get(key).and_then(Value::as_str)
    }

    pub fn number(&self, key: &str) -> Option<f64> {
        self.values.get(key).and_then(Value::as_f64)
    }

    pub fn boolean(&self, key: &str) -> Option<bool> {
        self.values.get(key).and_then(Value::as_bool)
    }

    pub fn values(&self) -> &BTreeMap<String, Value> {
        &self.values
    }

    /// Declared children, valid only within the pass that built them.
    pub fn children(&self) -> &[VNodeId] {
        &self.children
    }

    /// Compare named values only; children are pass-scoped ids and carry no
    /// cross-pass meaning.
    pub fn same_values(&self, other: &Props) -> bool {
        self.values == other.values
    }

    pub(crate) fn push_child(&mut self, child: VNodeId) {
        self.children.push(child);
    }

    pub(crate) fn remove_child(&mut self, child: VNodeId) {
        self.children.retain(|c| *c != child);
    }

    pub(crate) fn take_children(&mut self) -> Vec<VNodeId> {
        std::mem::take(&mut self.children)
    }

    pub(crate) fn set_children(&mut self, children: Vec<VNodeId>) {
        self.children = children;
    }
}

/// Behavior of a component instance. Every hook except `render` has a
/// default, so minimal components implement one method.
pub trait Component {
    /// Build this pass's output into the render context and return its
    /// single root, which must be an element or component node.
    fn render(&self, rc: &mut RenderContext) -> EngineResult<VNodeId>;

    /// Gate for skipping a subtree when inputs are unchanged. The engine
    /// still re-applies owner-set decorations on a skipped subtree.
    fn should_rerender(&self, _new_props: &Props, _state: &State) -> bool {
        true
    }

    fn will_receive_props(&self, _current: &Props, _incoming: &Props) {}

    fn will_update_state(&self, _current: &State, _incoming: &State) {}

    /// Fired once, the first time the instance's element sits under a
    /// mounted root. Children fire before parents.
    fn did_mount(&self) {}

    /// Fired after a pass for every instance whose element received actual
    /// writes, with the pre-pass props and state. Children fire before
    /// parents. Never fired for instances created in the same pass.
    fn did_update(&self, _previous_props: &Props, _previous_state: &State) {}

    /// Fired exactly once when the instance leaves the tree for good.
    fn dispose(&self) {}

    /// Extra context values this component exposes to descendants
    /// constructed beneath it.
    fn child_context(&self, _props: &Props, _state: &State) -> Context {
        Context::new()
    }
}

/// Constructor plus identity for a component kind.
///
/// Classes compare by name. The constructor receives the merged ancestor
/// context, so dependencies are injected at construction time and stay
/// fixed for the instance's lifetime.
#[derive(Clone)]
pub struct ComponentClass {
    name: Rc<str>,
    create: Rc<dyn Fn(&Context) -> Box<dyn Component>>,
}

impl ComponentClass {
    pub fn new<F>(name: &str, create: F) -> Self
    where
        F: Fn(&Context) -> Box<dyn Component> + 'static,
    {
        Self {
            name: Rc::from(name),
            create: Rc::new(create),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn instantiate(&self, context: &Context) -> Box<dyn Component> {
        (self.create)(context)
    }
}

impl PartialEq for ComponentClass {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for ComponentClass {}

impl fmt::Debug for ComponentClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentClass")
            .field("name", &self.name)
            .finish()
    }
}

pub(crate) enum InstanceKind {
    Component {
        class: ComponentClass,
        behavior: Box<dyn Component>,
    },
    Element {
        tag: String,
    },
    Text,
}

impl fmt::Debug for InstanceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstanceKind::Component { class, .. } => {
                write!(f, "Component({})", class.name())
            }
            InstanceKind::Element { tag } => write!(f, "Element({tag})"),
            InstanceKind::Text => write!(f, "Text"),
        }
    }
}

/// A persistent node of the component tree.
#[derive(Debug)]
pub struct Instance {
    pub(crate) id: InstanceId,
    pub(crate) kind: InstanceKind,
    pub(crate) dom: Option<DomHandle>,
    pub(crate) props: Props,
    pub(crate) state: State,
    pub(crate) context: Context,
    /// Explicitly named refs, owner's view.
    pub(crate) refs: BTreeMap<String, InstanceId>,
    /// Auto-generated structural refs for unnamed component children.
    pub(crate) structural_refs: BTreeMap<String, InstanceId>,
    pub(crate) parent: Option<InstanceId>,
    pub(crate) children: Vec<InstanceId>,
    /// Snapshot of the decorations the owner set on this instance's node,
    /// used to diff owner-side changes when the subtree itself skips.
    pub(crate) owner_bags: Bags,
    pub(crate) mounted: bool,
}

impl Instance {
    pub fn id(&self) -> InstanceId {
        self.id
    }

    pub fn dom(&self) -> Option<DomHandle> {
        self.dom
    }

    pub fn parent(&self) -> Option<InstanceId> {
        self.parent
    }

    pub fn children(&self) -> &[InstanceId] {
        &self.children
    }

    pub fn props(&self) -> &Props {
        &self.props
    }

    pub fn state(&self) -> &State {
        &self.state
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    pub fn refs(&self) -> &BTreeMap<String, InstanceId> {
        &self.refs
    }

    pub fn is_mounted(&self) -> bool {
        self.mounted
    }

    pub fn is_component(&self) -> bool {
        matches!(self.kind, InstanceKind::Component { .. })
    }

    pub fn class_name(&self) -> Option<&str> {
        match &self.kind {
            InstanceKind::Component { class, .. } => Some(class.name()),
            _ => None,
        }
    }

    pub fn tag(&self) -> Option<&str> {
        match &self.kind {
            InstanceKind::Element { tag } => Some(tag),
            _ => None,
        }
    }

    pub(crate) fn behavior(&self) -> Option<&dyn Component> {
        match &self.kind {
            InstanceKind::Component { behavior, .. } => Some(behavior.as_ref()),
            _ => None,
        }
    }
}

/// Arena of live instances, persistent across passes.
#[derive(Debug, Default)]
pub(crate) struct ComponentStore {
    instances: HashMap<InstanceId, Instance>,
    ids: IdGenerator,
}

impl ComponentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_component(
        &mut self,
        class: ComponentClass,
        context: Context,
        parent: Option<InstanceId>,
    ) -> InstanceId {
        let behavior = class.instantiate(&context);
        self.insert(InstanceKind::Component { class, behavior }, context, parent)
    }

    pub fn create_element(&mut self, tag: String, parent: Option<InstanceId>) -> InstanceId {
        self.insert(InstanceKind::Element { tag }, Context::new(), parent)
    }

    pub fn create_text(&mut self, parent: Option<InstanceId>) -> InstanceId {
        self.insert(InstanceKind::Text, Context::new(), parent)
    }

    fn insert(
        &mut self,
        kind: InstanceKind,
        context: Context,
        parent: Option<InstanceId>,
    ) -> InstanceId {
        let id = InstanceId(self.ids.next_id());
        self.instances.insert(
            id,
            Instance {
                id,
                kind,
                dom: None,
                props: Props::default(),
                state: State::new(),
                context,
                refs: BTreeMap::new(),
                structural_refs: BTreeMap::new(),
                parent,
                children: Vec::new(),
                owner_bags: Bags::default(),
                mounted: false,
            },
        );
        id
    }

    pub fn get(&self, id: InstanceId) -> Option<&Instance> {
        self.instances.get(&id)
    }

    pub fn get_mut(&mut self, id: InstanceId) -> Option<&mut Instance> {
        self.instances.get_mut(&id)
    }

    pub fn expect(&self, id: InstanceId) -> EngineResult<&Instance> {
        self.instances
            .get(&id)
            .ok_or(EngineError::UnknownInstance(id))
    }

    pub fn expect_mut(&mut self, id: InstanceId) -> EngineResult<&mut Instance> {
        self.instances
            .get_mut(&id)
            .ok_or(EngineError::UnknownInstance(id))
    }

    pub fn remove(&mut self, id: InstanceId) -> Option<Instance> {
        self.instances.remove(&id)
    }

    pub fn contains(&self, id: InstanceId) -> bool {
        self.instances.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }
}
