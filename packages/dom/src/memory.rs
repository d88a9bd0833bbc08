//! Headless, arena-backed DOM used by tests and off-screen embedders.

use crate::adapter::{DomAdapter, DomHandle, ListenerId};
use crate::error::{DomError, DomResult};
use std::collections::{BTreeMap, BTreeSet};
use tracing::trace;
use vellum_common::Value;

#[derive(Debug, Clone)]
enum NodeData {
    Element {
        tag: String,
        attributes: BTreeMap<String, String>,
        properties: BTreeMap<String, Value>,
        styles: BTreeMap<String, String>,
        classes: BTreeSet<String>,
        listeners: BTreeMap<String, ListenerId>,
        children: Vec<DomHandle>,
    },
    Text {
        content: String,
    },
}

#[derive(Debug, Clone)]
struct MemNode {
    data: NodeData,
    parent: Option<DomHandle>,
}

/// In-memory DOM backend.
///
/// Every mutating adapter call bumps `write_count`, whether or not it
/// changed anything; the engine's zero-mutation properties are asserted
/// against this counter. Detached nodes stay in the arena — the arena is
/// pass-lifetime cheap bookkeeping, not a GC.
#[derive(Debug, Default)]
pub struct MemoryDom {
    nodes: Vec<MemNode>,
    writes: u64,
}

impl MemoryDom {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of mutating adapter calls so far.
    pub fn write_count(&self) -> u64 {
        self.writes
    }

    /// Serialize a subtree for test assertions.
    pub fn to_html(&self, node: DomHandle) -> String {
        let mut out = String::new();
        self.write_html(node, &mut out);
        out
    }

    fn write_html(&self, handle: DomHandle, out: &mut String) {
        let Ok(node) = self.node(handle) else {
            return;
        };
        match &node.data {
            NodeData::Text { content } => out.push_str(content),
            NodeData::Element {
                tag,
                attributes,
                styles,
                classes,
                children,
                ..
            } => {
                out.push('<');
                out.push_str(tag);
                if !classes.is_empty() {
                    let list = classes.iter().cloned().collect::<Vec<_>>().join(" ");
                    out.push_str(&format!(" class=\"{}\"", list));
                }
                for (name, value) in attributes {
                    out.push_str(&format!(" {}=\"{}\"", name, value));
                }
                if !styles.is_empty() {
                    let css = styles
                        .iter()
                        .map(|(k, v)| format!("{}:{}", k, v))
                        .collect::<Vec<_>>()
                        .join(";");
                    out.push_str(&format!(" style=\"{}\"", css));
                }
                out.push('>');
                for child in children {
                    self.write_html(*child, out);
                }
                out.push_str(&format!("</{}>", tag));
            }
        }
    }

    fn alloc(&mut self, data: NodeData) -> DomHandle {
        self.nodes.push(MemNode { data, parent: None });
        DomHandle(self.nodes.len() as u64)
    }

    fn index(handle: DomHandle) -> usize {
        (handle.0 as usize).wrapping_sub(1)
    }

    fn node(&self, handle: DomHandle) -> DomResult<&MemNode> {
        self.nodes
            .get(Self::index(handle))
            .ok_or(DomError::UnknownHandle(handle))
    }

    fn node_mut(&mut self, handle: DomHandle) -> DomResult<&mut MemNode> {
        self.nodes
            .get_mut(Self::index(handle))
            .ok_or(DomError::UnknownHandle(handle))
    }

    fn element_children(&self, handle: DomHandle) -> DomResult<&Vec<DomHandle>> {
        match &self.node(handle)?.data {
            NodeData::Element { children, .. } => Ok(children),
            NodeData::Text { .. } => Err(DomError::NotAnElement(handle)),
        }
    }

    fn element_children_mut(&mut self, handle: DomHandle) -> DomResult<&mut Vec<DomHandle>> {
        match &mut self.node_mut(handle)?.data {
            NodeData::Element { children, .. } => Ok(children),
            NodeData::Text { .. } => Err(DomError::NotAnElement(handle)),
        }
    }

    /// Detach from the current parent, if any. Not counted as a separate
    /// write; the callers are themselves writes.
    fn detach(&mut self, child: DomHandle) -> DomResult<()> {
        if let Some(parent) = self.node(child)?.parent {
            let children = self.element_children_mut(parent)?;
            children.retain(|c| *c != child);
            self.node_mut(child)?.parent = None;
        }
        Ok(())
    }

    fn with_element<R>(
        &mut self,
        handle: DomHandle,
        f: impl FnOnce(
            &mut BTreeMap<String, String>,
            &mut BTreeMap<String, Value>,
            &mut BTreeMap<String, String>,
            &mut BTreeSet<String>,
            &mut BTreeMap<String, ListenerId>,
        ) -> R,
    ) -> DomResult<R> {
        match &mut self.node_mut(handle)?.data {
            NodeData::Element {
                attributes,
                properties,
                styles,
                classes,
                listeners,
                ..
            } => Ok(f(attributes, properties, styles, classes, listeners)),
            NodeData::Text { .. } => Err(DomError::NotAnElement(handle)),
        }
    }
}

impl DomAdapter for MemoryDom {
    fn create_element(&mut self, tag: &str) -> DomHandle {
        self.writes += 1;
        self.alloc(NodeData::Element {
            tag: tag.to_string(),
            attributes: BTreeMap::new(),
            properties: BTreeMap::new(),
            styles: BTreeMap::new(),
            classes: BTreeSet::new(),
            listeners: BTreeMap::new(),
            children: Vec::new(),
        })
    }

    fn create_text(&mut self, content: &str) -> DomHandle {
        self.writes += 1;
        self.alloc(NodeData::Text {
            content: content.to_string(),
        })
    }

    fn tag_name(&self, node: DomHandle) -> DomResult<String> {
        match &self.node(node)?.data {
            NodeData::Element { tag, .. } => Ok(tag.clone()),
            NodeData::Text { .. } => Err(DomError::NotAnElement(node)),
        }
    }

    fn is_text(&self, node: DomHandle) -> DomResult<bool> {
        Ok(matches!(self.node(node)?.data, NodeData::Text { .. }))
    }

    fn text_content(&self, node: DomHandle) -> DomResult<String> {
        match &self.node(node)?.data {
            NodeData::Text { content } => Ok(content.clone()),
            NodeData::Element { children, .. } => {
                let children = children.clone();
                let mut out = String::new();
                for child in children {
                    out.push_str(&self.text_content(child)?);
                }
                Ok(out)
            }
        }
    }

    fn set_text_content(&mut self, node: DomHandle, content: &str) -> DomResult<()> {
        self.writes += 1;
        match &mut self.node_mut(node)?.data {
            NodeData::Text {
                content: existing, ..
            } => {
                *existing = content.to_string();
                Ok(())
            }
            NodeData::Element { .. } => {
                let children = self.element_children(node)?.clone();
                for child in children {
                    self.node_mut(child)?.parent = None;
                }
                self.element_children_mut(node)?.clear();
                let text = self.alloc(NodeData::Text {
                    content: content.to_string(),
                });
                self.node_mut(text)?.parent = Some(node);
                self.element_children_mut(node)?.push(text);
                Ok(())
            }
        }
    }

    fn attribute(&self, node: DomHandle, name: &str) -> DomResult<Option<String>> {
        match &self.node(node)?.data {
            NodeData::Element { attributes, .. } => Ok(attributes.get(name).cloned()),
            NodeData::Text { .. } => Err(DomError::NotAnElement(node)),
        }
    }

    fn attributes(&self, node: DomHandle) -> DomResult<BTreeMap<String, String>> {
        match &self.node(node)?.data {
            NodeData::Element { attributes, .. } => Ok(attributes.clone()),
            NodeData::Text { .. } => Err(DomError::NotAnElement(node)),
        }
    }

    fn set_attribute(&mut self, node: DomHandle, name: &str, value: &str) -> DomResult<()> {
        self.writes += 1;
        self.with_element(node, |attrs, _, _, _, _| {
            attrs.insert(name.to_string(), value.to_string());
        })
    }

    fn remove_attribute(&mut self, node: DomHandle, name: &str) -> DomResult<()> {
        self.writes += 1;
        self.with_element(node, |attrs, _, _, _, _| {
            attrs.remove(name);
        })
    }

    fn property(&self, node: DomHandle, name: &str) -> DomResult<Option<Value>> {
        match &self.node(node)?.data {
            NodeData::Element { properties, .. } => Ok(properties.get(name).cloned()),
            NodeData::Text { .. } => Err(DomError::NotAnElement(node)),
        }
    }

    fn properties(&self, node: DomHandle) -> DomResult<BTreeMap<String, Value>> {
        match &self.node(node)?.data {
            NodeData::Element { properties, .. } => Ok(properties.clone()),
            NodeData::Text { .. } => Err(DomError::NotAnElement(node)),
        }
    }

    fn set_property(&mut self, node: DomHandle, name: &str, value: Value) -> DomResult<()> {
        self.writes += 1;
        self.with_element(node, |_, props, _, _, _| {
            props.insert(name.to_string(), value);
        })
    }

    fn remove_property(&mut self, node: DomHandle, name: &str) -> DomResult<()> {
        self.writes += 1;
        self.with_element(node, |_, props, _, _, _| {
            props.remove(name);
        })
    }

    fn style(&self, node: DomHandle, name: &str) -> DomResult<Option<String>> {
        match &self.node(node)?.data {
            NodeData::Element { styles, .. } => Ok(styles.get(name).cloned()),
            NodeData::Text { .. } => Err(DomError::NotAnElement(node)),
        }
    }

    fn styles(&self, node: DomHandle) -> DomResult<BTreeMap<String, String>> {
        match &self.node(node)?.data {
            NodeData::Element { styles, .. } => Ok(styles.clone()),
            NodeData::Text { .. } => Err(DomError::NotAnElement(node)),
        }
    }

    fn set_style(&mut self, node: DomHandle, name: &str, value: &str) -> DomResult<()> {
        self.writes += 1;
        self.with_element(node, |_, _, styles, _, _| {
            styles.insert(name.to_string(), value.to_string());
        })
    }

    fn remove_style(&mut self, node: DomHandle, name: &str) -> DomResult<()> {
        self.writes += 1;
        self.with_element(node, |_, _, styles, _, _| {
            styles.remove(name);
        })
    }

    fn classes(&self, node: DomHandle) -> DomResult<BTreeSet<String>> {
        match &self.node(node)?.data {
            NodeData::Element { classes, .. } => Ok(classes.clone()),
            NodeData::Text { .. } => Err(DomError::NotAnElement(node)),
        }
    }

    fn add_class(&mut self, node: DomHandle, name: &str) -> DomResult<()> {
        self.writes += 1;
        self.with_element(node, |_, _, _, classes, _| {
            classes.insert(name.to_string());
        })
    }

    fn remove_class(&mut self, node: DomHandle, name: &str) -> DomResult<()> {
        self.writes += 1;
        self.with_element(node, |_, _, _, classes, _| {
            classes.remove(name);
        })
    }

    fn listeners(&self, node: DomHandle) -> DomResult<BTreeMap<String, ListenerId>> {
        match &self.node(node)?.data {
            NodeData::Element { listeners, .. } => Ok(listeners.clone()),
            NodeData::Text { .. } => Err(DomError::NotAnElement(node)),
        }
    }

    fn add_listener(
        &mut self,
        node: DomHandle,
        event: &str,
        listener: ListenerId,
    ) -> DomResult<()> {
        self.writes += 1;
        self.with_element(node, |_, _, _, _, listeners| {
            listeners.insert(event.to_string(), listener);
        })
    }

    fn remove_listener(&mut self, node: DomHandle, event: &str) -> DomResult<()> {
        self.writes += 1;
        self.with_element(node, |_, _, _, _, listeners| {
            listeners.remove(event);
        })
    }

    fn parent(&self, node: DomHandle) -> DomResult<Option<DomHandle>> {
        Ok(self.node(node)?.parent)
    }

    fn children(&self, node: DomHandle) -> DomResult<Vec<DomHandle>> {
        Ok(self.element_children(node)?.clone())
    }

    fn append_child(&mut self, parent: DomHandle, child: DomHandle) -> DomResult<()> {
        self.writes += 1;
        trace!(?parent, ?child, "append_child");
        self.element_children(parent)?;
        self.node(child)?;
        self.detach(child)?;
        self.element_children_mut(parent)?.push(child);
        self.node_mut(child)?.parent = Some(parent);
        Ok(())
    }

    fn insert_before(
        &mut self,
        parent: DomHandle,
        child: DomHandle,
        anchor: DomHandle,
    ) -> DomResult<()> {
        self.writes += 1;
        trace!(?parent, ?child, ?anchor, "insert_before");
        if !self.element_children(parent)?.contains(&anchor) {
            return Err(DomError::AnchorNotFound(anchor));
        }
        self.detach(child)?;
        let children = self.element_children_mut(parent)?;
        // position looked up after the detach; the anchor may have shifted
        let pos = children
            .iter()
            .position(|c| *c == anchor)
            .ok_or(DomError::AnchorNotFound(anchor))?;
        children.insert(pos, child);
        self.node_mut(child)?.parent = Some(parent);
        Ok(())
    }

    fn remove_child(&mut self, parent: DomHandle, child: DomHandle) -> DomResult<()> {
        self.writes += 1;
        trace!(?parent, ?child, "remove_child");
        if self.node(child)?.parent != Some(parent) {
            return Err(DomError::NotAChild { parent, child });
        }
        self.element_children_mut(parent)?.retain(|c| *c != child);
        self.node_mut(child)?.parent = None;
        Ok(())
    }

    fn replace_child(
        &mut self,
        parent: DomHandle,
        new: DomHandle,
        old: DomHandle,
    ) -> DomResult<()> {
        self.writes += 1;
        trace!(?parent, ?new, ?old, "replace_child");
        if self.node(old)?.parent != Some(parent) {
            return Err(DomError::NotAChild { parent, child: old });
        }
        self.detach(new)?;
        let children = self.element_children_mut(parent)?;
        let pos = children
            .iter()
            .position(|c| *c == old)
            .ok_or(DomError::NotAChild { parent, child: old })?;
        children[pos] = new;
        self.node_mut(old)?.parent = None;
        self.node_mut(new)?.parent = Some(parent);
        Ok(())
    }

    fn empty(&mut self, node: DomHandle) -> DomResult<()> {
        self.writes += 1;
        let children = self.element_children(node)?.clone();
        for child in children {
            self.node_mut(child)?.parent = None;
        }
        self.element_children_mut(node)?.clear();
        Ok(())
    }
}
