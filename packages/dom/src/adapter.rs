//! The adapter trait every DOM backend implements.

use crate::error::DomResult;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use vellum_common::Value;

/// Opaque handle to a backend node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DomHandle(pub u64);

/// Opaque event-listener token.
///
/// The engine diffs listener bags by token; the actual callbacks live with
/// the embedder, keyed by this value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ListenerId(pub u64);

/// Primitive node operations consumed by the reconciliation engine.
///
/// Getters never count as writes; every mutating call does, whether or not
/// it changes anything — the engine is responsible for not issuing
/// redundant writes, and backends may count calls to let tests verify that.
pub trait DomAdapter {
    // --- creation ---
    fn create_element(&mut self, tag: &str) -> DomHandle;
    fn create_text(&mut self, content: &str) -> DomHandle;

    // --- node inspection ---
    fn tag_name(&self, node: DomHandle) -> DomResult<String>;
    fn is_text(&self, node: DomHandle) -> DomResult<bool>;
    fn text_content(&self, node: DomHandle) -> DomResult<String>;
    /// Replace the node's content: the literal for a text node, a single
    /// synthesized text child for an element.
    fn set_text_content(&mut self, node: DomHandle, content: &str) -> DomResult<()>;

    // --- attributes ---
    fn attribute(&self, node: DomHandle, name: &str) -> DomResult<Option<String>>;
    fn attributes(&self, node: DomHandle) -> DomResult<BTreeMap<String, String>>;
    fn set_attribute(&mut self, node: DomHandle, name: &str, value: &str) -> DomResult<()>;
    fn remove_attribute(&mut self, node: DomHandle, name: &str) -> DomResult<()>;

    // --- properties ---
    fn property(&self, node: DomHandle, name: &str) -> DomResult<Option<Value>>;
    fn properties(&self, node: DomHandle) -> DomResult<BTreeMap<String, Value>>;
    fn set_property(&mut self, node: DomHandle, name: &str, value: Value) -> DomResult<()>;
    fn remove_property(&mut self, node: DomHandle, name: &str) -> DomResult<()>;

    // --- styles ---
    fn style(&self, node: DomHandle, name: &str) -> DomResult<Option<String>>;
    fn styles(&self, node: DomHandle) -> DomResult<BTreeMap<String, String>>;
    fn set_style(&mut self, node: DomHandle, name: &str, value: &str) -> DomResult<()>;
    fn remove_style(&mut self, node: DomHandle, name: &str) -> DomResult<()>;

    // --- classes ---
    fn classes(&self, node: DomHandle) -> DomResult<BTreeSet<String>>;
    fn add_class(&mut self, node: DomHandle, name: &str) -> DomResult<()>;
    fn remove_class(&mut self, node: DomHandle, name: &str) -> DomResult<()>;

    // --- listeners ---
    fn listeners(&self, node: DomHandle) -> DomResult<BTreeMap<String, ListenerId>>;
    fn add_listener(&mut self, node: DomHandle, event: &str, listener: ListenerId)
        -> DomResult<()>;
    fn remove_listener(&mut self, node: DomHandle, event: &str) -> DomResult<()>;

    // --- structure ---
    fn parent(&self, node: DomHandle) -> DomResult<Option<DomHandle>>;
    fn children(&self, node: DomHandle) -> DomResult<Vec<DomHandle>>;
    /// Append `child` as the last child of `parent`, detaching it from any
    /// previous parent first (browser semantics).
    fn append_child(&mut self, parent: DomHandle, child: DomHandle) -> DomResult<()>;
    /// Insert `child` immediately before `anchor` under `parent`, detaching
    /// it from any previous parent first.
    fn insert_before(
        &mut self,
        parent: DomHandle,
        child: DomHandle,
        anchor: DomHandle,
    ) -> DomResult<()>;
    /// Fails with `NotAChild` when `child` is not currently under `parent`.
    fn remove_child(&mut self, parent: DomHandle, child: DomHandle) -> DomResult<()>;
    /// Fails with `NotAChild` when `old` is not currently under `parent`.
    fn replace_child(
        &mut self,
        parent: DomHandle,
        new: DomHandle,
        old: DomHandle,
    ) -> DomResult<()>;
    /// Remove all children.
    fn empty(&mut self, node: DomHandle) -> DomResult<()>;
}
