//! # Vellum Engine
//!
//! Virtual-tree reconciliation for document-editing UIs.
//!
//! Each pass runs in two phases over a pass-scoped virtual tree:
//!
//! ```text
//!   render() calls          capture          update
//!  ┌──────────────┐   ┌────────────────┐   ┌─────────────────┐
//!  │ RenderContext │──▶│ link nodes to  │──▶│ diff + realize  │
//!  │ builds VTree  │   │ prior instances │   │ against the DOM │
//!  └──────────────┘   └────────────────┘   └─────────────────┘
//! ```
//!
//! Capture invokes component behaviors top-down and links fresh nodes to
//! the persistent instances that carried them last pass, through explicit
//! refs, foreign refs injected via props, auto-generated structural refs,
//! and opportunistic element pairing. Update then reconciles each linked
//! pair's element in place and realizes whatever is genuinely new, so an
//! unchanged tree costs zero DOM writes and preserves every instance,
//! element, and the focus/selection state living on them.

mod capture;
pub mod component;
pub mod engine;
pub mod error;
mod render_state;
mod update;
pub mod vnode;

pub use component::{Component, ComponentClass, Context, Instance, InstanceId, Props, State};
pub use engine::{Engine, PassReport};
pub use error::{EngineError, EngineResult};
pub use vnode::{Bags, RenderContext, VNodeId};

#[cfg(test)]
mod tests_refs;
#[cfg(test)]
mod tests_lifecycle;
