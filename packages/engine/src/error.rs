//! Error types for the reconciliation engine

use crate::component::InstanceId;
use crate::vnode::VNodeId;
use thiserror::Error;
use vellum_dom::DomError;

/// Every failure here is a caller bug; the engine is a deterministic,
/// synchronous transformation with no transient conditions and no retries.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("render() for component '{component}' must return an element or component node")]
    InvalidRenderOutput { component: String },

    #[error("node {0:?} is not part of the active render tree")]
    UnknownNode(VNodeId),

    #[error("unknown component instance {0:?}")]
    UnknownInstance(InstanceId),

    #[error("instance {0:?} is not a component")]
    NotAComponent(InstanceId),

    #[error("cannot mix literal inner content with structured children")]
    MixedContent(VNodeId),

    #[error("node {0:?} already has a parent")]
    AlreadyAttached(VNodeId),

    #[error("text nodes carry no attributes, children, or refs")]
    InvalidTextOperation(VNodeId),

    #[error("ref '{name}' declared more than once in a single render")]
    DuplicateRef { name: String },

    #[error("component instance {0:?} has no rendered element")]
    NotRendered(InstanceId),

    #[error("instance {0:?} is already mounted")]
    AlreadyMounted(InstanceId),

    #[error("a reconciliation pass is already in progress")]
    ReentrantRender,

    #[error("index {index} out of bounds for {len} children")]
    IndexOutOfBounds { index: usize, len: usize },

    #[error("DOM error: {0}")]
    Dom(#[from] DomError),
}

pub type EngineResult<T> = Result<T, EngineError>;
