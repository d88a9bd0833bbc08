//! Error types for DOM backends

use crate::adapter::DomHandle;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DomError {
    #[error("unknown DOM handle {0:?}")]
    UnknownHandle(DomHandle),

    #[error("node {child:?} is not a child of {parent:?}")]
    NotAChild { parent: DomHandle, child: DomHandle },

    #[error("node {0:?} is not an element")]
    NotAnElement(DomHandle),

    #[error("anchor {0:?} not found among the parent's children")]
    AnchorNotFound(DomHandle),
}

pub type DomResult<T> = Result<T, DomError>;
