//! # Vellum DOM
//!
//! The backend boundary of the Vellum rendering engine.
//!
//! The engine never talks to a concrete document tree directly; it consumes
//! the [`DomAdapter`] trait, a small set of object-level operations (create,
//! attribute/class/style/property/listener access, child list surgery).
//! [`MemoryDom`] is the headless implementation used by tests, benches, and
//! off-screen embedders. A browser backend implements the same trait.

pub mod adapter;
pub mod error;
pub mod memory;

pub use adapter::{DomAdapter, DomHandle, ListenerId};
pub use error::{DomError, DomResult};
pub use memory::MemoryDom;
