pub mod id;
pub mod value;

pub use id::*;
pub use value::*;
