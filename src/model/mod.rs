pub mod common;
pub mod entity;
pub mod entity_type;
pub mod hints;
pub mod node;
pub mod plan;
pub mod registry;

pub use common::*;
pub use entity::*;
pub use entity_type::*;
pub use hints::*;
pub use node::*;
pub use plan::*;
pub use registry::*;
