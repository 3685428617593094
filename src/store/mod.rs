pub mod memory;
pub mod query;
pub mod traits;
pub mod unit_of_work;

pub use memory::*;
pub use query::*;
pub use traits::*;
pub use unit_of_work::*;
