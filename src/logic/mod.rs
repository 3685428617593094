pub mod coerce;
pub mod compile;
pub mod dispatch;
pub mod filters;
pub mod guard;
pub mod parser;
pub mod reconcile;
pub mod view;

pub use coerce::*;
pub use compile::*;
pub use dispatch::*;
pub use filters::*;
pub use guard::*;
pub use parser::*;
pub use reconcile::*;
pub use view::*;
