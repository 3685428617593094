pub mod decoder;
pub mod encoder;
pub mod temporal;

pub use decoder::*;
pub use encoder::*;
pub use temporal::*;
