pub mod fleet;
pub use fleet::*;

pub mod store;
pub use store::*;
