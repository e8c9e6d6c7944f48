mod sexagesimal;
mod bus;
pub mod props;

#[cfg(test)]
pub mod mock;

pub use sexagesimal::*;
pub use bus::*;
