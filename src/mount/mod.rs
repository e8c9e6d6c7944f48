pub mod consts;
pub mod error;
pub mod pointing_model;
pub mod goto_monitor;
pub mod unit;
pub mod fleet;
pub mod closed_loop;
pub mod calibration;
pub mod solve_sync;

pub use consts::*;
pub use error::*;
pub use pointing_model::*;
pub use goto_monitor::*;
pub use unit::*;
pub use fleet::*;
pub use closed_loop::*;
pub use calibration::*;
pub use solve_sync::*;
