pub mod io_utils;
pub mod math;
pub mod process;
