pub mod task;
pub mod unit;

pub use task::*;
pub use unit::*;
