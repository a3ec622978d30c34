//! Live in-memory state shared between probe tasks and the render loop.
//!
//! Nothing here outlives the process.

mod live;
mod log_ring;
mod models;

pub use live::*;
pub use log_ring::*;
pub use models::*;
