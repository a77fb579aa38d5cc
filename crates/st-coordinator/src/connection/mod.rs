//! Control connections to measurement clients

mod controller;
mod pool;

pub use controller::{connect, ControllerHandle};
pub use pool::ControllerPool;
