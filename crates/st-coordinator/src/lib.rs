//! st-coordinator: Drives a pool of relay speed-test clients in lockstep
//!
//! The coordinator connects to every configured client's control port and
//! walks the whole pool through OPEN, START, STOP and CLOSE against one
//! target at a time. Clients that fall behind are nudged and eventually
//! reset, and the full state is checkpointed after every tick so a restart
//! resumes without repeating completed measurements.

pub mod catalog;
pub mod checkpoint;
pub mod connection;
pub mod coordinator;
pub mod dispatcher;
pub mod registry;
pub mod scheduler;
pub mod state;

#[cfg(test)]
mod testing;

pub use checkpoint::CheckpointStore;
pub use coordinator::{Coordinator, HeartbeatReport};
pub use dispatcher::{ControlEvent, DispatchOutcome};
pub use scheduler::{Scheduler, TickOutcome};
pub use state::CoordinatorState;
