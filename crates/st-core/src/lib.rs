//! st-core: Core abstractions and configuration for the relay speed-test coordinator
//!
//! This crate provides the shared domain types (client and target
//! identities, the client status state machine), configuration structures,
//! error types, and the traits the coordinator is written against.

pub mod config;
pub mod error;
pub mod time;
pub mod traits;
pub mod types;

pub use error::StError;
pub use types::{CatalogEntry, ClientId, ClientStatus, TargetId};
