//! Event dispatcher
//!
//! Every confirmation from every control connection arrives here, one at a
//! time, while the caller holds the coordinator state lock.

use st_core::{ClientId, ClientStatus};
use st_protocol::Notice;

use crate::registry::{ClientRegistry, Confirmation};

/// A notification line received on a client's control connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlEvent {
    /// Connection the line arrived on
    pub client: ClientId,
    /// Raw line, without line terminator
    pub line: String,
}

impl ControlEvent {
    /// Create a new event
    pub fn new(client: impl Into<ClientId>, line: impl Into<String>) -> Self {
        Self {
            client: client.into(),
            line: line.into(),
        }
    }
}

/// What happened to an event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Client status changed
    Applied { from: ClientStatus, to: ClientStatus },
    /// Session mismatch; dropped
    Stale,
    /// Not legal in the client's current status; dropped
    Unexpected,
    /// Payload could not be parsed; dropped
    Malformed,
    /// Event from a client that is not registered; dropped
    UnknownClient,
}

/// Parse `event` and apply it to the registry
pub fn dispatch(registry: &mut ClientRegistry, event: &ControlEvent, now: u64) -> DispatchOutcome {
    let notice: Notice = match event.line.parse() {
        Ok(notice) => notice,
        Err(e) => {
            tracing::warn!("Dropping malformed event from {}: {}", event.client, e);
            return DispatchOutcome::Malformed;
        }
    };

    let Some(client) = registry.get_mut(&event.client) else {
        tracing::warn!("Dropping {} from unknown client {}", notice, event.client);
        return DispatchOutcome::UnknownClient;
    };

    match client.confirm(&notice, now) {
        Confirmation::Applied { from, to } => {
            tracing::info!("{}: {} ({} -> {})", event.client, notice, from, to);
            DispatchOutcome::Applied { from, to }
        }
        Confirmation::Stale { expected, received } => {
            tracing::trace!(
                "{}: stale {} (session {} expected, {} received)",
                event.client,
                notice.kind,
                expected,
                received
            );
            DispatchOutcome::Stale
        }
        Confirmation::Unexpected { status } => {
            tracing::debug!("{}: ignoring {} while {}", event.client, notice, status);
            DispatchOutcome::Unexpected
        }
    }
}
