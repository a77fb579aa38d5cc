//! Command delivery trait

use st_protocol::Command;

use crate::error::ConnectionError;
use crate::types::ClientId;

/// Delivers commands to measurement clients.
///
/// Called while the coordinator holds its state lock, so implementations
/// must not block: queue the command and return. A failed send is reported
/// back but never retried by the caller.
pub trait CommandSink: Send + Sync {
    /// Queue `command` for `client`
    fn send(&self, client: &ClientId, command: Command) -> Result<(), ConnectionError>;
}
