//! Core domain types

use serde::{Deserialize, Serialize};
use std::fmt;

use st_protocol::{NoticeKind, Verb};

/// Name of a configured measurement client
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(pub String);

impl ClientId {
    /// Create a new client ID
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the raw ID string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ClientId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ClientId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Relay fingerprint of a measurement target
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct TargetId(String);

impl TargetId {
    /// Create a target ID, normalizing the fingerprint.
    ///
    /// A leading `$` is dropped and hex digits are upper-cased so that ids
    /// coming from the feed, the config lists and the checkpoint compare
    /// equal.
    pub fn new(id: impl AsRef<str>) -> Self {
        let id = id.as_ref().trim();
        Self(id.trim_start_matches('$').to_ascii_uppercase())
    }

    /// Get the normalized fingerprint
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for TargetId {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<&str> for TargetId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<TargetId> for String {
    fn from(id: TargetId) -> Self {
        id.0
    }
}

/// One row of the external catalog feed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogEntry {
    /// Target fingerprint
    pub id: TargetId,
    /// Ranking score, e.g. advertised bandwidth
    pub priority: u64,
    /// Human-readable relay nickname, when the feed has one
    pub nickname: Option<String>,
}

impl CatalogEntry {
    /// Create a catalog entry without a nickname
    pub fn new(id: impl Into<TargetId>, priority: u64) -> Self {
        Self {
            id: id.into(),
            priority,
            nickname: None,
        }
    }
}

/// Protocol phase of one measurement client.
///
/// Commands move a client from a settled state into the matching `-ing`
/// state; confirmations move it from `-ing` to `-ed`. The legal moves are
/// spelled out in [`ClientStatus::after_command`] and
/// [`ClientStatus::after_notice`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientStatus {
    #[default]
    Idle,
    Opening,
    Opened,
    Starting,
    Started,
    Stopping,
    Stopped,
    Closing,
    Closed,
}

impl ClientStatus {
    /// Number of states
    pub const COUNT: usize = 9;

    /// Every state, in protocol order
    pub const ALL: [ClientStatus; Self::COUNT] = [
        ClientStatus::Idle,
        ClientStatus::Opening,
        ClientStatus::Opened,
        ClientStatus::Starting,
        ClientStatus::Started,
        ClientStatus::Stopping,
        ClientStatus::Stopped,
        ClientStatus::Closing,
        ClientStatus::Closed,
    ];

    /// Position of this state in [`ClientStatus::ALL`]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// State entered when `verb` is issued from this state, or `None` if the
    /// command is not legal here.
    pub const fn after_command(self, verb: Verb) -> Option<ClientStatus> {
        use ClientStatus::*;
        match (self, verb) {
            (Idle | Closed, Verb::Open) => Some(Opening),
            (Opened, Verb::Start) => Some(Starting),
            (Starting | Started, Verb::Stop) => Some(Stopping),
            (Opened | Starting | Started | Stopping | Stopped, Verb::Close) => Some(Closing),
            _ => None,
        }
    }

    /// State entered when a confirmation of `kind` arrives in this state, or
    /// `None` if the confirmation does not apply here.
    ///
    /// A burst ends on its own once its duration elapses, so `STOPPED` is
    /// accepted from `STARTED` as well as `STOPPING`. A circuit can collapse
    /// at any point, so `CLOSED` is accepted from every state that holds a
    /// session.
    pub const fn after_notice(self, kind: NoticeKind) -> Option<ClientStatus> {
        use ClientStatus::*;
        match (self, kind) {
            (Opening, NoticeKind::Opened) => Some(Opened),
            (Starting, NoticeKind::Started) => Some(Started),
            (Starting | Started | Stopping, NoticeKind::Stopped) => Some(Stopped),
            (Opened | Starting | Started | Stopping | Stopped | Closing, NoticeKind::Closed) => {
                Some(Closed)
            }
            _ => None,
        }
    }

    /// Whether the client is ready for a new OPEN
    pub const fn is_settled_idle(self) -> bool {
        matches!(self, ClientStatus::Idle | ClientStatus::Closed)
    }

    /// Whether a burst is starting or running
    pub const fn is_bursting(self) -> bool {
        matches!(self, ClientStatus::Starting | ClientStatus::Started)
    }

    /// Whether the circuit is being or has been torn down
    pub const fn is_closing(self) -> bool {
        matches!(self, ClientStatus::Closing | ClientStatus::Closed)
    }
}

impl fmt::Display for ClientStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ClientStatus::Idle => "IDLE",
            ClientStatus::Opening => "OPENING",
            ClientStatus::Opened => "OPENED",
            ClientStatus::Starting => "STARTING",
            ClientStatus::Started => "STARTED",
            ClientStatus::Stopping => "STOPPING",
            ClientStatus::Stopped => "STOPPED",
            ClientStatus::Closing => "CLOSING",
            ClientStatus::Closed => "CLOSED",
        };
        write!(f, "{}", name)
    }
}
