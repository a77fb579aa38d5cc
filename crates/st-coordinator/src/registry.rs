//! Client registry
//!
//! One [`Client`] record per controlled connection. Records are created at
//! startup and never removed during a run; only their status, timestamp and
//! session change.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use st_core::time::{elapsed_between, is_older_than};
use st_core::{ClientId, ClientStatus};
use st_protocol::{Notice, NoticeKind, SessionId, Verb};

/// State of one measurement client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Client {
    /// Fingerprint of the fixed second-hop relay
    pub partner: String,
    /// Current protocol phase
    pub status: ClientStatus,
    /// Unix millis of the last status change
    pub status_ts: u64,
    /// Active session, or [`SessionId::NONE`]
    pub session: SessionId,
}

/// Result of applying a confirmation to a client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confirmation {
    /// Status changed
    Applied {
        from: ClientStatus,
        to: ClientStatus,
    },
    /// Carried session does not match the recorded one
    Stale {
        expected: SessionId,
        received: SessionId,
    },
    /// Session matches but the confirmation is not legal in this status
    Unexpected { status: ClientStatus },
}

impl Client {
    /// Create an idle client
    pub fn new(partner: impl Into<String>, now: u64) -> Self {
        Self {
            partner: partner.into(),
            status: ClientStatus::Idle,
            status_ts: now,
            session: SessionId::NONE,
        }
    }

    fn set_status(&mut self, status: ClientStatus, now: u64) {
        self.status = status;
        self.status_ts = now;
    }

    /// Time spent in the current status
    pub fn elapsed(&self, now: u64) -> Duration {
        elapsed_between(self.status_ts, now)
    }

    /// Whether the client has sat in its current status longer than `limit`
    pub fn overdue(&self, limit: Duration, now: u64) -> bool {
        is_older_than(self.status_ts, limit, now)
    }

    /// Whether the client holds an open session
    pub fn holds_session(&self) -> bool {
        !self.session.is_none()
    }

    /// Record that `verb` was issued. Returns the new status, or `None` if
    /// the command is not legal from the current status.
    pub fn issue(&mut self, verb: Verb, now: u64) -> Option<ClientStatus> {
        let next = self.status.after_command(verb)?;
        self.set_status(next, now);
        Some(next)
    }

    /// Apply a confirmation.
    ///
    /// `OPENED` establishes the session id; every other kind is accepted
    /// only when it carries the recorded session id. `CLOSED` clears it.
    pub fn confirm(&mut self, notice: &Notice, now: u64) -> Confirmation {
        let from = self.status;

        if notice.kind != NoticeKind::Opened && notice.session != self.session {
            return Confirmation::Stale {
                expected: self.session,
                received: notice.session,
            };
        }

        let Some(to) = from.after_notice(notice.kind) else {
            return Confirmation::Unexpected { status: from };
        };

        match notice.kind {
            NoticeKind::Opened => self.session = notice.session,
            NoticeKind::Closed => self.session = SessionId::NONE,
            NoticeKind::Started | NoticeKind::Stopped => {}
        }
        self.set_status(to, now);

        Confirmation::Applied { from, to }
    }

    /// Drop the session and return to IDLE
    pub fn force_idle(&mut self, now: u64) {
        self.session = SessionId::NONE;
        self.set_status(ClientStatus::Idle, now);
    }
}

/// All clients, ordered by id
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientRegistry {
    clients: BTreeMap<ClientId, Client>,
}

impl ClientRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a client
    pub fn insert(&mut self, id: ClientId, client: Client) {
        self.clients.insert(id, client);
    }

    /// Remove a client
    pub fn remove(&mut self, id: &ClientId) -> Option<Client> {
        self.clients.remove(id)
    }

    /// Get a client by ID
    pub fn get(&self, id: &ClientId) -> Option<&Client> {
        self.clients.get(id)
    }

    /// Get a client by ID for mutation
    pub fn get_mut(&mut self, id: &ClientId) -> Option<&mut Client> {
        self.clients.get_mut(id)
    }

    /// Iterate over all clients
    pub fn iter(&self) -> impl Iterator<Item = (&ClientId, &Client)> {
        self.clients.iter()
    }

    /// Iterate over all clients for mutation
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&ClientId, &mut Client)> {
        self.clients.iter_mut()
    }

    /// All client IDs
    pub fn ids(&self) -> Vec<ClientId> {
        self.clients.keys().cloned().collect()
    }

    /// Number of clients
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Count clients per status
    pub fn counts(&self) -> StatusCounts {
        let mut counts = StatusCounts::default();
        for client in self.clients.values() {
            counts.by_status[client.status.index()] += 1;
            counts.total += 1;
        }
        counts
    }
}

/// Number of clients in each status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusCounts {
    by_status: [usize; ClientStatus::COUNT],
    total: usize,
}

impl StatusCounts {
    /// Clients in `status`
    pub fn get(&self, status: ClientStatus) -> usize {
        self.by_status[status.index()]
    }

    /// Total number of clients counted
    pub fn total(&self) -> usize {
        self.total
    }

    /// Whether every client is in `status`
    pub fn all(&self, status: ClientStatus) -> bool {
        self.total > 0 && self.get(status) == self.total
    }

    /// Whether every client is IDLE or CLOSED
    pub fn all_settled_idle(&self) -> bool {
        self.total > 0
            && self.get(ClientStatus::Idle) + self.get(ClientStatus::Closed) == self.total
    }
}

impl fmt::Display for StatusCounts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for status in ClientStatus::ALL {
            let count = self.get(status);
            if count == 0 {
                continue;
            }
            if !first {
                write!(f, " ")?;
            }
            write!(f, "{}={}", status, count)?;
            first = false;
        }
        if first {
            write!(f, "none")?;
        }
        Ok(())
    }
}
