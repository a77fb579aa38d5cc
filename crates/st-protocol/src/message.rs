//! Message types for the control protocol
//!
//! Every message is a single text line. The coordinator writes [`Command`]s;
//! a client answers each with a [`Reply`] and, asynchronously, emits
//! [`Notice`]s when a measurement circuit changes phase.
//!
//! # Message Flow
//!
//! 1. Coordinator sends `AUTHENTICATE` and `SETEVENTS SPEEDTEST`
//! 2. `OPEN <target>,<partner>` is confirmed by `NOTICE OPENED <session>`
//! 3. `START <session> <seconds>` is confirmed by `NOTICE STARTED <session>`
//! 4. The burst ends on its own or after `STOP <session>`: `NOTICE STOPPED <session>`
//! 5. `CLOSE <session>` is confirmed by `NOTICE CLOSED <session>`
//!
//! Notices may also arrive in the control-port event form
//! `650 SPEEDTEST <KIND> <session> ...`; both forms parse to the same value.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;
use crate::session::SessionId;

/// Event name the coordinator must be able to subscribe to
pub const SPEEDTEST_EVENT: &str = "SPEEDTEST";

/// Optional bandwidth event subscribed alongside [`SPEEDTEST_EVENT`]
pub const BANDWIDTH_EVENT: &str = "BW";

/// Status code that prefixes asynchronous control-port events
const ASYNC_EVENT_CODE: &str = "650";

/// The four group-protocol commands, without their arguments
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Verb {
    /// Build a measurement circuit
    Open,
    /// Begin a timed traffic burst
    Start,
    /// End a burst early
    Stop,
    /// Tear the circuit down
    Close,
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verb::Open => write!(f, "OPEN"),
            Verb::Start => write!(f, "START"),
            Verb::Stop => write!(f, "STOP"),
            Verb::Close => write!(f, "CLOSE"),
        }
    }
}

/// A command line written to a client's control connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Authenticate the control connection
    Authenticate { secret: Option<String> },
    /// Replace the set of asynchronous events delivered on this connection
    SetEvents { events: Vec<String> },
    /// Open a two-hop circuit through `target` and the client's `partner`
    Open { target: String, partner: String },
    /// Start a burst of `duration_secs` seconds on `session`
    Start { session: SessionId, duration_secs: u64 },
    /// Stop the burst on `session`
    Stop { session: SessionId },
    /// Close `session`
    Close { session: SessionId },
    /// Politely end the control connection
    Quit,
}

impl Command {
    /// Group-protocol verb of this command, if it is one
    pub fn verb(&self) -> Option<Verb> {
        match self {
            Command::Open { .. } => Some(Verb::Open),
            Command::Start { .. } => Some(Verb::Start),
            Command::Stop { .. } => Some(Verb::Stop),
            Command::Close { .. } => Some(Verb::Close),
            Command::Authenticate { .. } | Command::SetEvents { .. } | Command::Quit => None,
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Authenticate { secret: None } => write!(f, "AUTHENTICATE"),
            Command::Authenticate {
                secret: Some(secret),
            } => write!(f, "AUTHENTICATE \"{}\"", secret.replace('"', "\\\"")),
            Command::SetEvents { events } => write!(f, "SETEVENTS {}", events.join(" ")),
            Command::Open { target, partner } => write!(f, "OPEN {},{}", target, partner),
            Command::Start {
                session,
                duration_secs,
            } => write!(f, "START {} {}", session, duration_secs),
            Command::Stop { session } => write!(f, "STOP {}", session),
            Command::Close { session } => write!(f, "CLOSE {}", session),
            Command::Quit => write!(f, "QUIT"),
        }
    }
}

/// Which phase a client is confirming
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NoticeKind {
    Opened,
    Started,
    Stopped,
    Closed,
}

impl FromStr for NoticeKind {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "OPENED" => Ok(NoticeKind::Opened),
            "STARTED" => Ok(NoticeKind::Started),
            "STOPPED" => Ok(NoticeKind::Stopped),
            "CLOSED" => Ok(NoticeKind::Closed),
            other => Err(ProtocolError::UnknownNoticeKind(other.to_string())),
        }
    }
}

impl fmt::Display for NoticeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NoticeKind::Opened => write!(f, "OPENED"),
            NoticeKind::Started => write!(f, "STARTED"),
            NoticeKind::Stopped => write!(f, "STOPPED"),
            NoticeKind::Closed => write!(f, "CLOSED"),
        }
    }
}

/// An asynchronous phase confirmation from a client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Notice {
    /// Confirmed phase
    pub kind: NoticeKind,
    /// Session the confirmation belongs to
    pub session: SessionId,
}

impl Notice {
    /// Create a new notice
    pub fn new(kind: NoticeKind, session: SessionId) -> Self {
        Self { kind, session }
    }
}

impl FromStr for Notice {
    type Err = ProtocolError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = line.split_whitespace().collect();
        let (kind, session) = match parts.as_slice() {
            ["NOTICE", kind, session, ..] => (*kind, *session),
            [ASYNC_EVENT_CODE, SPEEDTEST_EVENT, kind, session, ..] => (*kind, *session),
            _ => return Err(ProtocolError::MalformedNotice(line.to_string())),
        };

        Ok(Notice {
            kind: kind.parse()?,
            session: session.parse()?,
        })
    }
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NOTICE {} {}", self.kind, self.session)
    }
}

/// Whether a received line should be routed to the event dispatcher.
///
/// Plain `NOTICE` lines and `650 SPEEDTEST` events qualify; other
/// asynchronous events (bandwidth reports) and command replies do not.
pub fn is_notice_line(line: &str) -> bool {
    let mut parts = line.split_whitespace();
    match parts.next() {
        Some("NOTICE") => true,
        Some(ASYNC_EVENT_CODE) => parts.next() == Some(SPEEDTEST_EVENT),
        _ => false,
    }
}

/// Synchronous answer to a command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Command accepted
    Ok { message: String },
    /// Command refused
    Error { code: Option<u16>, message: String },
}

impl Reply {
    /// Parse a reply line.
    ///
    /// Accepts numeric status lines (`250 OK`, `250-...`, `552 Unrecognized
    /// event`) and the bare `OK` / `ERR <message>` forms. Returns `None` for
    /// asynchronous `650` events and anything else that is not a reply.
    pub fn parse(line: &str) -> Option<Reply> {
        let line = line.trim();
        if line == "OK" || line.starts_with("OK ") {
            return Some(Reply::Ok {
                message: line[2..].trim().to_string(),
            });
        }
        if line == "ERR" || line.starts_with("ERR ") {
            return Some(Reply::Error {
                code: None,
                message: line[3..].trim().to_string(),
            });
        }

        let code_str = line.get(..3)?;
        let code: u16 = code_str.parse().ok()?;
        if code_str == ASYNC_EVENT_CODE {
            return None;
        }
        let message = line[3..]
            .trim_start_matches(['-', '+', ' '])
            .trim()
            .to_string();

        match code {
            200..=299 => Some(Reply::Ok { message }),
            400..=599 => Some(Reply::Error {
                code: Some(code),
                message,
            }),
            _ => None,
        }
    }

    /// Whether the command was accepted
    pub fn is_ok(&self) -> bool {
        matches!(self, Reply::Ok { .. })
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reply::Ok { message } => write!(f, "OK {}", message),
            Reply::Error {
                code: Some(code),
                message,
            } => write!(f, "{} {}", code, message),
            Reply::Error {
                code: None,
                message,
            } => write!(f, "ERR {}", message),
        }
    }
}
