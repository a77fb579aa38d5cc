//! st-protocol: Control-channel language for the relay speed-test coordinator
//!
//! This crate defines the line-oriented text protocol used between the
//! coordinator and each measurement client's control port: the commands the
//! coordinator issues, the replies and asynchronous notices a client sends
//! back, and a tokio codec that frames both.

pub mod codec;
pub mod error;
pub mod message;
pub mod session;

pub use codec::{ControlCodec, ControlLine, MAX_LINE_LENGTH};
pub use error::ProtocolError;
pub use message::{
    is_notice_line, Command, Notice, NoticeKind, Reply, Verb, BANDWIDTH_EVENT, SPEEDTEST_EVENT,
};
pub use session::SessionId;
