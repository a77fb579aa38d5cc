//! Protocol error types

use thiserror::Error;

/// Errors that can occur while framing or parsing control lines
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// Line exceeds the codec's maximum length
    #[error("Line too long: exceeds maximum of {max} bytes")]
    LineTooLong { max: usize },

    /// Notice line does not have the expected shape
    #[error("Malformed notice: {0:?}")]
    MalformedNotice(String),

    /// Notice names a confirmation kind we do not know
    #[error("Unknown notice kind: {0}")]
    UnknownNoticeKind(String),

    /// Session id field is not an unsigned integer
    #[error("Invalid session id: {0:?}")]
    InvalidSessionId(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
