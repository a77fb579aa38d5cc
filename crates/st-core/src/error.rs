//! Core error types for the speed-test coordinator

use st_protocol::ProtocolError;
use std::path::PathBuf;
use thiserror::Error;

use crate::types::ClientId;

/// Top-level error type
#[derive(Error, Debug)]
pub enum StError {
    /// Protocol error
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Connection error
    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Checkpoint error
    #[error("Checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),

    /// Catalog error
    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Control-connection errors
#[derive(Error, Debug)]
pub enum ConnectionError {
    /// TCP connection could not be established
    #[error("Failed to connect to {client} at {address}: {source}")]
    ConnectFailed {
        client: ClientId,
        address: String,
        #[source]
        source: std::io::Error,
    },

    /// Connection attempt did not finish in time
    #[error("Timed out connecting to {client} at {address}")]
    Timeout { client: ClientId, address: String },

    /// A handshake command was refused
    #[error("{client} refused {command}: {reply}")]
    Rejected {
        client: ClientId,
        command: String,
        reply: String,
    },

    /// The client cannot deliver a protocol capability the coordinator needs
    #[error("{client} does not support required capability {capability}")]
    CapabilityUnavailable {
        client: ClientId,
        capability: String,
    },

    /// Connection closed before or while talking to it
    #[error("Connection to {0} is closed")]
    Closed(ClientId),

    /// Command queue for the client is full
    #[error("Command queue for {0} is full")]
    QueueFull(ClientId),

    /// No connection is registered under this client id
    #[error("Unknown client: {0}")]
    UnknownClient(ClientId),

    /// Protocol error on the connection
    #[error("Protocol error on {client}: {source}")]
    Protocol {
        client: ClientId,
        #[source]
        source: ProtocolError,
    },
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file not found
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    /// Invalid configuration
    #[error("Invalid config: {0}")]
    Invalid(String),

    /// TOML parse error
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Checkpoint persistence errors
#[derive(Error, Debug)]
pub enum CheckpointError {
    /// Reading or writing the checkpoint file failed
    #[error("Checkpoint I/O on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Checkpoint could not be encoded or decoded
    #[error("Checkpoint format error in {path:?}: {source}")]
    Format {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Catalog feed errors
#[derive(Error, Debug)]
pub enum CatalogError {
    /// Feed could not be read
    #[error("Failed to read catalog {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Feed content is not in the expected format
    #[error("Failed to parse catalog {path:?}: {message}")]
    Parse { path: PathBuf, message: String },
}
