//! Error types for the AT engine.

use atlink_protocol::ProtocolError;
use thiserror::Error;

/// Errors reported by a [`Transport`](crate::Transport).
#[derive(Debug, Error)]
pub enum TransportError {
    /// The channel could not be opened.
    #[error("failed to open AT channel {instance}: {reason}")]
    OpenFailed { instance: u8, reason: String },

    /// The command bytes could not be transmitted.
    #[error("failed to send {len} bytes: {reason}")]
    SendFailed { len: usize, reason: String },

    /// Announced bytes could not be read back.
    #[error("failed to receive: {0}")]
    ReceiveFailed(String),

    /// The handle does not refer to an open channel.
    #[error("channel is closed")]
    Closed,

    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors returned by the command issuer and instance management.
#[derive(Debug, Error)]
pub enum AtError {
    /// No terminator was seen before the timeout expired.
    #[error("no response before timeout")]
    Timeout,

    /// The transport failed to open or transmit.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The requested instance does not exist.
    #[error("requested AT instance {requested}, only {available} available")]
    UnknownInstance { requested: u8, available: usize },

    /// The instance was used from inside one of its own URC callbacks.
    #[error("AT instance {instance} used from inside its own URC callback")]
    Reentrant { instance: u8 },

    /// The pending response was lost to an accumulation buffer overflow.
    #[error("response discarded: accumulation buffer overflow")]
    Overflow,

    /// The instance was closed while the command was pending.
    #[error("AT instance closed while waiting for a response")]
    Closed,

    /// URC handler table rejected the registration.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// No more command prefixes can be silenced.
    #[error("cannot silence prefix '{prefix}': {capacity} prefixes already silenced")]
    SilentPrefixTableFull { prefix: String, capacity: usize },

    /// No process-wide registry has been installed.
    #[error("no AT registry installed")]
    NoRegistry,
}

/// Result type alias for AT operations.
pub type AtResult<T> = Result<T, AtError>;

/// Errors that can occur while loading an [`EngineConfig`](crate::EngineConfig).
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    /// The configuration is not valid YAML for this schema.
    #[error("failed to parse config: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// A value is out of range.
    #[error("invalid config: {0}")]
    Invalid(String),
}
