//! Error types for the AT line protocol.

use thiserror::Error;

/// Errors that can occur when maintaining a URC handler table.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// A URC header must contain at least one byte.
    #[error("URC header must not be empty")]
    EmptyHeader,

    /// The URC header does not fit in a handler slot.
    #[error("URC header too long: max {max} bytes, got {actual}")]
    HeaderTooLong { max: usize, actual: usize },

    /// Every handler slot is taken by a different header.
    #[error("URC handler table full ({capacity} entries), cannot add '{header}'")]
    HandlerTableFull { capacity: usize, header: String },
}

/// Result type alias for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;
