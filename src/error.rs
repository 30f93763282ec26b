//! Error types for the zlimdb client
//!
//! Provides a unified error type for all operations, plus the fixed table
//! of error codes the store reports in `errorResponse` messages.

use thiserror::Error;

/// Result type alias using ClientError
pub type Result<T> = std::result::Result<T, ClientError>;

/// Unified error type for client operations
#[derive(Debug, Error)]
pub enum ClientError {
    // -------------------------------------------------------------------------
    // Transport Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Could not resolve address {address}: {reason}")]
    Resolve { address: String, reason: String },

    #[error("Connection closed by peer.")]
    ConnectionClosed,

    #[error("Timed out {0}")]
    Timeout(String),

    #[error("Operation cancelled by disconnect")]
    Cancelled,

    #[error("Not connected")]
    NotConnected,

    // -------------------------------------------------------------------------
    // Protocol Errors
    // -------------------------------------------------------------------------
    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Out of bounds: offset {offset} + length {length} exceeds {limit}")]
    OutOfBounds {
        offset: usize,
        length: usize,
        limit: usize,
    },

    #[error("Message too large: {size} bytes (max {max})")]
    MessageTooLarge { size: usize, max: usize },

    // -------------------------------------------------------------------------
    // Server Errors
    // -------------------------------------------------------------------------
    #[error("{0}")]
    Server(#[from] ServerError),

    // -------------------------------------------------------------------------
    // Payload Errors
    // -------------------------------------------------------------------------
    #[error("Decompression error: {0}")]
    Decompression(String),

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

impl ClientError {
    /// Whether the error leaves the connection unusable.
    ///
    /// Fatal errors stop the I/O thread; everything else only fails the
    /// action that produced it.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ClientError::Io(_) | ClientError::ConnectionClosed | ClientError::Cancelled
        )
    }
}

/// Error codes carried by an `errorResponse` message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ServerError {
    #[error("Invalid message size.")]
    InvalidMessageSize,
    #[error("Invalid message type.")]
    InvalidMessageType,
    #[error("Entity not found.")]
    EntityNotFound,
    #[error("Table not found.")]
    TableNotFound,
    #[error("Not implemented.")]
    NotImplemented,
    #[error("Invalid request.")]
    InvalidRequest,
    #[error("Invalid login data.")]
    InvalidLogin,
    #[error("Table already exists.")]
    TableAlreadyExists,
    #[error("Could not open file.")]
    CouldNotOpenFile,
    #[error("Could not read from file.")]
    CouldNotReadFile,
    #[error("Could not write to file.")]
    CouldNotWriteFile,
    #[error("Subscription not found.")]
    SubscriptionNotFound,
    #[error("Invalid data.")]
    InvalidData,
    #[error("Unknown error.")]
    Unknown(u16),
}

impl ServerError {
    /// Map a wire code to its error
    pub fn from_code(code: u16) -> Self {
        match code {
            0 => ServerError::InvalidMessageSize,
            1 => ServerError::InvalidMessageType,
            2 => ServerError::EntityNotFound,
            3 => ServerError::TableNotFound,
            4 => ServerError::NotImplemented,
            5 => ServerError::InvalidRequest,
            6 => ServerError::InvalidLogin,
            7 => ServerError::TableAlreadyExists,
            8 => ServerError::CouldNotOpenFile,
            9 => ServerError::CouldNotReadFile,
            10 => ServerError::CouldNotWriteFile,
            11 => ServerError::SubscriptionNotFound,
            12 => ServerError::InvalidData,
            other => ServerError::Unknown(other),
        }
    }

    /// The wire code of this error
    pub fn code(&self) -> u16 {
        match self {
            ServerError::InvalidMessageSize => 0,
            ServerError::InvalidMessageType => 1,
            ServerError::EntityNotFound => 2,
            ServerError::TableNotFound => 3,
            ServerError::NotImplemented => 4,
            ServerError::InvalidRequest => 5,
            ServerError::InvalidLogin => 6,
            ServerError::TableAlreadyExists => 7,
            ServerError::CouldNotOpenFile => 8,
            ServerError::CouldNotReadFile => 9,
            ServerError::CouldNotWriteFile => 10,
            ServerError::SubscriptionNotFound => 11,
            ServerError::InvalidData => 12,
            ServerError::Unknown(code) => *code,
        }
    }
}
