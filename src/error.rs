//! # Error Types
//!
//! Error handling for the admin-port client.
//!
//! Two layers are defined here:
//! - [`FieldError`]: a single wire field could not be encoded or decoded
//!   (range violation, short buffer, bad string, bad date).
//! - [`ProtocolError`]: everything above a single field, from socket failures to
//!   session sequencing problems (handshake timeout, unsupported update
//!   frequency, RCON already pending).
//!
//! ## Error Categories
//! - **Transport**: `Io`, `ConnectTimeout`, `ConnectRefused`, `Timeout`, `ConnectionClosed`, `NotConnected`
//! - **Framing**: `InvalidFrameLength`, `PacketTooLarge`
//! - **Packet**: `PacketEncode`, `PacketDecode` (each wraps the failing field)
//! - **Session sequencing**: `AlreadyConnected`, `JoinTimeout`, `JoinRejected`,
//!   `UnsupportedUpdateType`, `UnsupportedFrequency`, `RequestInProgress`, `RconTimeout`,
//!   `NotAllPacketsReceived`
//! - **Configuration**: `ConfigError`
//!
//! Non-fatal inconsistencies (a quit for an unknown client, an RCON line with no
//! pending request, a known packet kind with no observer) are never errors; they
//! are logged with `tracing::warn!`.
//!
//! ## Example Usage
//! ```rust
//! use openttd_admin::error::{ProtocolError, Result};
//!
//! fn require_connected(connected: bool) -> Result<()> {
//!     if connected {
//!         Ok(())
//!     } else {
//!         Err(ProtocolError::NotConnected)
//!     }
//! }
//!
//! assert!(matches!(require_connected(false), Err(ProtocolError::NotConnected)));
//! ```

use crate::protocol::types::{UpdateFrequency, UpdateType};
use std::io;
use thiserror::Error;

/// Error message constants shared by log lines and error values.
pub mod constants {
    /// Connection errors
    pub const ERR_CONNECTION_CLOSED: &str = "Connection closed by peer";
    pub const ERR_NOT_CONNECTED: &str = "Cannot send or receive while not connected";
    pub const ERR_ALREADY_CONNECTED: &str = "Already connected to server";

    /// Session sequencing errors
    pub const ERR_RCON_IN_PROGRESS: &str = "Sending RCON while an RCON request is in progress";
    pub const ERR_UNEXPECTED_RCON: &str = "Received unexpected RCON result";
    pub const ERR_FREQUENCIES_UNKNOWN: &str =
        "Setting update frequency without knowing the supported frequencies";

    /// Packet errors
    pub const ERR_UNKNOWN_PACKET: &str = "Unknown packet type, keeping raw payload";
    pub const ERR_FIELD_DECODE: &str = "Error while decoding packet field";
    pub const ERR_FIELD_ENCODE: &str = "Error while encoding packet field";
}

/// A single wire field failed to encode or decode.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FieldError {
    #[error("value {value} is out of range for {wire_type}")]
    Range { wire_type: &'static str, value: i128 },

    #[error("{wire_type} needs {needed} bytes, only {available} available")]
    ShortBuffer {
        wire_type: &'static str,
        needed: usize,
        available: usize,
    },

    #[error("string is not null-terminated")]
    UnterminatedString,

    #[error("string contains an interior null byte")]
    InteriorNul,

    #[error("string is not valid UTF-8: {0}")]
    StringEncoding(#[from] std::str::Utf8Error),

    #[error("{wire_type} cannot hold a {found} value")]
    TypeMismatch {
        wire_type: &'static str,
        found: &'static str,
    },

    #[error("day number {0} is outside the supported calendar range")]
    DateOutOfRange(i64),
}

// ProtocolError is the primary error type for all client operations
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Timed out connecting to {0}")]
    ConnectTimeout(String),

    #[error("Connection refused by {0}")]
    ConnectRefused(String),

    #[error("Timeout occurred")]
    Timeout,

    #[error("Connection closed by peer")]
    ConnectionClosed,

    #[error("Not connected")]
    NotConnected,

    #[error("Already connected to server")]
    AlreadyConnected,

    #[error("Invalid frame length: {0}")]
    InvalidFrameLength(u16),

    #[error("Packet too large: {0} bytes")]
    PacketTooLarge(usize),

    #[error("Error while encoding {packet}.{field}: {source}")]
    PacketEncode {
        packet: &'static str,
        field: &'static str,
        source: FieldError,
    },

    #[error("Error while decoding {packet}.{field}: {source}")]
    PacketDecode {
        packet: &'static str,
        field: &'static str,
        source: FieldError,
    },

    #[error("Handshake timed out (protocol received: {protocol}, welcome received: {welcome})")]
    JoinTimeout { protocol: bool, welcome: bool },

    #[error("Server refused the join: {0}")]
    JoinRejected(&'static str),

    #[error("Update type {0} is not supported by the server")]
    UnsupportedUpdateType(UpdateType),

    #[error("Frequency {frequency} is not supported for update type {update_type}")]
    UnsupportedFrequency {
        update_type: UpdateType,
        frequency: UpdateFrequency,
    },

    #[error("RCON request already in progress: {0}")]
    RequestInProgress(String),

    #[error("RCON command timed out: {0}")]
    RconTimeout(String),

    #[error("Expected {expected} packets, received {received}")]
    NotAllPacketsReceived { expected: usize, received: usize },

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

/// Type alias for Results using ProtocolError
pub type Result<T> = std::result::Result<T, ProtocolError>;
