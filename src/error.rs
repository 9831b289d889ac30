//! Error types for the device communication engine.
//!
//! This module defines `ProtocolError`, the single error type returned by the frame codec,
//! the reply/telemetry decoders, the link transport and the trial collector. It is built
//! with `thiserror` so that lower-level failures (I/O, serial port setup) convert through
//! `#[from]` and propagate with `?`.
//!
//! ## Error Categories
//!
//! - **Format** (`Format`, `FieldCount`, `FieldFormat`): the bytes are not a valid frame or
//!   reply. Retrying without changing the input will fail the same way.
//! - **Checksum**: the frame is well formed but its checksum does not match. Usually line
//!   corruption; the read may be retried.
//! - **Timeout**: no matching line arrived before the deadline. Retryable.
//! - **Device**: the controller reported `ERR...`. Needs operator attention.
//! - **CommandRejected**: the controller answered with a non-`00` ack code.
//! - **Io / Serial**: the link itself failed.
//!
//! "Not this format" is never an error: decoders that probe a line return `Option` and
//! callers discard `None`.

use thiserror::Error;

/// Convenience alias for results using the protocol error type.
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Coarse classification of a [`ProtocolError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed frame, bad hex, wrong field count or unparseable field.
    Format,
    /// Checksum mismatch.
    Checksum,
    /// Deadline exceeded.
    Timeout,
    /// Device reported an error line.
    Device,
    /// Device returned a negative acknowledgement.
    CommandRejected,
    /// Link-level I/O failure.
    Io,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            ErrorKind::Format => "format",
            ErrorKind::Checksum => "checksum",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Device => "device",
            ErrorKind::CommandRejected => "command_rejected",
            ErrorKind::Io => "io",
        };
        write!(f, "{}", label)
    }
}

/// Primary error type for framing, decoding and link operations.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Format error: {0}")]
    Format(String),

    #[error("Expected {expected} PID parameter fields, got {found}")]
    FieldCount { expected: usize, found: usize },

    #[error("Failed to parse PID field '{field}' from '{value}'")]
    FieldFormat { field: &'static str, value: String },

    #[error("Checksum mismatch: calculated {calculated:02X}, received {received:02X}")]
    Checksum { calculated: u8, received: u8 },

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Device error: {0}")]
    Device(String),

    #[error("Command rejected with ack code '{code}'")]
    CommandRejected { code: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[cfg(feature = "serial")]
    #[error("Serial port error: {0}")]
    Serial(#[from] tokio_serial::Error),
}

impl ProtocolError {
    /// Shorthand for a [`ProtocolError::Format`] error.
    pub fn format(message: impl Into<String>) -> Self {
        ProtocolError::Format(message.into())
    }

    /// Shorthand for a [`ProtocolError::Timeout`] error.
    pub fn timeout(message: impl Into<String>) -> Self {
        ProtocolError::Timeout(message.into())
    }

    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ProtocolError::Format(_)
            | ProtocolError::FieldCount { .. }
            | ProtocolError::FieldFormat { .. } => ErrorKind::Format,
            ProtocolError::Checksum { .. } => ErrorKind::Checksum,
            ProtocolError::Timeout(_) => ErrorKind::Timeout,
            ProtocolError::Device(_) => ErrorKind::Device,
            ProtocolError::CommandRejected { .. } => ErrorKind::CommandRejected,
            ProtocolError::Io(_) => ErrorKind::Io,
            #[cfg(feature = "serial")]
            ProtocolError::Serial(_) => ErrorKind::Io,
        }
    }

    /// Whether repeating the same read or exchange may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Checksum | ErrorKind::Timeout)
    }

    /// True for deadline failures.
    pub fn is_timeout(&self) -> bool {
        self.kind() == ErrorKind::Timeout
    }
}
