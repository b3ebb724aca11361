//! Error types for chorus-vp
//!
//! One enum covers the whole playback taxonomy. Variants are scoped to a
//! track (`SourceUnavailable`, `Decode`, `TrackInterrupted`), to a session
//! (`ConnectFailed`, `SessionLost`, `SessionClosed`) or to a single call
//! (`StaleIndex`, `InvalidState`, ...). Nothing here is process-fatal.

use std::time::Duration;
use thiserror::Error;

/// Main error type for chorus-vp
#[derive(Error, Debug)]
pub enum Error {
    /// Track reference cannot be resolved or its decoder cannot be spawned
    #[error("Source unavailable: {0}")]
    SourceUnavailable(String),

    /// Decode process failed mid-track (terminal for the track)
    #[error("Decode error: {0}")]
    Decode(String),

    /// No frame arrived within the read timeout (transient)
    #[error("Decoder stalled: no frame within {0:?}")]
    DecodeStall(Duration),

    /// Voice transport could not be established
    #[error("Connect failed after {attempts} attempt(s): {message}")]
    ConnectFailed { attempts: u32, message: String },

    /// Reconnection after a stall exhausted its retries
    #[error("Session lost after {attempts} reconnect attempt(s)")]
    SessionLost { attempts: u32 },

    /// Underlying voice link dropped
    #[error("Transport disconnected: {0}")]
    TransportDisconnected(String),

    /// Frame send exceeded the send timeout (transient)
    #[error("Send timed out after {0:?}")]
    SendTimeout(Duration),

    /// Queue mutated since the snapshot the index was taken from
    #[error("Stale queue index {index}: queue changed (generation {expected} -> {actual})")]
    StaleIndex {
        index: usize,
        expected: u64,
        actual: u64,
    },

    /// Index outside the queue
    #[error("Queue index {index} out of range (length {len})")]
    InvalidIndex { index: usize, len: usize },

    /// Queue reached its configured capacity
    #[error("Queue is full ({0} entries)")]
    QueueFull(usize),

    /// Non-resumable track lost its position during a stall
    #[error("Track interrupted: {0}")]
    TrackInterrupted(String),

    /// Operation not valid in the current engine state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Engine has been closed
    #[error("Session closed: {0}")]
    SessionClosed(String),

    /// No engine registered for the session
    #[error("Not found: {0}")]
    NotFound(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Shared library errors (config loading)
    #[error(transparent)]
    Common(#[from] chorus_common::Error),

    /// File I/O errors
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Other errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Stable machine-readable name, used in events and API responses
    pub fn kind(&self) -> &'static str {
        match self {
            Error::SourceUnavailable(_) => "source_unavailable",
            Error::Decode(_) => "decode_error",
            Error::DecodeStall(_) => "decode_stall",
            Error::ConnectFailed { .. } => "connect_failed",
            Error::SessionLost { .. } => "session_lost",
            Error::TransportDisconnected(_) => "transport_disconnected",
            Error::SendTimeout(_) => "send_timeout",
            Error::StaleIndex { .. } => "stale_index",
            Error::InvalidIndex { .. } => "invalid_index",
            Error::QueueFull(_) => "queue_full",
            Error::TrackInterrupted(_) => "track_interrupted",
            Error::InvalidState(_) => "invalid_state",
            Error::SessionClosed(_) => "session_closed",
            Error::NotFound(_) => "not_found",
            Error::Config(_) | Error::Common(_) => "config",
            Error::Io(_) => "io",
            Error::Internal(_) => "internal",
        }
    }

    /// Transient failures are retried internally and only surface once
    /// their retry budget is spent
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::DecodeStall(_) | Error::SendTimeout(_) | Error::TransportDisconnected(_)
        )
    }
}

/// Convenience Result type using chorus-vp Error
pub type Result<T> = std::result::Result<T, Error>;
