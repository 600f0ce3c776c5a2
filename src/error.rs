//! Error types for the remote-display client.
//!
//! This module defines all error types used throughout the crate.
//!
//! # Usage
//!
//! All fallible operations return [`Result<T>`] which uses [`Error`]:
//!
//! ```ignore
//! use remote_display_client::{Result, Error};
//!
//! async fn example(session: &SessionHandle) -> Result<()> {
//!     let listing = session.browse("/Documents").await?;
//!     Ok(())
//! }
//! ```
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Configuration | [`Error::Config`] |
//! | Connection | [`Error::Connection`], [`Error::ReceiveTimeout`], [`Error::ConnectionClosed`] |
//! | Protocol | [`Error::Protocol`], [`Error::Server`], [`Error::StreamAborted`] |
//! | Operation | [`Error::Cancelled`], [`Error::NotADirectory`], [`Error::InvalidManifest`], [`Error::Upload`] |
//! | External | [`Error::Io`], [`Error::Json`], [`Error::WebSocket`], [`Error::Http`] |

// ============================================================================
// Imports
// ============================================================================

use std::io::Error as IoError;
use std::result::Result as StdResult;

use thiserror::Error;
use tokio::sync::oneshot::error::RecvError;
use tokio_tungstenite::tungstenite::Error as WsError;

use crate::identifiers::StreamIndex;
use crate::protocol::status::DisconnectKind;

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
///
/// All fallible operations in this crate return this type.
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
///
/// Each variant includes relevant context for debugging.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Configuration error.
    ///
    /// Returned when session options are invalid (bad gateway URL,
    /// zero dimensions, missing token).
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },

    // ========================================================================
    // Connection Errors
    // ========================================================================
    /// The tunnel could not be established.
    #[error("Connection failed: {message}")]
    Connection {
        /// Description of the connection error.
        message: String,
    },

    /// The gateway went silent for longer than the receive timeout.
    ///
    /// Fatal: the session transitions to `Disconnected`.
    #[error("No data received for {timeout_ms}ms, connection lost")]
    ReceiveTimeout {
        /// Milliseconds of silence before the timeout fired.
        timeout_ms: u64,
    },

    /// The tunnel closed while an operation was in flight.
    #[error("Connection closed")]
    ConnectionClosed,

    // ========================================================================
    // Protocol Errors
    // ========================================================================
    /// Malformed inbound frame (bad length prefix, bad terminator).
    #[error("Protocol error: {message}")]
    Protocol {
        /// Description of the protocol violation.
        message: String,
    },

    /// The remote side ended the session with an `error` instruction.
    ///
    /// Carries the classified kind alongside the raw status so the host
    /// can translate it for display.
    #[error("Server error {code}: {message} ({kind:?})")]
    Server {
        /// Numeric status code from the wire.
        code: u32,
        /// Raw upstream message, never discarded.
        message: String,
        /// Classified kind for presentation.
        kind: DisconnectKind,
    },

    /// A stream acknowledgement carried an error status.
    ///
    /// Flow-control errors are not transient; the write is aborted.
    #[error("Stream {index} aborted with status {status}: {message}")]
    StreamAborted {
        /// Index of the aborted stream.
        index: StreamIndex,
        /// Status code carried by the acknowledgement.
        status: u32,
        /// Message carried by the acknowledgement.
        message: String,
    },

    // ========================================================================
    // Operation Errors
    // ========================================================================
    /// The operation was cancelled by session teardown.
    ///
    /// Pending stream promises resolve to this instead of hanging.
    #[error("Operation cancelled by session teardown")]
    Cancelled,

    /// A browse was requested on a non-directory entry.
    #[error("Not a directory: {path}")]
    NotADirectory {
        /// Stream path of the offending entry.
        path: String,
    },

    /// A directory manifest failed to parse or carried the wrong mimetype.
    ///
    /// Rejects the specific pending browse, never the session.
    #[error("Invalid directory manifest: {message}")]
    InvalidManifest {
        /// Description of the manifest defect.
        message: String,
    },

    /// An out-of-band upload failed before or during the HTTP transfer.
    #[error("Upload failed: {message}")]
    Upload {
        /// Description of the upload failure.
        message: String,
    },

    // ========================================================================
    // External Errors
    // ========================================================================
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] IoError),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] WsError),

    /// HTTP transfer error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Channel receive error.
    #[error("Channel closed")]
    ChannelClosed(#[from] RecvError),
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates a configuration error.
    #[inline]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates a connection error.
    #[inline]
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Creates a receive timeout error.
    #[inline]
    pub fn receive_timeout(timeout_ms: u64) -> Self {
        Self::ReceiveTimeout { timeout_ms }
    }

    /// Creates a protocol error.
    #[inline]
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Creates a server error from a raw status.
    ///
    /// The numeric code and literal message are classified into a
    /// [`DisconnectKind`]; unrecognized statuses classify as
    /// [`DisconnectKind::Unknown`] and keep the raw text.
    #[inline]
    pub fn server(code: u32, message: impl Into<String>) -> Self {
        let message = message.into();
        let kind = DisconnectKind::classify(code, &message);
        Self::Server {
            code,
            message,
            kind,
        }
    }

    /// Creates a stream aborted error.
    #[inline]
    pub fn stream_aborted(index: StreamIndex, status: u32, message: impl Into<String>) -> Self {
        Self::StreamAborted {
            index,
            status,
            message: message.into(),
        }
    }

    /// Creates a not-a-directory error.
    #[inline]
    pub fn not_a_directory(path: impl Into<String>) -> Self {
        Self::NotADirectory { path: path.into() }
    }

    /// Creates an invalid manifest error.
    #[inline]
    pub fn invalid_manifest(message: impl Into<String>) -> Self {
        Self::InvalidManifest {
            message: message.into(),
        }
    }

    /// Creates an upload error.
    #[inline]
    pub fn upload(message: impl Into<String>) -> Self {
        Self::Upload {
            message: message.into(),
        }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if this error ends the session.
    ///
    /// Fatal errors transition the session to `Disconnected` and are
    /// surfaced once; the host, not the core, decides whether to offer a
    /// reconnect.
    #[inline]
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. }
                | Self::ReceiveTimeout { .. }
                | Self::ConnectionClosed
                | Self::Protocol { .. }
                | Self::Server { .. }
                | Self::WebSocket(_)
        )
    }

    /// Returns `true` if this is a teardown cancellation.
    #[inline]
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Returns `true` if this error is scoped to one operation.
    ///
    /// Scoped errors reject a single pending operation (one browse, one
    /// upload) and leave the session running.
    #[inline]
    #[must_use]
    pub fn is_scoped(&self) -> bool {
        matches!(
            self,
            Self::NotADirectory { .. }
                | Self::InvalidManifest { .. }
                | Self::Upload { .. }
                | Self::StreamAborted { .. }
                | Self::Http(_)
        )
    }

    /// Returns the classified disconnect kind, if this is a server error.
    #[inline]
    #[must_use]
    pub fn disconnect_kind(&self) -> Option<DisconnectKind> {
        match self {
            Self::Server { kind, .. } => Some(*kind),
            _ => None,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
