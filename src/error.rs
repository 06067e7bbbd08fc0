//! Error types for the analysis server client.
//!
//! Two families exist because failures surface in two different places:
//!
//! - [`ClientError`] is returned synchronously from `start()`, `request()`
//!   and friends on the caller's thread.
//! - [`ProtocolError`] is detected on the line reader thread and reported
//!   asynchronously through the diagnostic hook (and the log).
//!
//! Remote rejections of a single request are not errors of this crate at
//! all; they arrive as [`crate::protocol::RemoteError`] data in the errback.

use thiserror::Error;

/// Errors returned synchronously to callers of the engine.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The server executable could not be spawned.
    #[error("Failed to launch {command}: {source}")]
    Launch {
        /// Rendered argument vector that was attempted.
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// An operation that needs the process ran before `start()`.
    #[error("Analysis server has not been started")]
    NotStarted,

    /// `start()` was called on an instance that was already started.
    #[error("Analysis server was already started")]
    AlreadyStarted,

    /// The process was stopped; no further requests can be sent.
    #[error("Analysis server has been stopped")]
    Stopped,

    /// The allocated id was already pending; nothing was sent.
    #[error("Request id {id} is already pending")]
    DuplicateRequestId { id: String },

    /// Writing to the server's input pipe failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A request envelope could not be serialized.
    #[error("Failed to encode request: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Protocol violations detected while reading the server's output.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// A response carried an id with no pending request.
    #[error("Response for unknown request id {id:?}")]
    OrphanResponse { id: String },

    /// A line was not JSON, or matched neither the response nor the event shape.
    #[error("Malformed message ({reason}): {line}")]
    MalformedMessage { line: String, reason: String },

    /// The output pipe failed with something other than end-of-stream.
    #[error("Failed to read from analysis server: {reason}")]
    ReadFailed { reason: String },
}

impl ProtocolError {
    /// Whether the reader stops after reporting this error.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, ProtocolError::OrphanResponse { .. })
    }

    pub(crate) fn malformed(line: &str, reason: impl Into<String>) -> Self {
        ProtocolError::MalformedMessage {
            line: line.trim_end().to_string(),
            reason: reason.into(),
        }
    }
}

/// A consumer callback panicked while running on a dispatch context.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Callback panicked: {message}")]
pub struct CallbackPanicked {
    pub message: String,
}

/// A version string could not be parsed as `major.minor[.patch]`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid version {input:?}: {reason}")]
pub struct VersionError {
    pub input: String,
    pub reason: String,
}
