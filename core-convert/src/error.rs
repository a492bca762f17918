//! # Conversion Error Types
//!
//! One error type for every stage of a conversion job. Each variant maps to
//! an [`ErrorKind`] so callers (and the job state machine) can branch on the
//! failing stage without matching message text.

use std::fmt;
use std::path::{Path, PathBuf};

use bridge_traits::BridgeError;
use thiserror::Error;

/// Errors that can occur during a conversion job.
#[derive(Error, Debug)]
pub enum ConvertError {
    // ========================================================================
    // Source Errors
    // ========================================================================
    /// The source bytes could not be obtained.
    #[error("Fetch failed: {0}")]
    Fetch(String),

    // ========================================================================
    // Container/Codec Errors
    // ========================================================================
    /// The OGG container is truncated, corrupt or structurally invalid.
    #[error("Malformed OGG container: {0}")]
    MalformedContainer(String),

    /// The stream carries a codec (or codec configuration) this core does
    /// not convert, or the wrong operation was requested for it.
    #[error("Unsupported codec: {0}")]
    UnsupportedCodec(String),

    // ========================================================================
    // Transcoding Errors
    // ========================================================================
    /// Corrupt packet data or an invalid codec header.
    #[error("Decoding error: {0}")]
    Decode(String),

    /// Encoder or muxer failure, including unsupported channel layouts.
    #[error("Encoding error: {0}")]
    Encode(String),

    // ========================================================================
    // Environment Errors
    // ========================================================================
    /// A filesystem operation on a work directory failed.
    #[error("Filesystem error at {path}: {source}")]
    Filesystem {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The job was abandoned before it completed.
    #[error("Conversion cancelled")]
    Cancelled,

    /// Task join failure or illegal job state transition.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Coarse classification of a [`ConvertError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Fetch,
    MalformedContainer,
    UnsupportedCodec,
    Decode,
    Encode,
    Filesystem,
    Cancelled,
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Fetch => "fetch",
            ErrorKind::MalformedContainer => "malformed_container",
            ErrorKind::UnsupportedCodec => "unsupported_codec",
            ErrorKind::Decode => "decode",
            ErrorKind::Encode => "encode",
            ErrorKind::Filesystem => "filesystem",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Internal => "internal",
        };
        f.write_str(name)
    }
}

impl ConvertError {
    /// Wrap an I/O error with the path it happened on.
    pub fn fs(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        ConvertError::Filesystem {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    pub fn malformed(msg: impl Into<String>) -> Self {
        ConvertError::MalformedContainer(msg.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ConvertError::Fetch(_) => ErrorKind::Fetch,
            ConvertError::MalformedContainer(_) => ErrorKind::MalformedContainer,
            ConvertError::UnsupportedCodec(_) => ErrorKind::UnsupportedCodec,
            ConvertError::Decode(_) => ErrorKind::Decode,
            ConvertError::Encode(_) => ErrorKind::Encode,
            ConvertError::Filesystem { .. } => ErrorKind::Filesystem,
            ConvertError::Cancelled => ErrorKind::Cancelled,
            ConvertError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Returns `true` if retrying the same job might succeed.
    ///
    /// The core never retries on its own; this is a hint for callers.
    pub fn is_transient(&self) -> bool {
        matches!(self, ConvertError::Fetch(_))
    }

    /// Returns `true` if the input bytes themselves are at fault.
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            ConvertError::MalformedContainer(_)
                | ConvertError::UnsupportedCodec(_)
                | ConvertError::Decode(_)
        )
    }
}

impl From<BridgeError> for ConvertError {
    fn from(err: BridgeError) -> Self {
        ConvertError::Fetch(err.to_string())
    }
}

impl From<tokio::task::JoinError> for ConvertError {
    fn from(err: tokio::task::JoinError) -> Self {
        if err.is_cancelled() {
            ConvertError::Cancelled
        } else {
            ConvertError::Internal(format!("Conversion task failed: {}", err))
        }
    }
}

/// Result type for conversion operations.
pub type Result<T> = std::result::Result<T, ConvertError>;
