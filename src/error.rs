//! Error types for lspwire

use std::io;

use thiserror::Error;

pub type LspwireResult<T> = std::result::Result<T, LspwireError>;

#[derive(Debug, Error)]
pub enum LspwireError {
    #[error("{0}")]
    Frame(#[from] FrameError),

    #[error("{0}")]
    Router(#[from] RouterError),

    #[error("{0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Failures surfaced by the frame reader to the transport loop.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("Malformed frame: no parseable Content-Length in header block {header:?}")]
    MalformedFrame { header: String },

    #[error("Short read: expected {expected} body bytes, got {actual}")]
    ShortRead { expected: usize, actual: usize },

    #[error("Frame of {declared} bytes exceeds the {limit} byte limit")]
    FrameTooLarge { declared: usize, limit: usize },

    #[error("Header block exceeds the {limit} byte limit")]
    HeaderTooLarge { limit: usize },

    #[error("Stream closed")]
    StreamClosed,

    #[error("Read timed out after {0}s")]
    TimedOut(u64),

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl FrameError {
    pub fn malformed(header: impl Into<String>) -> Self {
        Self::MalformedFrame {
            header: header.into(),
        }
    }

    /// Frame boundaries were lost but the stream itself is still readable.
    pub fn is_framing(&self) -> bool {
        matches!(
            self,
            Self::MalformedFrame { .. }
                | Self::ShortRead { .. }
                | Self::FrameTooLarge { .. }
                | Self::HeaderTooLarge { .. }
        )
    }

    /// I/O failures worth another read attempt.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
            ),
            _ => false,
        }
    }
}

/// Reasons a frame body could not be turned into an envelope.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("Message body is not a JSON object")]
    NotAnObject,

    #[error("Message has neither 'method' nor 'id'")]
    MissingMethod,

    #[error("Invalid JSON-RPC envelope: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum RouterError {
    #[error("A handler is already registered for method '{0}'")]
    DuplicateMethod(String),

    #[error("Method name must not be empty")]
    EmptyMethod,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Config parse error: {0}")]
    Parse(String),

    #[error("Invalid value for '{key}': {message}")]
    InvalidValue { key: String, message: String },

    #[error(transparent)]
    Io(#[from] io::Error),
}
