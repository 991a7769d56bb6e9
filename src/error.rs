use std::fmt;

use serde_json::Value;

/// Errors that can occur while talking to a browser over CDP.
#[derive(Debug)]
pub enum CdpError {
    /// The browser reported an error for a command.
    Browser {
        /// The CDP error code (e.g., -32000).
        code: i64,
        /// Human-readable error description.
        message: String,
        /// Optional structured detail attached by the browser.
        data: Option<Value>,
    },

    /// An operation was attempted on a closed connection, or a command
    /// was still in flight when the connection closed.
    ConnectionClosed {
        /// Why the connection closed (close frame reason, I/O error, ...).
        reason: String,
    },

    /// An operation was attempted on a session that has been removed.
    SessionClosed,

    /// A command or event binding misbehaved (unserializable params,
    /// unparseable result). Indicates a bug in the bindings, not in the
    /// browser.
    Internal(String),

    /// An event listener's queue is full. Raised by the listener,
    /// absorbed by the router (the event is dropped with a warning).
    QueueOverflow,

    /// An event was offered to a listener that has been closed. Used by
    /// the router as a pruning signal.
    ListenerClosed,

    /// A WebSocket-level failure outside normal close semantics.
    Transport(String),

    /// The HTTP bootstrap request failed (including non-200 statuses).
    Http(String),

    /// The debugging URL has an unsupported scheme or cannot be parsed.
    InvalidUrl(String),
}

impl CdpError {
    /// Shorthand for a browser error without detail, used by tests and
    /// internal construction from wire payloads.
    #[must_use]
    pub fn browser(code: i64, message: impl Into<String>) -> Self {
        Self::Browser {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub(crate) fn connection_closed(reason: impl Into<String>) -> Self {
        Self::ConnectionClosed {
            reason: reason.into(),
        }
    }

    /// Clone-like duplication for fanning one failure out to many
    /// awaiters. Not `Clone` publicly; error values are normally moved.
    pub(crate) fn duplicate(&self) -> Self {
        match self {
            Self::Browser {
                code,
                message,
                data,
            } => Self::Browser {
                code: *code,
                message: message.clone(),
                data: data.clone(),
            },
            Self::ConnectionClosed { reason } => Self::ConnectionClosed {
                reason: reason.clone(),
            },
            Self::SessionClosed => Self::SessionClosed,
            Self::Internal(msg) => Self::Internal(msg.clone()),
            Self::QueueOverflow => Self::QueueOverflow,
            Self::ListenerClosed => Self::ListenerClosed,
            Self::Transport(msg) => Self::Transport(msg.clone()),
            Self::Http(msg) => Self::Http(msg.clone()),
            Self::InvalidUrl(msg) => Self::InvalidUrl(msg.clone()),
        }
    }
}

impl fmt::Display for CdpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Browser {
                code,
                message,
                data,
            } => match data {
                Some(data) => write!(f, "browser error ({code}): {message} [{data}]"),
                None => write!(f, "browser error ({code}): {message}"),
            },
            Self::ConnectionClosed { reason } => {
                write!(f, "connection closed: {reason}")
            }
            Self::SessionClosed => write!(f, "session closed"),
            Self::Internal(msg) => write!(f, "internal error: {msg}"),
            Self::QueueOverflow => write!(f, "event listener queue is full"),
            Self::ListenerClosed => write!(f, "event listener is closed"),
            Self::Transport(msg) => write!(f, "transport error: {msg}"),
            Self::Http(msg) => write!(f, "bootstrap HTTP error: {msg}"),
            Self::InvalidUrl(msg) => write!(f, "invalid debugging URL: {msg}"),
        }
    }
}

impl std::error::Error for CdpError {}
