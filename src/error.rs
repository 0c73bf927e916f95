use std::{fmt, io, result::Result as StdResult, time::Duration};

use crate::frame::Frame;

pub type Result<T> = StdResult<T, NetworkError>;

/// Transfer direction, reported by [`NetworkError::SlowTransfer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Receive,
    Send,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Receive => write!(f, "receive"),
            Direction::Send => write!(f, "send"),
        }
    }
}

/// Every failure the engine can report.
///
/// Variants are fine-grained enough for a driver to pick retry or abort
/// without looking at messages. A [`Partial`](crate::frame::Incoming::Partial)
/// read is never an error.
#[derive(Debug, thiserror::Error)]
pub enum NetworkError {
    /// The socket never reached the connected state.
    #[error("connection to {address} refused: {reason}")]
    ConnectionRefused { address: String, reason: String },

    /// The socket was connected and the remote side is gone.
    #[error("connection to {address} lost")]
    ConnectionLost { address: String },

    /// The picker could not reach the end of its frame within the attempt budget.
    /// `partial` holds what had been collected so far.
    #[error("incomplete frame from {address}: {reason}")]
    FramingIncomplete {
        address: String,
        reason: String,
        partial: Frame,
    },

    #[error("failed to send data to {address}")]
    SendFailed {
        address: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to receive data from {address}")]
    ReceiveFailed {
        address: String,
        #[source]
        source: io::Error,
    },

    /// Average speed stayed below the configured floor longer than allowed.
    #[error("{direction} speed {speed:.2} B/s below the floor for {duration:.2}s")]
    SlowTransfer {
        direction: Direction,
        speed: f64,
        duration: f64,
    },

    #[error("failed to accept connection on {address}: {reason}")]
    AcceptFailed {
        address: String,
        reason: String,
        #[source]
        source: Option<io::Error>,
    },

    #[error("unsupported operation: {0}")]
    Unsupported(String),

    /// The selector waited out its budget without any socket becoming ready.
    #[error("no socket became ready within {0:?}")]
    Timeout(Option<Duration>),

    /// `select` was called with nothing registered.
    #[error("there are no sockets registered for select")]
    NothingToSelect,

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl NetworkError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, NetworkError::Timeout(_))
    }

    /// Refused or lost connections; the socket must be reconnected before reuse.
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            NetworkError::ConnectionRefused { .. } | NetworkError::ConnectionLost { .. }
        )
    }

    pub(crate) fn unsupported(message: impl Into<String>) -> Self {
        NetworkError::Unsupported(message.into())
    }
}

/// OS errors meaning the peer has vanished rather than a failed call.
pub(crate) fn is_connection_gone(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::NotConnected
    )
}
