//! Frames and the pickers that cut them out of a byte stream.
//!
//! A [`FramePicker`] is fed chunks in whatever sizes the OS hands them out and
//! decides where one logical message ends. Bytes past that point are handed
//! back to the caller as leftover; the I/O layer keeps them for the next frame.
//!
//! ```text
//!  chunk 1        chunk 2                       chunk 3
//! ┌──────────┐  ┌─────────────────────────┐   ┌──────┐
//! │ ..<bo    │  │ dy>clear data</body>mys │   │ tery │
//! └──────────┘  └─────────────────────────┘   └──────┘
//!        └── MarkerFramePicker ──┘   └── leftover ──▶ next picker
//! ```
//!
//! | Picker | Frame ends when |
//! |---|---|
//! | [`RawFramePicker`] | the first chunk arrives |
//! | [`FixedLengthFramePicker`] | `n` bytes were collected |
//! | [`MarkerFramePicker`] | the end marker (after the start marker) is seen |
//! | [`EmptyFramePicker`] | immediately, nothing is collected |
//! | [`NullFramePicker`] | the remote side closes the connection |

mod empty;
mod fixed_length;
mod marker;
mod null;
mod picker;
mod raw;

pub use empty::EmptyFramePicker;
pub use fixed_length::FixedLengthFramePicker;
pub use marker::MarkerFramePicker;
pub use null::NullFramePicker;
pub use picker::FramePicker;
pub(crate) use picker::PickerBuffer;
pub use raw::RawFramePicker;

use bytes::Bytes;
use std::fmt;

use crate::socket::Socket;

/// One application-level message. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Frame {
    data: Bytes,
    remote_address: Option<String>,
}

impl Frame {
    pub fn new(data: impl Into<Bytes>, remote_address: Option<String>) -> Self {
        Self {
            data: data.into(),
            remote_address,
        }
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn into_data(self) -> Bytes {
        self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Address of the peer the first byte of this frame came from.
    pub fn remote_address(&self) -> Option<&str> {
        self.remote_address.as_deref()
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(&self.data))
    }
}

/// A frame whose picker has not reached its end yet; read again once more
/// data is available.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartialFrame(Frame);

impl PartialFrame {
    pub fn new(frame: Frame) -> Self {
        Self(frame)
    }

    pub fn frame(&self) -> &Frame {
        &self.0
    }

    pub fn into_frame(self) -> Frame {
        self.0
    }
}

/// Result of a read on a server socket: the freshly accepted client.
#[derive(Debug)]
pub struct AcceptedFrame {
    remote_address: String,
    socket: Socket,
}

impl AcceptedFrame {
    pub fn new(remote_address: String, socket: Socket) -> Self {
        Self {
            remote_address,
            socket,
        }
    }

    pub fn remote_address(&self) -> &str {
        &self.remote_address
    }

    pub fn socket(&self) -> &Socket {
        &self.socket
    }

    pub fn into_socket(self) -> Socket {
        self.socket
    }
}

impl fmt::Display for AcceptedFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.remote_address)
    }
}

/// Outcome of a single `read` call.
#[derive(Debug)]
pub enum Incoming {
    Complete(Frame),
    Partial(PartialFrame),
    Accepted(AcceptedFrame),
}

impl Incoming {
    pub fn is_partial(&self) -> bool {
        matches!(self, Incoming::Partial(_))
    }

    /// The completed frame, if this read produced one.
    pub fn complete(self) -> Option<Frame> {
        match self {
            Incoming::Complete(frame) => Some(frame),
            _ => None,
        }
    }

    pub fn accepted(self) -> Option<AcceptedFrame> {
        match self {
            Incoming::Accepted(accepted) => Some(accepted),
            _ => None,
        }
    }
}
