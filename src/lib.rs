//! # Mill-Sockets
//! A single-threaded, poll-driven socket I/O engine for Rust with pluggable framing.
//! Mill-Sockets turns raw non-blocking socket calls into whole application-level
//! frames, without an async runtime, a thread pool or callbacks.
//! ## Core Philosophy
//! Mill-Sockets was designed for applications that require:
//! - **Caller-owned scheduling**: the driver loop decides when to wait and what to do next
//! - **Protocol-agnostic framing**: the engine never knows what a message looks like
//! - **Typed failures**: every way a transfer can go wrong is a distinct error variant
//! ## Features
//! - **Four transports**: TCP, UDP, Unix stream and Unix datagram sockets
//! - **Pluggable frame pickers**: raw, fixed-length, marker-delimited, empty and read-to-close
//! - **Leftover carry-over**: bytes read past a frame are kept for the next one
//! - **Out-of-band data**: TCP urgent bytes on their own channel
//! - **Speed floors**: optional minimum receive/send speeds per transfer
//! - **Bounded retries**: reads and writes give up after a configurable number of dry attempts
//! ## Architecture Overview
//! ```text
//! ┌──────────────┐  register   ┌───────────────┐  ready ids   ┌──────────────┐
//! │ driver loop  │────────────▶│ AsyncSelector │─────────────▶│ driver loop  │
//! └──────────────┘             └───────────────┘              └──────┬───────┘
//!                                                                    │ read / write
//!                                                                    ▼
//!                    ┌─────────────┐   chunks   ┌──────────────────────────────┐
//!                    │ FramePicker │◀───────────│ Io (stream/datagram,         │
//!                    └─────────────┘            │     client/server) + Context │
//!                                               └──────────────┬───────────────┘
//!                                                              │ bytes moved
//!                                                              ▼
//!                                                     ┌──────────────────┐
//!                                                     │ SpeedRateCounter │
//!                                                     └──────────────────┘
//! ```
//! ## Quick Start
//!
//! ```rust,no_run
//! use mill_sockets::prelude::*;
//! use std::net::SocketAddr;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let addr: SocketAddr = "127.0.0.1:8080".parse()?;
//!     let mut io = StreamedClientIo::new(Socket::tcp_connect(addr)?, IoConfig::default());
//!     let mut selector = AsyncSelector::new()?;
//!
//!     let mut request: &[u8] = b"GET / HTTP/1.0\r\n\r\n";
//!     while !request.is_empty() {
//!         selector.add_socket_operation(io.socket(), Operation::Write);
//!         selector.select(Some(5), 0)?;
//!         let sent = io.write(request, false)?;
//!         request = &request[sent..];
//!     }
//!
//!     // HTTP/1.0: the response ends when the server closes the connection
//!     let mut picker = NullFramePicker::new();
//!     loop {
//!         selector.add_socket_operation(io.socket(), Operation::Read);
//!         selector.select(Some(5), 0)?;
//!         if let Incoming::Complete(frame) = io.read(&mut picker, false)? {
//!             println!("{frame}");
//!             break;
//!         }
//!     }
//!     Ok(())
//! }
//! ```
//!
//! - [`io`]: the four I/O state machines and the [`Io`](io::Io) trait
//! - [`frame`]: frames and the [`FramePicker`](frame::FramePicker) family
//! - [`selector`]: readiness multiplexing over registered sockets
//! - [`socket`]: non-blocking sockets and their configuration
//! - [`speed_rate`]: the throughput watchdog
//! - [`error`]: error types and result handling

pub mod error;
pub mod frame;
pub mod io;
pub mod selector;
pub mod socket;
pub mod speed_rate;
mod sys;

pub use error::{NetworkError, Result};
pub use frame::{Frame, FramePicker, Incoming};
pub use io::Io;
pub use selector::{AsyncSelector, Operation, SelectContext};
pub use socket::{IoConfig, Socket, SocketId};

/// A convenient prelude module that re-exports commonly used types and traits.
///
/// ```rust
/// use mill_sockets::prelude::*;
/// ```
///
/// This brings into scope the sockets, the I/O state machines, every built-in
/// picker and the selector. [`Result`] is left out so it does not shadow the
/// standard one.
pub mod prelude {
    pub use crate::error::NetworkError;
    pub use crate::frame::{
        AcceptedFrame, EmptyFramePicker, FixedLengthFramePicker, Frame, FramePicker, Incoming,
        MarkerFramePicker, NullFramePicker, PartialFrame, RawFramePicker,
    };
    pub use crate::io::{
        DatagramClientIo, DatagramServerIo, Io, StreamedClientIo, StreamedServerIo,
    };
    pub use crate::selector::{AsyncSelector, Operation, SelectContext};
    pub use crate::socket::{IoConfig, Socket, SocketId, SocketResource, Transport};
    pub use crate::speed_rate::SpeedRateCounter;
}
