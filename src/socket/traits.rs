use std::io;

use super::{SocketId, Transport};

/// The raw socket operations the I/O state machines are built on.
///
/// [`Socket`](super::Socket) is the OS-backed implementation. Every call is
/// non-blocking: "nothing to do right now" surfaces as
/// [`io::ErrorKind::WouldBlock`].
pub trait SocketResource {
    fn id(&self) -> SocketId;

    fn transport(&self) -> Transport;

    fn is_listening(&self) -> bool;

    /// Address of the connected peer, `Ok(None)` while not connected.
    fn remote_address(&self) -> io::Result<Option<String>>;

    /// Pending asynchronous error (e.g. a refused non-blocking connect).
    fn take_error(&self) -> io::Result<Option<io::Error>>;

    fn recv(&mut self, buf: &mut [u8], out_of_band: bool) -> io::Result<usize>;

    /// Receives one datagram along with its origin, when known.
    fn recv_from(&mut self, buf: &mut [u8]) -> io::Result<(usize, Option<String>)>;

    /// Number of bytes (at most one) waiting to be read, without consuming them.
    fn peek(&self, out_of_band: bool) -> io::Result<usize>;

    fn send(&mut self, data: &[u8], out_of_band: bool) -> io::Result<usize>;
}
