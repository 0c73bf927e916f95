//! OS sockets wrapped for non-blocking use.
//!
//! Every [`Socket`] gets a [`SocketId`] at creation. The id is the handle the
//! selector and callers key their maps by:
//!
//! ```text
//!   HashMap<SocketId, StreamedClientIo>
//!        │
//!        ├──> SocketId(1) ──> Io { Socket { fd, Tcp, Client } }
//!        ├──> SocketId(2) ──> Io { Socket { fd, Tcp, Listener } }
//!        └──> SocketId(N) ──> Io { Socket { dup(fd), Udp, Peer } }
//! ```
//!
//! A *peer* socket is what a datagram server hands out on accept: it shares
//! the server's descriptor, remembers who sent the first packet and serves
//! that packet on its first read.

pub mod config;
pub mod traits;

use bytes::Bytes;
use socket2::{Domain, Protocol, SockAddr, Type};
use std::{
    fmt, io,
    io::Read,
    net::{Ipv4Addr, Ipv6Addr, SocketAddr},
    os::unix::io::{AsRawFd, RawFd},
    path::Path,
    sync::atomic::{AtomicU64, Ordering},
};

pub use config::{IoConfig, IoConfigBuilder};
pub use traits::SocketResource;

use crate::sys;

const LISTEN_BACKLOG: i32 = 128;
pub(crate) const UNNAMED_ADDRESS: &str = "(unnamed)";

static NEXT_SOCKET_ID: AtomicU64 = AtomicU64::new(1);

/// Stable handle of a socket, assigned once at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SocketId(u64);

impl SocketId {
    pub(crate) fn next() -> Self {
        SocketId(NEXT_SOCKET_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn new(id: u64) -> Self {
        SocketId(id)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SocketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Tcp,
    Udp,
    UnixStream,
    UnixDatagram,
}

impl Transport {
    pub fn is_stream(&self) -> bool {
        matches!(self, Transport::Tcp | Transport::UnixStream)
    }

    pub fn is_datagram(&self) -> bool {
        !self.is_stream()
    }

    pub fn is_unix(&self) -> bool {
        matches!(self, Transport::UnixStream | Transport::UnixDatagram)
    }

    /// Only TCP has an urgent-data side channel.
    pub fn supports_out_of_band(&self) -> bool {
        matches!(self, Transport::Tcp)
    }
}

#[derive(Debug)]
enum Role {
    Client,
    Listener,
    Peer {
        origin: Option<SockAddr>,
        pending: Option<Bytes>,
    },
}

/// Non-blocking OS socket.
#[derive(Debug)]
pub struct Socket {
    id: SocketId,
    inner: socket2::Socket,
    transport: Transport,
    role: Role,
}

impl Socket {
    fn from_parts(inner: socket2::Socket, transport: Transport, role: Role) -> io::Result<Self> {
        inner.set_nonblocking(true)?;
        let socket = Self {
            id: SocketId::next(),
            inner,
            transport,
            role,
        };
        tracing::trace!(id = %socket.id, ?transport, "socket created");
        Ok(socket)
    }

    /// Starts a non-blocking TCP connect; completion is observed on first I/O.
    pub fn tcp_connect(addr: SocketAddr) -> io::Result<Self> {
        let inner = socket2::Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
        inner.set_nonblocking(true)?;
        start_connect(&inner, &SockAddr::from(addr))?;
        Self::from_parts(inner, Transport::Tcp, Role::Client)
    }

    pub fn tcp_listen(addr: SocketAddr) -> io::Result<Self> {
        let inner = socket2::Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
        inner.set_reuse_address(true)?;
        inner.bind(&SockAddr::from(addr))?;
        inner.listen(LISTEN_BACKLOG)?;
        Self::from_parts(inner, Transport::Tcp, Role::Listener)
    }

    /// Datagram server socket bound to `addr`.
    pub fn udp_bind(addr: SocketAddr) -> io::Result<Self> {
        let inner = socket2::Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP))?;
        inner.bind(&SockAddr::from(addr))?;
        Self::from_parts(inner, Transport::Udp, Role::Listener)
    }

    /// Datagram client socket on an ephemeral port, connected to `addr`.
    pub fn udp_connect(addr: SocketAddr) -> io::Result<Self> {
        let inner = socket2::Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP))?;
        let local: SocketAddr = match addr {
            SocketAddr::V4(_) => (Ipv4Addr::UNSPECIFIED, 0).into(),
            SocketAddr::V6(_) => (Ipv6Addr::UNSPECIFIED, 0).into(),
        };
        inner.bind(&SockAddr::from(local))?;
        inner.connect(&SockAddr::from(addr))?;
        Self::from_parts(inner, Transport::Udp, Role::Client)
    }

    pub fn unix_connect<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let inner = socket2::Socket::new(Domain::UNIX, Type::STREAM, None)?;
        inner.set_nonblocking(true)?;
        start_connect(&inner, &SockAddr::unix(path)?)?;
        Self::from_parts(inner, Transport::UnixStream, Role::Client)
    }

    pub fn unix_listen<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let inner = socket2::Socket::new(Domain::UNIX, Type::STREAM, None)?;
        inner.bind(&SockAddr::unix(path)?)?;
        inner.listen(LISTEN_BACKLOG)?;
        Self::from_parts(inner, Transport::UnixStream, Role::Listener)
    }

    pub fn unix_datagram_bind<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let inner = socket2::Socket::new(Domain::UNIX, Type::DGRAM, None)?;
        inner.bind(&SockAddr::unix(path)?)?;
        Self::from_parts(inner, Transport::UnixDatagram, Role::Listener)
    }

    /// Unix datagram client. Bind it to `local` to be able to receive replies.
    pub fn unix_datagram_connect<P, L>(path: P, local: Option<L>) -> io::Result<Self>
    where
        P: AsRef<Path>,
        L: AsRef<Path>,
    {
        let inner = socket2::Socket::new(Domain::UNIX, Type::DGRAM, None)?;
        if let Some(local) = local {
            inner.bind(&SockAddr::unix(local)?)?;
        }
        inner.connect(&SockAddr::unix(path)?)?;
        Self::from_parts(inner, Transport::UnixDatagram, Role::Client)
    }

    pub fn id(&self) -> SocketId {
        self.id
    }

    pub fn transport(&self) -> Transport {
        self.transport
    }

    pub fn is_listening(&self) -> bool {
        matches!(self.role, Role::Listener)
    }

    /// Whether this is a peer handed out by a datagram server accept.
    pub fn is_peer(&self) -> bool {
        matches!(self.role, Role::Peer { .. })
    }

    /// Peer socket still holding its first datagram.
    pub fn has_pending_payload(&self) -> bool {
        matches!(self.role, Role::Peer { pending: Some(_), .. })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.inner.local_addr()?.as_socket().ok_or_else(|| {
            io::Error::new(io::ErrorKind::Unsupported, "not an inet socket")
        })
    }

    pub fn local_address(&self) -> String {
        self.inner
            .local_addr()
            .ok()
            .and_then(|addr| format_address(&addr))
            .unwrap_or_else(|| UNNAMED_ADDRESS.to_string())
    }

    /// Accepts one pending connection on a listening stream socket.
    pub(crate) fn accept(&self) -> io::Result<(Socket, String)> {
        let (inner, addr) = self.inner.accept()?;
        let remote = format_address(&addr).unwrap_or_else(|| UNNAMED_ADDRESS.to_string());
        let socket = Socket::from_parts(inner, self.transport, Role::Client)?;
        Ok((socket, remote))
    }

    /// Looks at the next pending datagram without consuming it.
    pub(crate) fn peek_from(&self, buf: &mut [u8]) -> io::Result<(usize, Option<SockAddr>)> {
        let (len, addr) = self.inner.peek_from(sys::as_uninit(buf))?;
        Ok((len, determinable(addr)))
    }

    pub(crate) fn recv_origin(&self, buf: &mut [u8]) -> io::Result<(usize, Option<SockAddr>)> {
        let (len, addr) = self.inner.recv_from(sys::as_uninit(buf))?;
        Ok((len, determinable(addr)))
    }

    /// Builds the virtual per-peer socket a datagram server hands out on accept.
    pub(crate) fn datagram_peer(&self, origin: Option<SockAddr>, payload: Bytes) -> io::Result<Socket> {
        let inner = self.inner.try_clone()?;
        Socket::from_parts(
            inner,
            self.transport,
            Role::Peer {
                origin,
                pending: Some(payload),
            },
        )
    }

    /// Shuts both directions down. The descriptor itself is released on drop.
    pub fn close(&self) -> io::Result<()> {
        if matches!(self.role, Role::Client) && self.transport.is_stream() {
            match self.inner.shutdown(std::net::Shutdown::Both) {
                Err(e) if e.kind() != io::ErrorKind::NotConnected => return Err(e),
                _ => {}
            }
        }
        tracing::debug!(id = %self.id, "socket closed");
        Ok(())
    }
}

impl AsRawFd for Socket {
    fn as_raw_fd(&self) -> RawFd {
        self.inner.as_raw_fd()
    }
}

impl SocketResource for Socket {
    fn id(&self) -> SocketId {
        self.id
    }

    fn transport(&self) -> Transport {
        self.transport
    }

    fn is_listening(&self) -> bool {
        Socket::is_listening(self)
    }

    fn remote_address(&self) -> io::Result<Option<String>> {
        match &self.role {
            Role::Listener => Ok(None),
            Role::Peer { origin, .. } => Ok(Some(
                origin
                    .as_ref()
                    .and_then(format_address)
                    .unwrap_or_else(|| UNNAMED_ADDRESS.to_string()),
            )),
            Role::Client => match self.inner.peer_addr() {
                Ok(addr) => Ok(Some(
                    format_address(&addr).unwrap_or_else(|| UNNAMED_ADDRESS.to_string()),
                )),
                Err(e) if e.kind() == io::ErrorKind::NotConnected => Ok(None),
                Err(e) => Err(e),
            },
        }
    }

    fn take_error(&self) -> io::Result<Option<io::Error>> {
        self.inner.take_error()
    }

    fn recv(&mut self, buf: &mut [u8], out_of_band: bool) -> io::Result<usize> {
        if let Role::Peer { pending, .. } = &mut self.role {
            return take_pending(pending, buf);
        }
        if out_of_band {
            self.inner.recv_out_of_band(sys::as_uninit(buf))
        } else {
            (&self.inner).read(buf)
        }
    }

    fn recv_from(&mut self, buf: &mut [u8]) -> io::Result<(usize, Option<String>)> {
        if let Role::Peer { pending, origin } = &mut self.role {
            let len = take_pending(pending, buf)?;
            return Ok((len, origin.as_ref().and_then(format_address)));
        }
        let (len, addr) = self.recv_origin(buf)?;
        Ok((len, addr.as_ref().and_then(format_address)))
    }

    fn peek(&self, out_of_band: bool) -> io::Result<usize> {
        match &self.role {
            Role::Peer { pending: Some(data), .. } => Ok(data.len().min(1)),
            Role::Peer { pending: None, .. } => Err(io::ErrorKind::WouldBlock.into()),
            _ => sys::peek_fd(self.as_raw_fd(), out_of_band),
        }
    }

    fn send(&mut self, data: &[u8], out_of_band: bool) -> io::Result<usize> {
        match &self.role {
            Role::Listener => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "cannot send on a listening socket",
            )),
            Role::Peer { origin: Some(origin), .. } => self.inner.send_to(data, origin),
            Role::Peer { origin: None, .. } => Err(io::Error::new(
                io::ErrorKind::AddrNotAvailable,
                "datagram origin is unknown",
            )),
            Role::Client if out_of_band => self.inner.send_out_of_band(data),
            Role::Client => self.inner.send(data),
        }
    }
}

fn start_connect(inner: &socket2::Socket, addr: &SockAddr) -> io::Result<()> {
    match inner.connect(addr) {
        Ok(()) => Ok(()),
        Err(e) if e.raw_os_error() == Some(libc::EINPROGRESS) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(()),
        Err(e) => Err(e),
    }
}

fn take_pending(pending: &mut Option<Bytes>, buf: &mut [u8]) -> io::Result<usize> {
    let data = pending.take().ok_or(io::ErrorKind::WouldBlock)?;
    // datagram semantics: what does not fit is dropped
    let len = data.len().min(buf.len());
    buf[..len].copy_from_slice(&data[..len]);
    Ok(len)
}

fn determinable(addr: SockAddr) -> Option<SockAddr> {
    format_address(&addr).map(|_| addr)
}

/// `ip:port` for inet addresses, the path for named Unix sockets.
pub(crate) fn format_address(addr: &SockAddr) -> Option<String> {
    if let Some(inet) = addr.as_socket() {
        return Some(inet.to_string());
    }
    addr.as_pathname().map(|path| path.display().to_string())
}
