use bytes::Bytes;
use std::io;

use super::Io;
use crate::{
    error::{NetworkError, Result},
    frame::{AcceptedFrame, Frame, FramePicker, Incoming, PartialFrame},
    socket::{format_address, IoConfig, Socket, UNNAMED_ADDRESS},
};

/// Server side of a datagram socket.
///
/// A read takes the next datagram off the wire and wraps it, together with
/// its origin, into a peer socket that is returned as
/// [`Incoming::Accepted`]. Reading that peer through a
/// [`DatagramClientIo`](super::DatagramClientIo) yields the datagram; writes
/// on it go back to the origin.
#[derive(Debug)]
pub struct DatagramServerIo {
    socket: Socket,
    address: String,
    buffer: Vec<u8>,
}

impl DatagramServerIo {
    pub fn new(socket: Socket, config: &IoConfig) -> Self {
        let address = socket.local_address();
        Self {
            socket,
            address,
            buffer: vec![0; config.max_datagram_size.max(1)],
        }
    }

    pub fn socket(&self) -> &Socket {
        &self.socket
    }

    pub fn local_address(&self) -> &str {
        &self.address
    }

    fn accept_failed(&self, reason: impl Into<String>, source: Option<io::Error>) -> NetworkError {
        let reason = reason.into();
        tracing::warn!(server = %self.socket.id(), reason = %reason, "datagram accept failed");
        NetworkError::AcceptFailed {
            address: self.address.clone(),
            reason,
            source,
        }
    }

    /// Drops the pending datagram so the next select does not report it again.
    fn reject_unknown_origin(&mut self) -> NetworkError {
        match self.socket.recv_origin(&mut self.buffer) {
            Ok((len, _)) => {
                tracing::debug!(server = %self.socket.id(), len, "datagram of unknown origin dropped");
                self.accept_failed("datagram origin is undeterminable", None)
            }
            Err(e) => {
                tracing::warn!(server = %self.socket.id(), error = %e, "failed to drop datagram of unknown origin");
                self.accept_failed("datagram origin is undeterminable", Some(e))
            }
        }
    }
}

impl Io for DatagramServerIo {
    fn read(&mut self, _picker: &mut dyn FramePicker, out_of_band: bool) -> Result<Incoming> {
        if out_of_band {
            return Err(NetworkError::unsupported("out-of-band data on a datagram socket"));
        }
        let origin = loop {
            match self.socket.peek_from(&mut self.buffer) {
                Ok((_, origin)) => break origin,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    return Ok(Incoming::Partial(PartialFrame::new(Frame::default())));
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(self.accept_failed(e.to_string(), Some(e))),
            }
        };

        // unbound unix senders have no address and are still served
        if origin.is_none() && !self.socket.transport().is_unix() {
            return Err(self.reject_unknown_origin());
        }

        let (len, origin) = match self.socket.recv_origin(&mut self.buffer) {
            Ok(received) => received,
            Err(e) => return Err(self.accept_failed(e.to_string(), Some(e))),
        };
        let remote = origin
            .as_ref()
            .and_then(format_address)
            .unwrap_or_else(|| UNNAMED_ADDRESS.to_string());
        let payload = Bytes::copy_from_slice(&self.buffer[..len]);
        let peer = match self.socket.datagram_peer(origin, payload) {
            Ok(peer) => peer,
            Err(e) => return Err(self.accept_failed(e.to_string(), Some(e))),
        };
        tracing::debug!(
            server = %self.socket.id(),
            peer = %peer.id(),
            remote = %remote,
            len,
            "datagram accepted"
        );
        Ok(Incoming::Accepted(AcceptedFrame::new(remote, peer)))
    }

    fn write(&mut self, _data: &[u8], _out_of_band: bool) -> Result<usize> {
        Err(NetworkError::unsupported(
            "write through the accepted peer socket instead",
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{frame::RawFramePicker, io::DatagramClientIo};
    use std::{net::UdpSocket, os::unix::net::UnixDatagram, thread, time::Duration};

    fn accept(io: &mut DatagramServerIo) -> AcceptedFrame {
        loop {
            match io.read(&mut RawFramePicker::new(), false).unwrap() {
                Incoming::Accepted(accepted) => break accepted,
                _ => thread::sleep(Duration::from_millis(5)),
            }
        }
    }

    #[test]
    fn test_accepted_peer_serves_datagram_and_replies() {
        let config = IoConfig::default();
        let server = Socket::udp_bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let server_addr = server.local_addr().unwrap();
        let mut io = DatagramServerIo::new(server, &config);

        assert!(io.read(&mut RawFramePicker::new(), false).unwrap().is_partial());

        let sender = UdpSocket::bind("127.0.0.1:0").unwrap();
        sender.send_to(b"hello", server_addr).unwrap();

        let accepted = accept(&mut io);
        assert_eq!(
            accepted.remote_address(),
            sender.local_addr().unwrap().to_string()
        );

        let mut peer = DatagramClientIo::new(accepted.into_socket(), config);
        let frame = peer
            .read(&mut RawFramePicker::new(), false)
            .unwrap()
            .complete()
            .unwrap();
        assert_eq!(frame.data().as_ref(), b"hello");

        assert_eq!(peer.write(b"world", false).unwrap(), 5);
        let mut buf = [0u8; 16];
        let (len, from) = sender.recv_from(&mut buf).unwrap();
        assert_eq!(&buf[..len], b"world");
        assert_eq!(from, server_addr);
    }

    #[test]
    fn test_unbound_unix_sender_is_served_but_cannot_be_answered() {
        let path = std::env::temp_dir().join(format!(
            "mill-sockets-{}-unnamed-dgram.sock",
            std::process::id()
        ));
        let _ = std::fs::remove_file(&path);
        let config = IoConfig::default();
        let mut io = DatagramServerIo::new(Socket::unix_datagram_bind(&path).unwrap(), &config);

        let sender = UnixDatagram::unbound().unwrap();
        sender.send_to(b"anonymous", &path).unwrap();

        let accepted = accept(&mut io);
        assert_eq!(accepted.remote_address(), UNNAMED_ADDRESS);

        let mut peer = DatagramClientIo::new(accepted.into_socket(), config);
        let frame = peer
            .read(&mut RawFramePicker::new(), false)
            .unwrap()
            .complete()
            .unwrap();
        assert_eq!(frame.data().as_ref(), b"anonymous");

        let err = peer.write(b"reply", false).unwrap_err();
        assert!(matches!(err, NetworkError::SendFailed { .. }));

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_unknown_origin_datagram_is_drained() {
        let config = IoConfig::default();
        let server = Socket::udp_bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let server_addr = server.local_addr().unwrap();
        let mut io = DatagramServerIo::new(server, &config);

        let sender = UdpSocket::bind("127.0.0.1:0").unwrap();
        sender.send_to(b"stray", server_addr).unwrap();
        while io.socket.peek_from(&mut io.buffer).is_err() {
            thread::sleep(Duration::from_millis(5));
        }

        let err = io.reject_unknown_origin();
        assert!(matches!(err, NetworkError::AcceptFailed { source: None, .. }));
        // the packet is gone, nothing is reported again
        assert!(io.read(&mut RawFramePicker::new(), false).unwrap().is_partial());
    }
}
