use std::io;

use super::{ClientCore, ConnectionState, Context, Io};
use crate::{
    error::{NetworkError, Result},
    frame::{FramePicker, Incoming, PartialFrame},
    socket::{IoConfig, Socket, SocketResource},
};

/// Client side of a datagram socket (UDP or Unix datagram), also used for the
/// peer sockets a [`DatagramServerIo`](super::DatagramServerIo) accepts.
///
/// Each read consumes exactly one datagram. A frame must fit in a single
/// datagram: if the picker has not reached EOF once the datagram is consumed,
/// the read fails with `FramingIncomplete` right away.
#[derive(Debug)]
pub struct DatagramClientIo<S = Socket> {
    core: ClientCore<S>,
}

impl<S: SocketResource> DatagramClientIo<S> {
    pub fn new(socket: S, config: IoConfig) -> Self {
        let buffer_size = config.max_datagram_size;
        let mut core = ClientCore::new(socket, config, buffer_size);
        // datagram sockets have no handshake to wait for
        match core.socket.remote_address() {
            Ok(Some(address)) => core.mark_connected(address),
            _ => {
                core.state = ConnectionState::Connected;
                core.was_connected = true;
            }
        }
        Self { core }
    }

    pub fn socket(&self) -> &S {
        &self.core.socket
    }

    pub fn into_socket(self) -> S {
        self.core.socket
    }

    pub fn is_connected(&self) -> bool {
        self.core.state == ConnectionState::Connected
    }

    pub fn remote_address(&self) -> Option<&str> {
        self.core.remote_address.as_deref()
    }

    pub fn context(&self) -> &Context {
        &self.core.context
    }

    pub fn reset_transfer(&mut self) {
        self.core.reset_transfer();
    }
}

impl<S: SocketResource> Io for DatagramClientIo<S> {
    fn read(&mut self, picker: &mut dyn FramePicker, out_of_band: bool) -> Result<Incoming> {
        if out_of_band {
            return Err(NetworkError::unsupported("out-of-band data on a datagram socket"));
        }
        self.core.anchor_receive();
        if picker.is_eof() || self.core.replay_leftover(picker, false) {
            return Ok(self.core.complete(picker));
        }

        loop {
            match self.core.socket.recv_from(&mut self.core.buffer) {
                Ok((received, origin)) => {
                    tracing::trace!(id = %self.core.socket.id(), received, ?origin, "datagram received");
                    let eof = self.core.feed(picker, received, false, origin);
                    self.core.track_receive(received)?;
                    if eof {
                        return Ok(self.core.complete(picker));
                    }
                    return Err(self.core.incomplete(picker, "datagram ended before the frame did"));
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    return Ok(Incoming::Partial(PartialFrame::new(picker.create_frame())));
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(self.core.receive_error(e)),
            }
        }
    }

    fn write(&mut self, data: &[u8], out_of_band: bool) -> Result<usize> {
        if out_of_band {
            return Err(NetworkError::unsupported("out-of-band data on a datagram socket"));
        }
        let limit = self.core.config.max_datagram_size;
        if data.len() > limit {
            return Err(NetworkError::unsupported(format!(
                "datagram of {} bytes exceeds the limit of {limit}",
                data.len()
            )));
        }
        self.core.anchor_send();

        loop {
            match self.core.socket.send(data, false) {
                Ok(sent) if sent > 0 || data.is_empty() => {
                    self.core.track_send(sent)?;
                    self.core.finish_send();
                    return Ok(sent);
                }
                Ok(_) => break,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(self.core.send_error(e)),
            }
        }

        self.core.spend_write_attempt();
        if self.core.write_attempts_left() == 0 {
            self.core.refill_write_attempts();
            return Err(NetworkError::SendFailed {
                address: self.core.address(),
                source: io::Error::new(io::ErrorKind::WriteZero, "datagram was never sent"),
            });
        }
        Ok(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        frame::{FixedLengthFramePicker, RawFramePicker},
        io::fake::FakeSocket,
        socket::Transport,
    };

    fn udp() -> DatagramClientIo<FakeSocket> {
        DatagramClientIo::new(FakeSocket::connected(Transport::Udp), IoConfig::default())
    }

    #[test]
    fn test_connected_from_the_start() {
        let io = udp();
        assert!(io.is_connected());
        assert_eq!(io.remote_address(), Some("10.0.0.2:4000"));
    }

    #[test]
    fn test_frame_carries_datagram_origin() {
        let mut io = udp();
        io.core.socket.push(b"ping");
        let frame = io
            .read(&mut RawFramePicker::new(), false)
            .unwrap()
            .complete()
            .unwrap();
        assert_eq!(frame.data().as_ref(), b"ping");
        assert_eq!(frame.remote_address(), Some("10.0.0.9:53"));
    }

    #[test]
    fn test_frame_must_fit_one_datagram() {
        let mut io = udp();
        io.core.socket.push(b"abc");
        io.core.socket.push(b"defghij");

        match io.read(&mut FixedLengthFramePicker::new(10), false) {
            Err(NetworkError::FramingIncomplete { partial, .. }) => {
                assert_eq!(partial.data().as_ref(), b"abc");
            }
            other => panic!("expected FramingIncomplete, got {other:?}"),
        }
        // the next datagram is untouched
        assert_eq!(io.core.socket.reads.len(), 1);
    }

    #[test]
    fn test_nothing_pending_is_partial() {
        let mut io = udp();
        let incoming = io.read(&mut RawFramePicker::new(), false).unwrap();
        assert!(incoming.is_partial());
    }

    #[test]
    fn test_write_limits() {
        let config = IoConfig::builder().max_datagram_size(4).build();
        let mut io = DatagramClientIo::new(FakeSocket::connected(Transport::Udp), config);

        assert_eq!(io.write(b"1234", false).unwrap(), 4);
        let err = io.write(b"12345", false).unwrap_err();
        assert!(matches!(err, NetworkError::Unsupported(_)));
        let err = io.write(b"1", true).unwrap_err();
        assert!(matches!(err, NetworkError::Unsupported(_)));
        let err = io.read(&mut RawFramePicker::new(), true).unwrap_err();
        assert!(matches!(err, NetworkError::Unsupported(_)));
    }

    #[test]
    fn test_blocked_write_spends_budget() {
        let config = IoConfig::builder().write_attempts(2).build();
        let mut io = DatagramClientIo::new(FakeSocket::connected(Transport::Udp), config);
        io.core.socket.send_script.extend([
            Err(io::ErrorKind::WouldBlock.into()),
            Err(io::ErrorKind::WouldBlock.into()),
        ]);

        assert_eq!(io.write(b"x", false).unwrap(), 0);
        let err = io.write(b"x", false).unwrap_err();
        assert!(matches!(err, NetworkError::SendFailed { .. }));
    }
}
