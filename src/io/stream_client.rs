use std::io;

use super::{is_empty_read, ClientCore, ConnectionState, Context, Io};
use crate::{
    error::{NetworkError, Result},
    frame::{Frame, FramePicker, Incoming, PartialFrame},
    socket::{IoConfig, Socket, SocketResource},
};

/// Client side of a connection-oriented socket (TCP or Unix stream).
///
/// A freshly created socket may still be connecting; reads return an empty
/// `Partial` and writes return 0 until the connect completes, then the first
/// I/O flips the machine to [`ConnectionState::Connected`]. Once a connected
/// socket loses its peer every further call fails with `ConnectionLost`.
#[derive(Debug)]
pub struct StreamedClientIo<S = Socket> {
    core: ClientCore<S>,
}

impl<S: SocketResource> StreamedClientIo<S> {
    pub fn new(socket: S, config: IoConfig) -> Self {
        let buffer_size = config.read_buffer_size;
        Self {
            core: ClientCore::new(socket, config, buffer_size),
        }
    }

    pub fn socket(&self) -> &S {
        &self.core.socket
    }

    pub fn into_socket(self) -> S {
        self.core.socket
    }

    pub fn state(&self) -> ConnectionState {
        self.core.state
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

    /// Prepares a persistent connection for the next request.
    pub fn reset_transfer(&mut self) {
        self.core.reset_transfer();
    }

    fn refused(&self, reason: impl Into<String>) -> NetworkError {
        NetworkError::ConnectionRefused {
            address: self.core.address(),
            reason: reason.into(),
        }
    }

    /// Ok(false) while the connect is still in flight.
    fn ensure_connected(&mut self) -> Result<bool> {
        if self.core.state == ConnectionState::Connected {
            return Ok(true);
        }
        if self.core.was_connected {
            return Err(self.core.lost());
        }
        match self.core.socket.remote_address() {
            Ok(Some(address)) => {
                self.core.mark_connected(address);
                Ok(true)
            }
            Ok(None) => {
                if let Some(err) = self.core.socket.take_error()? {
                    return Err(self.refused(err.to_string()));
                }
                if self.core.created_at.elapsed() > self.core.config.connection_timeout {
                    return Err(self.refused("connection timed out"));
                }
                Ok(false)
            }
            Err(err) => Err(self.refused(err.to_string())),
        }
    }

    fn check_out_of_band(&self) -> Result<()> {
        let transport = self.core.socket.transport();
        if transport.supports_out_of_band() {
            Ok(())
        } else {
            Err(NetworkError::unsupported(format!(
                "out-of-band data on {transport:?}"
            )))
        }
    }

    fn write_out_of_band(&mut self, data: &[u8]) -> Result<usize> {
        let mut sent = 0;
        for byte in data {
            match self.core.socket.send(std::slice::from_ref(byte), true) {
                Ok(0) => break,
                Ok(_) => sent += 1,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => return Err(self.core.send_error(e)),
            }
        }
        self.core.track_send(sent)?;
        tracing::trace!(id = %self.core.socket.id(), sent, "out-of-band bytes sent");
        Ok(sent)
    }
}

impl<S: SocketResource> Io for StreamedClientIo<S> {
    fn read(&mut self, picker: &mut dyn FramePicker, out_of_band: bool) -> Result<Incoming> {
        if out_of_band {
            self.check_out_of_band()?;
        }
        if !self.ensure_connected()? {
            return Ok(Incoming::Partial(PartialFrame::new(Frame::default())));
        }
        self.core.anchor_receive();
        if picker.is_eof() || self.core.replay_leftover(picker, out_of_band) {
            return Ok(self.core.complete(picker));
        }

        let mut remote_closed = false;
        let mut received_any = false;
        let mut retried = false;
        loop {
            let received = match self.core.socket.recv(&mut self.core.buffer, out_of_band) {
                Ok(0) if !out_of_band => {
                    remote_closed = true;
                    break;
                }
                Ok(n) => n,
                Err(e) if is_empty_read(&e, out_of_band) => 0,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(self.core.receive_error(e)),
            };

            if received > 0 {
                received_any = true;
                self.core.refill_read_attempts();
                let eof = self.core.feed(picker, received, out_of_band, None);
                tracing::trace!(id = %self.core.socket.id(), received, eof, "chunk received");
                self.core.track_receive(received)?;
                if eof {
                    break;
                }
                continue;
            }

            // data may race in between the read and the peek; give it one more go
            let pending = matches!(self.core.socket.peek(out_of_band), Ok(n) if n > 0);
            if pending && !retried {
                retried = true;
                continue;
            }
            if !pending && !received_any {
                self.core.dry_read();
            }
            break;
        }

        if picker.is_eof() {
            return Ok(self.core.complete(picker));
        }
        if remote_closed {
            if picker.on_remote_close() {
                tracing::debug!(id = %self.core.socket.id(), "remote closed, frame complete");
                self.core.state = ConnectionState::Disconnected;
                return Ok(self.core.complete(picker));
            }
            return Err(self.core.lost());
        }
        if !received_any && self.core.read_attempts_left() == 0 {
            return Err(self.core.incomplete(picker, "read attempts exhausted"));
        }
        Ok(Incoming::Partial(PartialFrame::new(picker.create_frame())))
    }

    fn write(&mut self, data: &[u8], out_of_band: bool) -> Result<usize> {
        if out_of_band {
            self.check_out_of_band()?;
            if data.len() > self.core.config.oob_max_packet_size {
                return Err(NetworkError::unsupported(format!(
                    "{} out-of-band bytes exceed the limit of {}",
                    data.len(),
                    self.core.config.oob_max_packet_size
                )));
            }
        }
        if !self.ensure_connected()? {
            return Ok(0);
        }
        self.core.anchor_send();
        if out_of_band {
            return self.write_out_of_band(data);
        }

        if data.is_empty() {
            return match self.core.socket.send(data, false) {
                Ok(_) => Ok(0),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(0),
                Err(e) => Err(self.core.send_error(e)),
            };
        }

        let mut written = 0;
        while written < data.len() {
            let sent = match self.core.socket.send(&data[written..], false) {
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => 0,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(self.core.send_error(e)),
            };
            if sent == 0 {
                break;
            }
            written += sent;
            self.core.refill_write_attempts();
            self.core.track_send(sent)?;
        }

        if written == data.len() {
            self.core.finish_send();
            return Ok(written);
        }
        // only a call that moved nothing costs an attempt
        if written == 0 {
            self.core.spend_write_attempt();
            if self.core.write_attempts_left() == 0 {
                self.core.refill_write_attempts();
                return Err(NetworkError::SendFailed {
                    address: self.core.address(),
                    source: io::Error::new(
                        io::ErrorKind::WriteZero,
                        format!("none of {} bytes sent", data.len()),
                    ),
                });
            }
        }
        Ok(written)
    }
}
