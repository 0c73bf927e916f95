use std::io;

use super::Io;
use crate::{
    error::{NetworkError, Result},
    frame::{AcceptedFrame, Frame, FramePicker, Incoming, PartialFrame},
    socket::Socket,
};

/// Listening side of a connection-oriented socket. A read accepts one
/// pending connection.
#[derive(Debug)]
pub struct StreamedServerIo {
    socket: Socket,
    address: String,
}

impl StreamedServerIo {
    pub fn new(socket: Socket) -> Self {
        let address = socket.local_address();
        Self { socket, address }
    }

    pub fn socket(&self) -> &Socket {
        &self.socket
    }

    pub fn local_address(&self) -> &str {
        &self.address
    }
}

impl Io for StreamedServerIo {
    /// The picker is ignored; the accepted socket comes back as
    /// [`Incoming::Accepted`].
    fn read(&mut self, _picker: &mut dyn FramePicker, out_of_band: bool) -> Result<Incoming> {
        if out_of_band {
            return Err(NetworkError::unsupported("out-of-band data on a listening socket"));
        }
        loop {
            match self.socket.accept() {
                Ok((client, remote)) => {
                    tracing::debug!(
                        server = %self.socket.id(),
                        client = %client.id(),
                        remote = %remote,
                        "connection accepted"
                    );
                    return Ok(Incoming::Accepted(AcceptedFrame::new(remote, client)));
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    return Ok(Incoming::Partial(PartialFrame::new(Frame::default())));
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    tracing::warn!(server = %self.socket.id(), error = %e, "accept failed");
                    return Err(NetworkError::AcceptFailed {
                        address: self.address.clone(),
                        reason: e.to_string(),
                        source: Some(e),
                    });
                }
            }
        }
    }

    fn write(&mut self, _data: &[u8], _out_of_band: bool) -> Result<usize> {
        Err(NetworkError::unsupported("cannot write to a listening socket"))
    }
}
