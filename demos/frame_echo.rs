//! Line echo server driven by a single select loop.
//!
//! ```text
//! cargo run --example frame_echo -- 127.0.0.1:7878
//! printf 'hello\nworld\n' | nc 127.0.0.1 7878
//! ```

use anyhow::{Context as _, Result};
use mill_sockets::prelude::*;
use std::{collections::HashMap, net::SocketAddr, time::Duration};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

fn line_picker() -> MarkerFramePicker {
    MarkerFramePicker::until("\n", true)
}

struct Connection {
    io: StreamedClientIo,
    picker: MarkerFramePicker,
    outbox: Vec<u8>,
}

impl Connection {
    fn new(socket: Socket, config: IoConfig) -> Self {
        Self {
            io: StreamedClientIo::new(socket, config),
            picker: line_picker(),
            outbox: Vec::new(),
        }
    }

    fn receive(&mut self) -> mill_sockets::Result<()> {
        while let Incoming::Complete(line) = self.io.read(&mut self.picker, false)? {
            debug!(bytes = line.len(), remote = ?line.remote_address(), "line received");
            self.outbox.extend_from_slice(line.data());
            self.picker = line_picker();
            // pipelined lines wait in the leftover
            if self.io.context().unhandled(false).is_none() {
                break;
            }
        }
        Ok(())
    }

    fn flush(&mut self) -> mill_sockets::Result<()> {
        let sent = self.io.write(&self.outbox, false)?;
        self.outbox.drain(..sent);
        if self.outbox.is_empty() {
            self.io.reset_transfer();
        }
        Ok(())
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let addr: SocketAddr = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "127.0.0.1:7878".to_string())
        .parse()
        .context("invalid listen address")?;
    let config = IoConfig::builder()
        .read_attempts(3)
        .min_receive_speed(16.0, Duration::from_secs(30))
        .build();

    let mut server = StreamedServerIo::new(Socket::tcp_listen(addr).context("failed to listen")?);
    let mut selector = AsyncSelector::new()?;
    let mut connections: HashMap<SocketId, Connection> = HashMap::new();
    info!(address = server.local_address(), "echo server listening");

    loop {
        selector.add_socket_operation(server.socket(), Operation::Read);
        for connection in connections.values() {
            let operation = if connection.outbox.is_empty() {
                Operation::Read
            } else {
                Operation::Write
            };
            selector.add_socket_operation(connection.io.socket(), operation);
        }

        let ready = match selector.select_timeout(config.io_timeout) {
            Ok(ready) => ready,
            Err(err) if err.is_timeout() => continue,
            Err(err) => return Err(err.into()),
        };

        if ready.is_readable(server.socket().id()) {
            match server.read(&mut RawFramePicker::new(), false) {
                Ok(Incoming::Accepted(accepted)) => {
                    info!(remote = accepted.remote_address(), "client connected");
                    let socket = accepted.into_socket();
                    connections.insert(socket.id(), Connection::new(socket, config.clone()));
                }
                Ok(_) => {}
                Err(err) => warn!(error = %err, "accept failed"),
            }
        }

        let mut closed = Vec::new();
        for (id, connection) in connections.iter_mut() {
            let outcome = if ready.is_writable(*id) {
                connection.flush()
            } else if ready.is_readable(*id) {
                connection.receive()
            } else {
                Ok(())
            };
            match outcome {
                Ok(()) => {}
                Err(err) if err.is_connection_error() => {
                    info!(%id, "client disconnected");
                    closed.push(*id);
                }
                Err(err) => {
                    warn!(%id, error = %err, "dropping client");
                    closed.push(*id);
                }
            }
        }
        for id in closed {
            if let Some(connection) = connections.remove(&id) {
                let _ = connection.io.socket().close();
            }
        }
    }
}
