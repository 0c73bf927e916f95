//! Non-blocking I/O state machines.
//!
//! Each state machine owns one socket exclusively and turns a burst of raw,
//! possibly partial OS calls into a single `read(picker)` or `write(data)`:
//!
//! ```text
//!  read(picker)
//!    │
//!    ├─ connected? ──no──▶ ConnectionRefused / ConnectionLost / Partial(connecting)
//!    ├─ replay leftover from Context ──EOF──▶ Complete
//!    ├─ loop: recv ─▶ picker ─▶ SpeedRateCounter
//!    │        └─ nothing pending ─▶ dry call (every 2nd in a row spends an attempt)
//!    ├─ EOF ─────────────▶ Complete
//!    ├─ attempts left ───▶ Partial   (call again after the next readiness)
//!    └─ attempts spent ──▶ FramingIncomplete
//! ```
//!
//! Bytes a picker hands back past the end of its frame are kept in the
//! per-socket [`Context`], one slot for the regular channel and one for the
//! out-of-band channel.

mod datagram_client;
mod datagram_server;
mod stream_client;
mod stream_server;

pub use datagram_client::DatagramClientIo;
pub use datagram_server::DatagramServerIo;
pub use stream_client::StreamedClientIo;
pub use stream_server::StreamedServerIo;

use bytes::{Bytes, BytesMut};
use std::{io, time::Instant};

use crate::{
    error::{is_connection_gone, Direction, NetworkError, Result},
    frame::{FramePicker, Incoming},
    socket::{IoConfig, SocketResource},
    speed_rate::SpeedRateCounter,
};

/// Common interface of the four I/O state machines.
pub trait Io {
    /// Reads the next frame. `Partial` means "call again once more data is
    /// available"; only an exhausted attempt budget is an error.
    fn read(&mut self, picker: &mut dyn FramePicker, out_of_band: bool) -> Result<Incoming>;

    /// Writes as much of `data` as the OS takes right now and returns the
    /// number of bytes sent. Callers retry with the remaining slice.
    fn write(&mut self, data: &[u8], out_of_band: bool) -> Result<usize>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connected,
}

/// Bytes read past the end of a frame, waiting for the next one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Leftover {
    pub data: Bytes,
    pub origin: Option<String>,
}

/// Per-socket store of leftover data, one slot per channel.
#[derive(Debug, Default)]
pub struct Context {
    regular: Option<Leftover>,
    out_of_band: Option<Leftover>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&mut self, out_of_band: bool) -> &mut Option<Leftover> {
        if out_of_band {
            &mut self.out_of_band
        } else {
            &mut self.regular
        }
    }

    pub fn take(&mut self, out_of_band: bool) -> Option<Leftover> {
        self.slot(out_of_band).take()
    }

    /// Keeps `leftover` for the next read. A slot that is still occupied
    /// gets the new bytes appended, so nothing is dropped.
    pub fn store(&mut self, out_of_band: bool, leftover: Leftover) {
        let slot = self.slot(out_of_band);
        *slot = Some(match slot.take() {
            None => leftover,
            Some(pending) => {
                tracing::debug!(
                    pending = pending.data.len(),
                    appended = leftover.data.len(),
                    out_of_band,
                    "leftover appended to pending data"
                );
                let mut data = BytesMut::with_capacity(pending.data.len() + leftover.data.len());
                data.extend_from_slice(&pending.data);
                data.extend_from_slice(&leftover.data);
                Leftover {
                    data: data.freeze(),
                    origin: pending.origin.or(leftover.origin),
                }
            }
        });
    }

    pub fn unhandled(&self, out_of_band: bool) -> Option<&Leftover> {
        if out_of_band {
            self.out_of_band.as_ref()
        } else {
            self.regular.as_ref()
        }
    }

    pub fn reset(&mut self) {
        self.regular = None;
        self.out_of_band = None;
    }
}

/// State shared by the stream and datagram client machines.
#[derive(Debug)]
pub(crate) struct ClientCore<S> {
    pub(crate) socket: S,
    pub(crate) config: IoConfig,
    pub(crate) state: ConnectionState,
    pub(crate) was_connected: bool,
    pub(crate) context: Context,
    pub(crate) remote_address: Option<String>,
    pub(crate) buffer: Vec<u8>,
    pub(crate) created_at: Instant,
    read_attempts: u32,
    write_attempts: u32,
    dry_reads: u32,
    receive_counter: Option<SpeedRateCounter>,
    send_counter: Option<SpeedRateCounter>,
}

impl<S: SocketResource> ClientCore<S> {
    pub(crate) fn new(socket: S, config: IoConfig, buffer_size: usize) -> Self {
        let receive_counter = config.min_receive_speed.map(|speed| {
            SpeedRateCounter::new(speed, config.min_receive_speed_duration.as_secs_f64())
        });
        let send_counter = config
            .min_send_speed
            .map(|speed| SpeedRateCounter::new(speed, config.min_send_speed_duration.as_secs_f64()));
        Self {
            socket,
            read_attempts: config.read_attempts,
            write_attempts: config.write_attempts,
            dry_reads: 0,
            config,
            state: ConnectionState::Disconnected,
            was_connected: false,
            context: Context::new(),
            remote_address: None,
            buffer: vec![0; buffer_size.max(1)],
            created_at: Instant::now(),
            receive_counter,
            send_counter,
        }
    }

    pub(crate) fn address(&self) -> String {
        self.remote_address
            .clone()
            .unwrap_or_else(|| format!("socket {}", self.socket.id()))
    }

    pub(crate) fn mark_connected(&mut self, remote_address: String) {
        tracing::debug!(id = %self.socket.id(), remote = %remote_address, "socket connected");
        self.state = ConnectionState::Connected;
        self.was_connected = true;
        self.remote_address = Some(remote_address);
        self.context.reset();
    }

    pub(crate) fn lost(&mut self) -> NetworkError {
        if self.state == ConnectionState::Connected {
            tracing::debug!(id = %self.socket.id(), "connection lost");
        }
        self.state = ConnectionState::Disconnected;
        NetworkError::ConnectionLost {
            address: self.address(),
        }
    }

    pub(crate) fn receive_error(&mut self, err: io::Error) -> NetworkError {
        if is_connection_gone(&err) {
            return self.lost();
        }
        NetworkError::ReceiveFailed {
            address: self.address(),
            source: err,
        }
    }

    pub(crate) fn send_error(&mut self, err: io::Error) -> NetworkError {
        if is_connection_gone(&err) {
            return self.lost();
        }
        NetworkError::SendFailed {
            address: self.address(),
            source: err,
        }
    }

    /// Pushes leftover data from the previous frame into `picker`. Returns
    /// whether that alone completed the frame.
    pub(crate) fn replay_leftover(&mut self, picker: &mut dyn FramePicker, out_of_band: bool) -> bool {
        let Some(leftover) = self.context.take(out_of_band) else {
            return false;
        };
        tracing::trace!(
            id = %self.socket.id(),
            bytes = leftover.data.len(),
            out_of_band,
            "replaying leftover data"
        );
        let rest = picker.pick_up_data(&leftover.data, leftover.origin.as_deref());
        if !rest.is_empty() {
            let data = leftover.data.slice(leftover.data.len() - rest.len()..);
            self.context.store(
                out_of_band,
                Leftover {
                    data,
                    origin: leftover.origin,
                },
            );
        }
        picker.is_eof()
    }

    /// Feeds the first `len` bytes of the read buffer into `picker` and keeps
    /// whatever it hands back. `origin` overrides the cached remote address.
    pub(crate) fn feed(
        &mut self,
        picker: &mut dyn FramePicker,
        len: usize,
        out_of_band: bool,
        origin: Option<String>,
    ) -> bool {
        let origin = origin.or_else(|| self.remote_address.clone());
        let rest = picker.pick_up_data(&self.buffer[..len], origin.as_deref());
        if !rest.is_empty() {
            self.context.store(
                out_of_band,
                Leftover {
                    data: Bytes::copy_from_slice(rest),
                    origin,
                },
            );
        }
        picker.is_eof()
    }

    fn now(&self) -> f64 {
        self.created_at.elapsed().as_secs_f64()
    }

    pub(crate) fn anchor_receive(&mut self) {
        let now = self.now();
        if let Some(counter) = self.receive_counter.as_mut().filter(|c| !c.is_started()) {
            let _ = counter.advance(now, 0);
        }
    }

    pub(crate) fn anchor_send(&mut self) {
        let now = self.now();
        if let Some(counter) = self.send_counter.as_mut().filter(|c| !c.is_started()) {
            let _ = counter.advance(now, 0);
        }
    }

    pub(crate) fn track_receive(&mut self, bytes: usize) -> Result<()> {
        let now = self.now();
        match self.receive_counter.as_mut() {
            Some(counter) => counter.advance(now, bytes as u64).map_err(|overflow| {
                tracing::warn!(id = %self.socket.id(), speed = overflow.speed, "receive too slow");
                NetworkError::SlowTransfer {
                    direction: Direction::Receive,
                    speed: overflow.speed,
                    duration: overflow.duration,
                }
            }),
            None => Ok(()),
        }
    }

    pub(crate) fn track_send(&mut self, bytes: usize) -> Result<()> {
        let now = self.now();
        match self.send_counter.as_mut() {
            Some(counter) => counter.advance(now, bytes as u64).map_err(|overflow| {
                tracing::warn!(id = %self.socket.id(), speed = overflow.speed, "send too slow");
                NetworkError::SlowTransfer {
                    direction: Direction::Send,
                    speed: overflow.speed,
                    duration: overflow.duration,
                }
            }),
            None => Ok(()),
        }
    }

    pub(crate) fn refill_read_attempts(&mut self) {
        self.read_attempts = self.config.read_attempts;
        self.dry_reads = 0;
    }

    /// Records a read call that found nothing, not even pending data at the
    /// OS level. Every second consecutive one costs an attempt.
    pub(crate) fn dry_read(&mut self) {
        self.dry_reads += 1;
        if self.dry_reads >= 2 {
            self.dry_reads = 0;
            self.read_attempts = self.read_attempts.saturating_sub(1);
        }
    }

    pub(crate) fn read_attempts_left(&self) -> u32 {
        self.read_attempts
    }

    pub(crate) fn refill_write_attempts(&mut self) {
        self.write_attempts = self.config.write_attempts;
    }

    pub(crate) fn spend_write_attempt(&mut self) {
        self.write_attempts = self.write_attempts.saturating_sub(1);
    }

    pub(crate) fn write_attempts_left(&self) -> u32 {
        self.write_attempts
    }

    /// The logical read is over, successfully or not.
    pub(crate) fn finish_read(&mut self) {
        self.refill_read_attempts();
        if let Some(counter) = self.receive_counter.as_mut() {
            counter.reset();
        }
    }

    pub(crate) fn finish_send(&mut self) {
        self.refill_write_attempts();
        if let Some(counter) = self.send_counter.as_mut() {
            counter.reset();
        }
    }

    pub(crate) fn complete(&mut self, picker: &dyn FramePicker) -> Incoming {
        self.finish_read();
        Incoming::Complete(picker.create_frame())
    }

    pub(crate) fn incomplete(&mut self, picker: &dyn FramePicker, reason: &str) -> NetworkError {
        self.finish_read();
        tracing::debug!(id = %self.socket.id(), reason, "frame incomplete");
        NetworkError::FramingIncomplete {
            address: self.address(),
            reason: reason.to_string(),
            partial: picker.create_frame(),
        }
    }

    /// Persistent socket reuse: forget speed history and refill both budgets.
    pub(crate) fn reset_transfer(&mut self) {
        self.finish_read();
        self.finish_send();
    }
}

/// Nothing to read right now, as opposed to a failed read.
pub(crate) fn is_empty_read(err: &io::Error, out_of_band: bool) -> bool {
    // without an urgent byte pending, MSG_OOB reads fail with EINVAL
    err.kind() == io::ErrorKind::WouldBlock
        || (out_of_band && err.kind() == io::ErrorKind::InvalidInput)
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_slots_are_independent() {
        let mut context = Context::new();
        context.store(
            false,
            Leftover {
                data: Bytes::from_static(b"reg"),
                origin: None,
            },
        );
        assert!(context.unhandled(true).is_none());
        context.store(
            true,
            Leftover {
                data: Bytes::from_static(b"!"),
                origin: None,
            },
        );
        assert_eq!(context.take(false).unwrap().data, Bytes::from_static(b"reg"));
        assert!(context.take(false).is_none());
        assert!(context.unhandled(true).is_some());

        context.reset();
        assert!(context.unhandled(true).is_none());
    }

    #[test]
    fn test_store_appends_to_occupied_slot() {
        let mut context = Context::new();
        context.store(
            false,
            Leftover {
                data: Bytes::from_static(b"abc"),
                origin: Some("10.0.0.9:53".to_string()),
            },
        );
        context.store(
            false,
            Leftover {
                data: Bytes::from_static(b"def"),
                origin: None,
            },
        );
        let leftover = context.take(false).unwrap();
        assert_eq!(leftover.data, Bytes::from_static(b"abcdef"));
        assert_eq!(leftover.origin.as_deref(), Some("10.0.0.9:53"));
    }

    #[test]
    fn test_two_dry_reads_cost_one_attempt() {
        let config = IoConfig::builder().read_attempts(2).build();
        let socket = fake::FakeSocket::connected(crate::socket::Transport::Tcp);
        let mut core = ClientCore::new(socket, config, 16);

        core.dry_read();
        assert_eq!(core.read_attempts_left(), 2);
        core.dry_read();
        assert_eq!(core.read_attempts_left(), 1);

        // data in between breaks the streak
        core.dry_read();
        core.refill_read_attempts();
        core.dry_read();
        assert_eq!(core.read_attempts_left(), 2);
        core.dry_read();
        core.dry_read();
        core.dry_read();
        assert_eq!(core.read_attempts_left(), 0);
    }

    #[test]
    fn test_empty_read_classification() {
        let would_block = io::Error::from(io::ErrorKind::WouldBlock);
        let invalid = io::Error::from(io::ErrorKind::InvalidInput);
        assert!(is_empty_read(&would_block, false));
        assert!(is_empty_read(&invalid, true));
        assert!(!is_empty_read(&invalid, false));
    }
}
