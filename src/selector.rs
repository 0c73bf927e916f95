//! One-shot readiness multiplexer.
//!
//! Callers register the operations they want on each socket, call
//! [`AsyncSelector::select`] and get back the sockets that can make progress.
//! Registrations are consumed by a successful select; register again before
//! the next wait.
//!
//! ```text
//!   add_socket_operation(a, Read)  ┐
//!   add_socket_operation(b, Write) ┴─▶ select(1, 0) ─▶ SelectContext { read: [a], write: [b], oob: [] }
//!                                        │
//!                                        ├─ register fds with mio
//!                                        ├─ poll in slices of at most 1s
//!                                        ├─ cross-check with non-consuming peeks
//!                                        └─ deregister fds
//! ```

use mio::{event::Source as _, unix::SourceFd, Events, Interest, Poll, Token};
use std::{
    collections::HashMap,
    io,
    os::unix::io::{AsRawFd, RawFd},
    thread,
    time::{Duration, Instant},
};

use crate::{
    error::{NetworkError, Result},
    socket::{Socket, SocketId},
    sys,
};

const EVENTS_CAPACITY: usize = 1024;
/// Longest single OS wait; long and infinite budgets are cut into slices.
const POLL_SLICE: Duration = Duration::from_secs(1);
const FALSE_POSITIVE_BACKOFF: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Read,
    Write,
}

/// Sockets found ready by a single select.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SelectContext {
    read: Vec<SocketId>,
    write: Vec<SocketId>,
    oob: Vec<SocketId>,
}

impl SelectContext {
    pub fn read(&self) -> &[SocketId] {
        &self.read
    }

    pub fn write(&self) -> &[SocketId] {
        &self.write
    }

    /// Sockets with an urgent byte waiting.
    pub fn oob(&self) -> &[SocketId] {
        &self.oob
    }

    pub fn is_empty(&self) -> bool {
        self.read.is_empty() && self.write.is_empty() && self.oob.is_empty()
    }

    pub fn is_readable(&self, id: SocketId) -> bool {
        self.read.contains(&id)
    }

    pub fn is_writable(&self, id: SocketId) -> bool {
        self.write.contains(&id)
    }

    fn push(set: &mut Vec<SocketId>, id: SocketId) {
        if !set.contains(&id) {
            set.push(id);
        }
    }

    fn sort(&mut self) {
        self.read.sort();
        self.write.sort();
        self.oob.sort();
    }
}

#[derive(Debug, Clone, Copy)]
enum Source {
    Os {
        fd: RawFd,
        listening: bool,
        out_of_band: bool,
    },
    /// Datagram server peer: shares the server descriptor, never polled.
    Peer { pending: bool },
}

#[derive(Debug, Clone, Copy)]
struct Registration {
    source: Source,
    read: bool,
    write: bool,
}

impl Registration {
    fn interest(&self, fd_out_of_band: bool) -> Option<Interest> {
        let mut interest = None;
        if self.read {
            interest = Some(Interest::READABLE);
        }
        if self.write {
            interest = Some(interest.map_or(Interest::WRITABLE, |i| i | Interest::WRITABLE));
        }
        if fd_out_of_band {
            interest = interest.map(with_priority);
        }
        interest
    }
}

#[cfg(any(target_os = "linux", target_os = "android"))]
fn with_priority(interest: Interest) -> Interest {
    interest | Interest::PRIORITY
}

/// Urgent data also flags the descriptor readable here.
#[cfg(not(any(target_os = "linux", target_os = "android")))]
fn with_priority(interest: Interest) -> Interest {
    interest
}

pub struct AsyncSelector {
    poll: Poll,
    events: Events,
    registrations: HashMap<SocketId, Registration>,
}

impl AsyncSelector {
    pub fn new() -> Result<Self> {
        Ok(Self {
            poll: Poll::new()?,
            events: Events::with_capacity(EVENTS_CAPACITY),
            registrations: HashMap::new(),
        })
    }

    pub fn add_socket_operation(&mut self, socket: &Socket, operation: Operation) {
        let source = if socket.is_peer() {
            Source::Peer {
                pending: socket.has_pending_payload(),
            }
        } else {
            Source::Os {
                fd: socket.as_raw_fd(),
                listening: socket.is_listening(),
                out_of_band: socket.transport().supports_out_of_band() && !socket.is_listening(),
            }
        };
        let entry = self.registrations.entry(socket.id()).or_insert(Registration {
            source,
            read: false,
            write: false,
        });
        entry.source = source;
        match operation {
            Operation::Read => entry.read = true,
            Operation::Write => entry.write = true,
        }
        tracing::trace!(id = %socket.id(), ?operation, "operation registered");
    }

    pub fn remove_socket_operation(&mut self, id: SocketId, operation: Operation) {
        if let Some(entry) = self.registrations.get_mut(&id) {
            match operation {
                Operation::Read => entry.read = false,
                Operation::Write => entry.write = false,
            }
            if !entry.read && !entry.write {
                self.registrations.remove(&id);
            }
        }
    }

    pub fn remove_all_socket_operations(&mut self, id: SocketId) {
        self.registrations.remove(&id);
    }

    pub fn has_registrations(&self) -> bool {
        !self.registrations.is_empty()
    }

    /// Forgets every registration.
    pub fn shutdown(&mut self) {
        self.registrations.clear();
        tracing::debug!("selector shut down");
    }

    /// [`select`](Self::select) with a [`Duration`] budget.
    pub fn select_timeout(&mut self, timeout: Duration) -> Result<SelectContext> {
        self.select(Some(timeout.as_secs()), timeout.subsec_micros())
    }

    /// Waits until at least one registered operation can make progress.
    ///
    /// `seconds = None` waits forever. Fails with `NothingToSelect` when
    /// nothing is registered and with `Timeout` once the budget is spent. On
    /// success every registration is cleared; on failure they are kept.
    pub fn select(&mut self, seconds: Option<u64>, micros: u32) -> Result<SelectContext> {
        if self.registrations.is_empty() {
            return Err(NetworkError::NothingToSelect);
        }
        let budget = seconds.map(|s| Duration::from_secs(s) + Duration::from_micros(u64::from(micros)));
        let deadline = budget.map(|b| Instant::now() + b);

        let mut ready = self.peer_readiness();
        let registered = self.register_all()?;
        let outcome = self.wait(&mut ready, deadline);
        self.deregister(&registered);
        outcome.map_err(|err| match err {
            Waited::Timeout => {
                tracing::debug!(budget = ?budget, "select timed out");
                NetworkError::Timeout(budget)
            }
            Waited::Failed(err) => NetworkError::Io(err),
        })?;

        ready.sort();
        self.registrations.clear();
        Ok(ready)
    }

    fn peer_readiness(&self) -> SelectContext {
        let mut ready = SelectContext::default();
        for (id, registration) in &self.registrations {
            if let Source::Peer { pending } = registration.source {
                if registration.read && pending {
                    SelectContext::push(&mut ready.read, *id);
                }
                if registration.write {
                    SelectContext::push(&mut ready.write, *id);
                }
            }
        }
        ready
    }

    fn register_all(&self) -> Result<Vec<RawFd>> {
        let mut registered = Vec::with_capacity(self.registrations.len());
        for (id, registration) in &self.registrations {
            let Source::Os { fd, out_of_band, .. } = registration.source else {
                continue;
            };
            let Some(interest) = registration.interest(out_of_band) else {
                continue;
            };
            let token = Token(id.as_u64() as usize);
            if let Err(err) = SourceFd(&fd).register(self.poll.registry(), token, interest) {
                self.deregister(&registered);
                return Err(err.into());
            }
            registered.push(fd);
        }
        Ok(registered)
    }

    fn deregister(&self, fds: &[RawFd]) {
        for fd in fds {
            if let Err(err) = SourceFd(fd).deregister(self.poll.registry()) {
                tracing::trace!(fd, error = %err, "deregister failed");
            }
        }
    }

    fn wait(&mut self, ready: &mut SelectContext, deadline: Option<Instant>) -> std::result::Result<(), Waited> {
        loop {
            let timeout = if !ready.is_empty() {
                Duration::ZERO
            } else {
                deadline.map_or(POLL_SLICE, |d| {
                    d.saturating_duration_since(Instant::now()).min(POLL_SLICE)
                })
            };
            match self.poll.poll(&mut self.events, Some(timeout)) {
                Ok(()) => {}
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(Waited::Failed(err)),
            }

            let signalled = !self.events.is_empty();
            self.cross_check(ready);
            if !ready.is_empty() {
                return Ok(());
            }

            let remaining = deadline.map(|d| d.saturating_duration_since(Instant::now()));
            if remaining == Some(Duration::ZERO) {
                return Err(Waited::Timeout);
            }
            if signalled {
                tracing::trace!("readiness reported but nothing to do, backing off");
                let pause = remaining.map_or(FALSE_POSITIVE_BACKOFF, |r| r.min(FALSE_POSITIVE_BACKOFF));
                thread::sleep(pause);
            }
        }
    }

    /// Keeps only what a non-consuming peek confirms.
    fn cross_check(&self, ready: &mut SelectContext) {
        for event in self.events.iter() {
            let id = SocketId::new(event.token().0 as u64);
            let Some(registration) = self.registrations.get(&id) else {
                continue;
            };
            let Source::Os {
                fd,
                listening,
                out_of_band,
            } = registration.source
            else {
                continue;
            };

            let failed = event.is_error();
            if registration.read
                && (event.is_readable() || event.is_read_closed() || failed)
                && (listening || read_confirmed(fd))
            {
                SelectContext::push(&mut ready.read, id);
            }
            if registration.write && (event.is_writable() || event.is_write_closed() || failed) {
                SelectContext::push(&mut ready.write, id);
            }
            if out_of_band && matches!(sys::peek_fd(fd, true), Ok(1)) {
                SelectContext::push(&mut ready.oob, id);
            }
        }
    }
}

impl std::fmt::Debug for AsyncSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncSelector")
            .field("registrations", &self.registrations)
            .finish()
    }
}

enum Waited {
    Timeout,
    Failed(io::Error),
}

/// Readable with data, at end of stream or with a pending error all count;
/// only "would block" is a false positive.
fn read_confirmed(fd: RawFd) -> bool {
    match sys::peek_fd(fd, false) {
        Ok(_) => true,
        Err(err) => err.kind() != io::ErrorKind::WouldBlock,
    }
}
