//! Readiness Selector
//!
//! Blocks the I/O thread until a registered handle becomes ready, the wake
//! channel fires, or a timeout elapses.
//!
//! ## Backends
//! The native mechanism is chosen at build time by `mio`: epoll on Linux,
//! kqueue on the BSDs and macOS, IOCP-backed AFD polling on Windows. Every
//! backend is driven through the same `register` / `unregister` / `wait`
//! contract below.
//!
//! ## Readiness Delivery
//! One `wait` reports one ready handle. All readiness the OS returned from a
//! single poll is cached and handed out by the following calls before the
//! selector blocks again, so no reported handle is skipped.

use std::collections::{HashMap, VecDeque};
use std::io;
use std::ops::{BitAnd, BitOr, BitOrAssign};
use std::sync::Arc;
use std::time::Duration;

use mio::event::{Event, Source};
use mio::{Events, Poll, Token, Waker};

/// Token reserved for the wake channel
pub const WAKE_TOKEN: Token = Token(usize::MAX);

/// Events fetched from the OS per poll
const EVENT_CAPACITY: usize = 64;

/// Interest / readiness mask
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct Interest(u8);

impl Interest {
    pub const NONE: Interest = Interest(0);
    pub const READ: Interest = Interest(0x01);
    pub const WRITE: Interest = Interest(0x02);
    pub const ACCEPT: Interest = Interest(0x04);
    pub const CONNECT: Interest = Interest(0x08);

    pub fn bits(self) -> u8 {
        self.0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn contains(self, other: Interest) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn intersects(self, other: Interest) -> bool {
        self.0 & other.0 != 0
    }

    /// ACCEPT rides on readability, CONNECT on writability
    fn to_mio(self) -> Option<mio::Interest> {
        let read = self.intersects(Interest::READ | Interest::ACCEPT);
        let write = self.intersects(Interest::WRITE | Interest::CONNECT);
        match (read, write) {
            (true, true) => Some(mio::Interest::READABLE | mio::Interest::WRITABLE),
            (true, false) => Some(mio::Interest::READABLE),
            (false, true) => Some(mio::Interest::WRITABLE),
            (false, false) => None,
        }
    }

    /// Translate an OS event into the subset of `registered` it satisfies.
    ///
    /// Hang-ups and errors wake readers; if nobody reads, they wake writers
    /// and pending connects so the failure surfaces on the next I/O call.
    fn from_event(event: &Event, registered: Interest) -> Interest {
        let closed = event.is_read_closed() || event.is_write_closed() || event.is_error();

        let mut ready = Interest::NONE;
        if event.is_readable() || closed {
            ready |= registered & (Interest::READ | Interest::ACCEPT);
        }
        if event.is_writable() || (ready.is_empty() && closed) {
            ready |= registered & (Interest::WRITE | Interest::CONNECT);
        }
        ready
    }
}

impl BitOr for Interest {
    type Output = Interest;

    fn bitor(self, rhs: Interest) -> Interest {
        Interest(self.0 | rhs.0)
    }
}

impl BitOrAssign for Interest {
    fn bitor_assign(&mut self, rhs: Interest) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for Interest {
    type Output = Interest;

    fn bitand(self, rhs: Interest) -> Interest {
        Interest(self.0 & rhs.0)
    }
}

/// Outcome of a single `wait`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selected {
    /// A registered handle is ready for (part of) its interest
    Ready(Token, Interest),
    /// Another thread signalled the wake channel
    Woken,
    TimedOut,
}

/// Cross-thread wake signal for a blocked `wait`.
///
/// Signals coalesce: several `wake` calls before the selector runs produce
/// a single `Selected::Woken`.
#[derive(Debug, Clone)]
pub struct WakeHandle {
    waker: Arc<Waker>,
}

impl WakeHandle {
    pub fn wake(&self) -> io::Result<()> {
        self.waker.wake()
    }
}

/// Portable readiness multiplexer
pub struct Selector {
    poll: Poll,
    events: Events,
    interests: HashMap<Token, Interest>,
    pending: VecDeque<Selected>,
    waker: Arc<Waker>,
}

impl Selector {
    pub fn new() -> io::Result<Self> {
        let poll = Poll::new()?;
        let waker = Arc::new(Waker::new(poll.registry(), WAKE_TOKEN)?);
        Ok(Self {
            poll,
            events: Events::with_capacity(EVENT_CAPACITY),
            interests: HashMap::new(),
            pending: VecDeque::new(),
            waker,
        })
    }

    /// Handle other threads use to interrupt `wait`
    pub fn wake_handle(&self) -> WakeHandle {
        WakeHandle {
            waker: Arc::clone(&self.waker),
        }
    }

    /// Register `source`, or update its interest if already registered.
    ///
    /// Re-registering with an unchanged interest is a no-op, and so is
    /// registering a closed or invalid handle (any interest tracked for the
    /// token is dropped). Cached readiness for the handle is narrowed to the
    /// new interest.
    pub fn register<S>(&mut self, source: &mut S, token: Token, interest: Interest) -> io::Result<()>
    where
        S: Source + ?Sized,
    {
        if token == WAKE_TOKEN {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "token is reserved for the wake channel",
            ));
        }
        let mio_interest = interest.to_mio().ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "empty interest")
        })?;

        let registered = match self.interests.get(&token) {
            Some(current) if *current == interest => return Ok(()),
            Some(_) => self.poll.registry().reregister(source, token, mio_interest),
            None => self.poll.registry().register(source, token, mio_interest),
        };
        match registered {
            Ok(()) => {}
            Err(e) if is_invalid_handle(&e) => {
                tracing::debug!("Ignoring registration of invalid handle {:?}: {}", token, e);
                self.forget(token);
                return Ok(());
            }
            Err(e) => return Err(e),
        }
        self.interests.insert(token, interest);

        self.pending.retain_mut(|selected| match selected {
            Selected::Ready(t, ready) if *t == token => {
                *ready = *ready & interest;
                !ready.is_empty()
            }
            _ => true,
        });
        Ok(())
    }

    /// Remove `source` and forget any readiness cached for it.
    /// Unknown tokens are ignored.
    pub fn unregister<S>(&mut self, source: &mut S, token: Token) -> io::Result<()>
    where
        S: Source + ?Sized,
    {
        if self.interests.remove(&token).is_none() {
            return Ok(());
        }
        self.forget(token);
        self.poll.registry().deregister(source)
    }

    /// Drop the tracked interest and cached readiness of `token`
    fn forget(&mut self, token: Token) {
        self.interests.remove(&token);
        self.pending
            .retain(|selected| !matches!(selected, Selected::Ready(t, _) if *t == token));
    }

    /// Current interest for `token`, if registered
    pub fn interest(&self, token: Token) -> Option<Interest> {
        self.interests.get(&token).copied()
    }

    /// Wait for readiness.
    ///
    /// Returns cached readiness first; otherwise polls the OS once, caching
    /// everything it reports. A signal interrupting the poll counts as a
    /// timeout.
    pub fn wait(&mut self, timeout: Option<Duration>) -> io::Result<Selected> {
        if let Some(selected) = self.pending.pop_front() {
            return Ok(selected);
        }

        match self.poll.poll(&mut self.events, timeout) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::Interrupted => return Ok(Selected::TimedOut),
            Err(e) => return Err(e),
        }

        let mut woken = false;
        for event in self.events.iter() {
            let token = event.token();
            if token == WAKE_TOKEN {
                woken = true;
                continue;
            }
            let Some(registered) = self.interests.get(&token).copied() else {
                continue;
            };
            let ready = Interest::from_event(event, registered);
            if !ready.is_empty() {
                self.pending.push_back(Selected::Ready(token, ready));
            }
        }
        if woken {
            self.pending.push_front(Selected::Woken);
        }

        Ok(self.pending.pop_front().unwrap_or(Selected::TimedOut))
    }
}

/// OS error codes for a handle that is closed or was never open
#[cfg(unix)]
const INVALID_HANDLE_CODES: &[i32] = &[9]; // EBADF
#[cfg(windows)]
const INVALID_HANDLE_CODES: &[i32] = &[6, 10038]; // ERROR_INVALID_HANDLE, WSAENOTSOCK
#[cfg(not(any(unix, windows)))]
const INVALID_HANDLE_CODES: &[i32] = &[];

fn is_invalid_handle(error: &io::Error) -> bool {
    error
        .raw_os_error()
        .map_or(false, |code| INVALID_HANDLE_CODES.contains(&code))
}
