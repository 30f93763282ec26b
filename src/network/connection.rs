//! Connection Handler
//!
//! Owns the TCP stream to the store, its selector, and the request id
//! counter. Reads and writes are non-blocking underneath; the blocking
//! `send` / `receive` calls park in the selector between attempts so the
//! running flag and timeouts are checked at every poll interval.

use std::io::{self, Read, Write};
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::{Buf, BytesMut};
use mio::net::TcpStream;
use mio::Token;

use super::selector::{Interest, Selected, Selector, WakeHandle};
use crate::config::{ClientConfig, DEFAULT_PORT};
use crate::error::{ClientError, Result};
use crate::protocol::{decode_header, Message, HEADER_SIZE};

/// Selector token of the store connection
pub const CONNECTION_TOKEN: Token = Token(0);

/// Bytes pulled from the socket per read call
const READ_CHUNK: usize = 8 * 1024;

/// A live connection to the store
pub struct Connection {
    /// Non-blocking TCP stream
    stream: TcpStream,

    /// Readiness selector the stream is registered with
    selector: Selector,

    /// Received bytes not yet framed into messages
    inbound: BytesMut,

    /// Bytes of an oversized message still to be skipped
    discard: usize,

    /// Peer closed its side; buffered messages may still be read
    peer_closed: bool,

    /// Cleared to abort blocked sends and receives
    running: Arc<AtomicBool>,

    next_request_id: u32,
    max_message_size: usize,
    poll_interval: Duration,

    /// Peer address for logging
    peer_addr: String,
}

impl Connection {
    /// Resolve `address` and connect to the first reachable candidate.
    ///
    /// An address without a port uses [`DEFAULT_PORT`].
    pub fn open(address: &str, config: &ClientConfig) -> Result<Self> {
        let candidates = resolve(address)?;

        let mut last_error = None;
        for addr in candidates {
            match Self::connect_to(addr, config) {
                Ok(connection) => return Ok(connection),
                Err(e) => {
                    tracing::debug!("Could not connect to {}: {}", addr, e);
                    last_error = Some(e);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| ClientError::Resolve {
            address: address.to_string(),
            reason: "no addresses found".to_string(),
        }))
    }

    /// Non-blocking connect, completed through the selector's CONNECT interest
    fn connect_to(addr: SocketAddr, config: &ClientConfig) -> Result<Self> {
        let mut selector = Selector::new()?;
        let mut stream = TcpStream::connect(addr)?;
        selector.register(&mut stream, CONNECTION_TOKEN, Interest::CONNECT)?;

        let deadline = config.connect_timeout.map(|t| Instant::now() + t);
        loop {
            let wait = next_wait(config.poll_interval, deadline)
                .ok_or_else(|| ClientError::Timeout(format!("connecting to {}", addr)))?;

            match selector.wait(Some(wait))? {
                Selected::Ready(CONNECTION_TOKEN, ready) if ready.contains(Interest::CONNECT) => {
                    if let Some(e) = stream.take_error()? {
                        return Err(e.into());
                    }
                    match stream.peer_addr() {
                        Ok(_) => break,
                        Err(e) if e.kind() == io::ErrorKind::NotConnected => continue,
                        Err(e) => return Err(e.into()),
                    }
                }
                _ => continue,
            }
        }

        stream.set_nodelay(config.nodelay)?;
        selector.register(&mut stream, CONNECTION_TOKEN, Interest::READ)?;
        tracing::debug!("Connected to {}", addr);

        Ok(Self {
            stream,
            selector,
            inbound: BytesMut::with_capacity(READ_CHUNK),
            discard: 0,
            peer_closed: false,
            running: Arc::new(AtomicBool::new(true)),
            next_request_id: 1,
            max_message_size: config.max_message_size,
            poll_interval: config.poll_interval,
            peer_addr: addr.to_string(),
        })
    }

    /// Allocate the next request id. Ids wrap after `u32::MAX` requests.
    pub fn next_request_id(&mut self) -> u32 {
        let id = self.next_request_id;
        self.next_request_id = self.next_request_id.wrapping_add(1);
        id
    }

    /// Flag that keeps blocking calls alive; clearing it cancels them
    pub fn running_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Clear the running flag
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }

    pub fn wake_handle(&self) -> WakeHandle {
        self.selector.wake_handle()
    }

    pub fn peer_addr(&self) -> &str {
        &self.peer_addr
    }

    /// Wait once on the selector; used by the idle loop of the I/O thread
    pub fn wait(&mut self, timeout: Duration) -> Result<Selected> {
        Ok(self.selector.wait(Some(timeout))?)
    }

    // =========================================================================
    // Sending
    // =========================================================================

    /// Write a whole message.
    ///
    /// Waits for writability when the socket buffer is full. A write that
    /// makes no progress is a transport error.
    pub fn send(&mut self, message: &[u8]) -> Result<()> {
        if message.len() > self.max_message_size {
            return Err(ClientError::MessageTooLarge {
                size: message.len(),
                max: self.max_message_size,
            });
        }

        let mut written = 0;
        let result = loop {
            if written == message.len() {
                break Ok(());
            }
            match self.stream.write(&message[written..]) {
                Ok(0) => break Err(io::Error::from(io::ErrorKind::WriteZero).into()),
                Ok(n) => written += n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    if let Err(e) = self.await_ready(Interest::WRITE, None) {
                        break Err(e);
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => break Err(e.into()),
            }
        };

        if self.selector.interest(CONNECTION_TOKEN) != Some(Interest::READ) {
            self.selector
                .register(&mut self.stream, CONNECTION_TOKEN, Interest::READ)?;
        }
        tracing::trace!("Sent {} bytes to {}", written, self.peer_addr);
        result
    }

    // =========================================================================
    // Receiving
    // =========================================================================

    /// Block until one complete message is available.
    ///
    /// `timeout` bounds the wait for this message; `None` waits until the
    /// message arrives, the peer closes, or the connection is cancelled.
    pub fn receive(&mut self, timeout: Option<Duration>) -> Result<Message> {
        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            if let Some(message) = self.try_receive()? {
                return Ok(message);
            }
            if self.peer_closed {
                return Err(ClientError::ConnectionClosed);
            }
            self.await_ready(Interest::READ, deadline)?;
        }
    }

    /// Read whatever the socket holds and return one buffered message, if any.
    ///
    /// Never blocks. Sets `peer_closed` on end of stream but still hands out
    /// messages received before it.
    pub fn try_receive(&mut self) -> Result<Option<Message>> {
        if let Some(message) = self.take_message()? {
            return Ok(Some(message));
        }
        if !self.peer_closed {
            self.fill()?;
        }
        self.take_message()
    }

    /// Peer sent end of stream. Messages already buffered stay readable.
    pub fn is_peer_closed(&self) -> bool {
        self.peer_closed
    }

    /// Drain the socket into `inbound` until it would block
    fn fill(&mut self) -> Result<()> {
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            match self.stream.read(&mut chunk) {
                Ok(0) => {
                    tracing::debug!("Peer {} closed the connection", self.peer_addr);
                    self.peer_closed = true;
                    return Ok(());
                }
                Ok(n) => self.absorb(&chunk[..n]),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn absorb(&mut self, mut bytes: &[u8]) {
        if self.discard > 0 {
            let skip = self.discard.min(bytes.len());
            self.discard -= skip;
            bytes = &bytes[skip..];
        }
        self.inbound.extend_from_slice(bytes);
    }

    /// Split one complete message off the front of `inbound`
    fn take_message(&mut self) -> Result<Option<Message>> {
        if self.inbound.len() < HEADER_SIZE {
            return Ok(None);
        }

        let header = match decode_header(&self.inbound) {
            Ok(header) => header,
            Err(e) => {
                // Frame boundaries are lost; drop what we have and resync on fresh data.
                self.inbound.clear();
                return Err(e);
            }
        };

        let size = header.size as usize;
        if size > self.max_message_size {
            if self.inbound.len() >= size {
                self.inbound.advance(size);
            } else {
                self.discard = size - self.inbound.len();
                self.inbound.clear();
            }
            return Err(ClientError::MessageTooLarge {
                size,
                max: self.max_message_size,
            });
        }

        if self.inbound.len() < size {
            return Ok(None);
        }

        let bytes = self.inbound.split_to(size).freeze();
        tracing::trace!(
            "Received message type {} ({} bytes, request {}) from {}",
            header.message_type,
            size,
            header.request_id,
            self.peer_addr
        );
        Ok(Some(Message::new(header, bytes)))
    }

    /// Park in the selector until the connection is ready for `interest`.
    ///
    /// Wake signals are consumed here; the I/O loop checks the queue itself
    /// before it blocks again.
    fn await_ready(&mut self, interest: Interest, deadline: Option<Instant>) -> Result<()> {
        if interest.contains(Interest::WRITE) {
            self.selector
                .register(&mut self.stream, CONNECTION_TOKEN, Interest::READ | Interest::WRITE)?;
        }

        loop {
            if !self.is_running() {
                return Err(ClientError::Cancelled);
            }
            let wait = next_wait(self.poll_interval, deadline)
                .ok_or_else(|| ClientError::Timeout("waiting for response".to_string()))?;

            match self.selector.wait(Some(wait))? {
                Selected::Ready(CONNECTION_TOKEN, ready) if ready.intersects(interest) => return Ok(()),
                _ => continue,
            }
        }
    }
}

/// Resolve `host[:port]`, defaulting the port
fn resolve(address: &str) -> Result<Vec<SocketAddr>> {
    let resolved = match address.to_socket_addrs() {
        Ok(addrs) => addrs,
        Err(_) if !address.contains(':') => (address, DEFAULT_PORT).to_socket_addrs().map_err(|e| {
            ClientError::Resolve {
                address: address.to_string(),
                reason: e.to_string(),
            }
        })?,
        Err(e) => {
            return Err(ClientError::Resolve {
                address: address.to_string(),
                reason: e.to_string(),
            })
        }
    };

    let addrs: Vec<SocketAddr> = resolved.collect();
    if addrs.is_empty() {
        return Err(ClientError::Resolve {
            address: address.to_string(),
            reason: "no addresses found".to_string(),
        });
    }
    Ok(addrs)
}

/// Next selector timeout: the poll interval, clipped to the deadline.
/// None once the deadline has passed.
fn next_wait(poll_interval: Duration, deadline: Option<Instant>) -> Option<Duration> {
    match deadline {
        None => Some(poll_interval),
        Some(deadline) => {
            let now = Instant::now();
            if now >= deadline {
                None
            } else {
                Some(poll_interval.min(deadline - now))
            }
        }
    }
}
