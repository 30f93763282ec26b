//! Login Handshake
//!
//! Runs once per connection, before the I/O thread starts:
//!
//! ```text
//! Connecting ──► LoggingIn ──► Authenticating ──► Ready
//!     │              │               │
//!     └──────────────┴───────────────┴──► failed (connection dropped by caller)
//! ```
//!
//! The store answers the login request with two salts. The client proves
//! knowledge of the password with
//! `HMAC(auth_salt, HMAC(pw_salt, password))`; the password itself never
//! crosses the wire.

use std::time::Duration;

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::{ClientError, Result};
use crate::network::Connection;
use crate::protocol::{
    decode_error_response, decode_login_response, encode_auth_request, encode_login_request,
    expect_body, LoginSalts, Message, MessageType, SIGNATURE_SIZE,
};

type HmacSha256 = Hmac<Sha256>;

/// HMAC-SHA-256 of `data` keyed with `key`
pub fn hmac_sha256(key: &[u8], data: &[u8]) -> Result<[u8; 32]> {
    let mut mac = HmacSha256::new_from_slice(key).map_err(|e| ClientError::Auth(e.to_string()))?;
    mac.update(data);
    let mut digest = [0u8; 32];
    digest.copy_from_slice(&mac.finalize().into_bytes());
    Ok(digest)
}

/// Signature sent in the auth request
pub fn sign(salts: &LoginSalts, password: &[u8]) -> Result<[u8; SIGNATURE_SIZE]> {
    let pw_hash = hmac_sha256(&salts.pw_salt, password)?;
    hmac_sha256(&salts.auth_salt, &pw_hash)
}

/// Handshake progress
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    Connecting,
    LoggingIn,
    Authenticating,
    Ready,
}

/// Drives the login/auth exchange over a freshly opened connection
pub struct Handshake<'a> {
    user: &'a str,
    password: &'a str,
    state: HandshakeState,
    /// Bound on each reply (None = wait until the peer answers or closes)
    timeout: Option<Duration>,
}

impl<'a> Handshake<'a> {
    pub fn new(user: &'a str, password: &'a str) -> Self {
        Self {
            user,
            password,
            state: HandshakeState::Connecting,
            timeout: None,
        }
    }

    /// Bound the wait for each reply
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn state(&self) -> HandshakeState {
        self.state
    }

    /// Run the exchange to completion. Never retries.
    pub fn run(&mut self, connection: &mut Connection) -> Result<()> {
        self.advance(HandshakeState::LoggingIn);
        let request_id = connection.next_request_id();
        connection.send(&encode_login_request(request_id, self.user)?)?;
        let response = receive_reply(connection, request_id, self.timeout)?;
        let salts = decode_login_response(&response)?;

        self.advance(HandshakeState::Authenticating);
        let signature = sign(&salts, self.password.as_bytes())?;
        let request_id = connection.next_request_id();
        connection.send(&encode_auth_request(request_id, &signature)?)?;
        let response = receive_reply(connection, request_id, self.timeout)?;
        expect_body(&response, MessageType::AuthResponse, 0, "auth")?;

        self.advance(HandshakeState::Ready);
        Ok(())
    }

    fn advance(&mut self, next: HandshakeState) {
        tracing::debug!("Handshake {:?} -> {:?}", self.state, next);
        self.state = next;
    }
}

/// Wait for the reply to `request_id`; nothing else is expected before login completes
fn receive_reply(connection: &mut Connection, request_id: u32, timeout: Option<Duration>) -> Result<Message> {
    loop {
        let message = connection.receive(timeout)?;
        if message.header().request_id != request_id {
            tracing::warn!(
                "Dropping message for request {} during handshake",
                message.header().request_id
            );
            continue;
        }
        if message.header().is(MessageType::ErrorResponse) {
            return Err(decode_error_response(&message)?.into());
        }
        return Ok(message);
    }
}
