//! Network Module
//!
//! TCP connection to the store and readiness multiplexing.
//!
//! ## Architecture
//! - One non-blocking connection per client
//! - One selector per connection, owned by whichever thread drives it
//!   (the connecting thread during the handshake, the I/O thread after)
//! - A wake channel lets caller threads interrupt the selector

mod connection;
mod selector;

pub use connection::{Connection, CONNECTION_TOKEN};
pub use selector::{Interest, Selected, Selector, WakeHandle, WAKE_TOKEN};
