//! # zlimdb client
//!
//! Client engine for the zlimdb table store:
//! - Framed little-endian binary protocol with fragmented, LZ4-compressed pages
//! - Salted HMAC-SHA-256 challenge-response login
//! - One background I/O thread per connection, fed by a FIFO action queue
//! - Bounds-checked, zero-copy views over received entities
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 Caller Threads (any number)                  │
//! │        Client::add / query / subscribe / sync ...            │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │ enqueue + wake
//! ┌─────────────────────▼───────────────────────────────────────┐
//! │                     Action Queue                             │
//! │               (Mutex<VecDeque> + Waker)                      │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │ drain
//! ┌─────────────────────▼───────────────────────────────────────┐
//! │                  Engine (I/O thread)                         │
//! │      request ─► response pages ─► EventHandler               │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//!          ┌────────────┴────────────┐
//!          ▼                         ▼
//!   ┌─────────────┐          ┌─────────────┐
//!   │ Connection  │          │  Selector   │
//!   │  (framing)  │          │   (mio)     │
//!   └─────────────┘          └─────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod protocol;
pub mod network;
pub mod auth;
pub mod action;
pub mod handler;
mod engine;
pub mod client;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{ClientError, Result, ServerError};
pub use config::{ClientConfig, ClientConfigBuilder, DEFAULT_ADDRESS, DEFAULT_PORT};
pub use client::Client;
pub use handler::{EventHandler, LogHandler};
pub use protocol::{EntityView, Message, QueryKind, TableView};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of the client
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
