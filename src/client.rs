//! Client Facade
//!
//! The public entry point. [`Client::connect`] opens the connection, runs
//! the login handshake on the calling thread, then hands the connection to
//! a background I/O thread. Every operation afterwards only enqueues an
//! [`Action`] and returns; results arrive through the [`EventHandler`].
//!
//! ## Example
//! ```no_run
//! use zlimdb_client::{Client, ClientConfig};
//!
//! let mut client = Client::new(ClientConfig::default());
//! client.connect("root", "root", "127.0.0.1:13211")?;
//! client.select_table(4)?;
//! client.add(b"hello")?;
//! client.sync()?;
//! client.disconnect();
//! # Ok::<(), zlimdb_client::ClientError>(())
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{self, RecvTimeoutError};

use crate::action::{Action, ActionQueue};
use crate::auth::Handshake;
use crate::config::ClientConfig;
use crate::engine::{Engine, SharedState};
use crate::error::{ClientError, Result};
use crate::handler::{EventHandler, LogHandler};
use crate::network::Connection;
use crate::protocol::{QueryKind, ENTITY_HEADER_SIZE, HEADER_SIZE, TABLE_HEADER_SIZE};

/// Bytes in front of the entity in add and update requests (the table id)
const TABLE_ID_SIZE: usize = 4;

/// A running I/O thread and the handles to reach it
struct Session {
    queue: Arc<ActionQueue>,
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

/// Client for one store connection
///
/// ## Thread Safety
///
/// All enqueueing operations take `&self` and may be called from any number
/// of threads (share the client behind an `Arc` or a scoped borrow).
/// Actions from one thread execute in the order that thread issued them.
/// `connect` and `disconnect` take `&mut self`.
pub struct Client {
    config: ClientConfig,
    handler: Arc<dyn EventHandler>,
    shared: Arc<SharedState>,
    session: Option<Session>,
}

impl Client {
    /// Create a disconnected client that only logs results
    pub fn new(config: ClientConfig) -> Self {
        Self::with_handler(config, Arc::new(LogHandler))
    }

    /// Create a disconnected client reporting to `handler`
    pub fn with_handler(config: ClientConfig, handler: Arc<dyn EventHandler>) -> Self {
        Self {
            config,
            handler,
            shared: Arc::new(SharedState::default()),
            session: None,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    // =========================================================================
    // Connection Lifecycle
    // =========================================================================

    /// Connect and log in, then start the I/O thread.
    ///
    /// An existing connection is closed first. On failure the error is also
    /// recorded as the last error and no I/O thread is left running.
    pub fn connect(&mut self, user: &str, password: &str, address: &str) -> Result<()> {
        self.disconnect();

        match self.establish(user, password, address) {
            Ok(session) => {
                self.shared.last_error.lock().clear();
                self.session = Some(session);
                tracing::info!("Connected to {} as {}", address, user);
                Ok(())
            }
            Err(e) => {
                tracing::debug!("Connecting to {} failed: {}", address, e);
                *self.shared.last_error.lock() = e.to_string();
                Err(e)
            }
        }
    }

    fn establish(&self, user: &str, password: &str, address: &str) -> Result<Session> {
        // Dropping the connection on any error below closes the socket
        let mut connection = Connection::open(address, &self.config)?;
        Handshake::new(user, password)
            .with_timeout(self.config.connect_timeout)
            .run(&mut connection)?;

        self.shared.selected_table.store(0, Ordering::Release);
        let queue = Arc::new(ActionQueue::new(connection.wake_handle()));
        let running = connection.running_flag();

        let engine = Engine::new(
            connection,
            Arc::clone(&queue),
            Arc::clone(&self.handler),
            Arc::clone(&self.shared),
            &self.config,
        );
        let thread = thread::Builder::new()
            .name(self.config.thread_name.clone())
            .spawn(move || engine.run())?;

        Ok(Session {
            queue,
            running,
            thread: Some(thread),
        })
    }

    /// Stop the I/O thread and close the connection.
    ///
    /// Idempotent, and a no-op on a client that never connected. Pending
    /// actions are dropped. Returns within a few poll intervals unless a
    /// handler callback is blocking the I/O thread.
    pub fn disconnect(&mut self) {
        let Some(mut session) = self.session.take() else {
            return;
        };

        session.running.store(false, Ordering::Release);
        if let Err(e) = session.queue.wake() {
            tracing::debug!("Could not wake the I/O thread: {}", e);
        }
        if let Some(thread) = session.thread.take() {
            if thread.join().is_err() {
                tracing::error!("I/O thread panicked");
            }
        }
        session.queue.close();
        self.shared.selected_table.store(0, Ordering::Release);
        tracing::info!("Disconnected");
    }

    /// True while the I/O thread is serving the connection
    pub fn is_connected(&self) -> bool {
        self.session
            .as_ref()
            .map(|s| s.running.load(Ordering::Acquire) && !s.queue.is_closed())
            .unwrap_or(false)
    }

    /// Description of the most recent failure, empty if none
    pub fn last_error(&self) -> String {
        self.shared.last_error.lock().clone()
    }

    /// Table targeted by record operations. Best effort: a select still in
    /// the queue is not reflected yet.
    pub fn selected_table(&self) -> u32 {
        self.shared.selected_table.load(Ordering::Acquire)
    }

    // =========================================================================
    // Operations
    // =========================================================================

    /// List all tables; each row goes to `on_table`
    pub fn list_tables(&self) -> Result<()> {
        self.enqueue(Action::ListTables)
    }

    pub fn create_table(&self, name: &str) -> Result<()> {
        self.check_entity("table name", TABLE_HEADER_SIZE + name.len())?;
        self.enqueue(Action::CreateTable {
            name: name.to_string(),
        })
    }

    pub fn select_table(&self, table_id: u32) -> Result<()> {
        self.enqueue(Action::SelectTable { table_id })
    }

    /// Query every record of the selected table
    pub fn query(&self) -> Result<()> {
        self.enqueue(Action::Query { kind: QueryKind::All })
    }

    /// Query records with an id greater than `id`
    pub fn query_since(&self, id: u64) -> Result<()> {
        self.enqueue(Action::Query {
            kind: QueryKind::SinceId(id),
        })
    }

    /// Query records with a timestamp greater than `time`
    pub fn query_since_time(&self, time: u64) -> Result<()> {
        self.enqueue(Action::Query {
            kind: QueryKind::SinceTime(time),
        })
    }

    pub fn query_by_id(&self, id: u64) -> Result<()> {
        self.enqueue(Action::Query {
            kind: QueryKind::ById(id),
        })
    }

    /// Add a record to the selected table; the store assigns id and time
    pub fn add(&self, value: &[u8]) -> Result<()> {
        self.check_entity("value", ENTITY_HEADER_SIZE + value.len())?;
        self.enqueue(Action::Add {
            value: value.to_vec(),
        })
    }

    pub fn update(&self, record_id: u64, value: &[u8]) -> Result<()> {
        self.check_entity("value", ENTITY_HEADER_SIZE + value.len())?;
        self.enqueue(Action::Update {
            record_id,
            value: value.to_vec(),
        })
    }

    pub fn remove(&self, record_id: u64) -> Result<()> {
        self.enqueue(Action::Remove { record_id })
    }

    /// Load the selected table, then keep receiving records written to it
    pub fn subscribe(&self) -> Result<()> {
        self.enqueue(Action::Subscribe { kind: QueryKind::All })
    }

    pub fn unsubscribe(&self) -> Result<()> {
        self.enqueue(Action::Unsubscribe)
    }

    /// Ask the I/O thread to stop once it reaches this point in the queue
    pub fn quit(&self) -> Result<()> {
        self.enqueue(Action::Quit)
    }

    /// Block until every action enqueued before this call has executed.
    ///
    /// Must not be called from an `EventHandler` callback: the I/O thread
    /// would wait on itself.
    pub fn sync(&self) -> Result<()> {
        let (done, finished) = channel::bounded(1);
        self.enqueue(Action::Sync { done })?;
        finished.recv().map_err(|_| ClientError::NotConnected)
    }

    /// Like [`sync`](Self::sync), giving up after `timeout`
    pub fn sync_timeout(&self, timeout: Duration) -> Result<()> {
        let (done, finished) = channel::bounded(1);
        self.enqueue(Action::Sync { done })?;
        finished.recv_timeout(timeout).map_err(|e| match e {
            RecvTimeoutError::Timeout => ClientError::Timeout("waiting for sync".to_string()),
            RecvTimeoutError::Disconnected => ClientError::NotConnected,
        })
    }

    fn enqueue(&self, action: Action) -> Result<()> {
        let session = self.session.as_ref().ok_or(ClientError::NotConnected)?;
        tracing::trace!("Enqueueing {}", action.name());
        session.queue.enqueue(action)
    }

    /// Reject an entity whose size overflows its u16 length field or whose
    /// request would exceed the message size limit
    fn check_entity(&self, what: &str, entity_size: usize) -> Result<()> {
        let request_size = HEADER_SIZE + TABLE_ID_SIZE + entity_size;
        if entity_size > u16::MAX as usize || request_size > self.config.max_message_size {
            return Err(ClientError::InvalidArgument(format!(
                "{} too large: {} byte entity",
                what, entity_size
            )));
        }
        Ok(())
    }
}

impl Default for Client {
    fn default() -> Self {
        Self::new(ClientConfig::default())
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.disconnect();
    }
}
