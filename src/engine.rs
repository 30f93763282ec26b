//! Engine Module
//!
//! The request/response engine that runs on the background I/O thread.
//!
//! ## Responsibilities
//! - Drain the action queue and execute each action as one transaction
//! - Correlate responses with requests by request id
//! - Reassemble fragmented (and decompress compressed) response pages
//! - Route subscription pushes and unsolicited messages
//! - Record failures as the client's last error
//!
//! ## Loop
//! ```text
//!   ┌────────────────────────────────────────────┐
//!   │ drain queue ─► execute actions one by one  │
//!   │ wait on selector (poll interval)           │
//!   │ read unsolicited messages ─► handler       │
//!   └───────────────┬────────────────────────────┘
//!                   └─ until stopped or the connection fails
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use parking_lot::Mutex;

use crate::action::{Action, ActionQueue};
use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use crate::handler::EventHandler;
use crate::network::{Connection, Selected};
use crate::protocol::{
    decode_add_response, decode_error_response, encode_add_request, encode_entity,
    encode_query_request, encode_remove_request, encode_subscribe_request, encode_table_entity,
    encode_unsubscribe_request, encode_update_request, expect_body, iter_entities, page_payload,
    Message, MessageType, QueryKind, TableView, WellKnownTable, ENTITY_HEADER_SIZE,
    TABLE_HEADER_SIZE,
};

/// State read by caller threads and written by the I/O thread
#[derive(Debug, Default)]
pub(crate) struct SharedState {
    /// Description of the most recent failure; empty when none
    pub last_error: Mutex<String>,

    /// Target table of record operations (0 until selected)
    pub selected_table: AtomicU32,
}

/// Executes queued actions over a single connection
///
/// ## Concurrency Model: Single Consumer
///
/// - Caller threads only touch the `ActionQueue` and `SharedState`
/// - The engine owns the connection outright; exactly one transaction is
///   on the wire at any time, so a response can only belong to the
///   request just sent, a subscription, or nobody
pub struct Engine {
    connection: Connection,
    queue: Arc<ActionQueue>,
    handler: Arc<dyn EventHandler>,
    shared: Arc<SharedState>,

    /// Open subscriptions: request id -> table id
    subscriptions: HashMap<u32, u32>,

    /// Request whose remaining pages are dropped after a failed page
    abandoned: Option<u32>,

    request_timeout: Option<Duration>,
    poll_interval: Duration,
}

impl Engine {
    pub(crate) fn new(
        connection: Connection,
        queue: Arc<ActionQueue>,
        handler: Arc<dyn EventHandler>,
        shared: Arc<SharedState>,
        config: &ClientConfig,
    ) -> Self {
        Self {
            connection,
            queue,
            handler,
            shared,
            subscriptions: HashMap::new(),
            abandoned: None,
            request_timeout: config.request_timeout,
            poll_interval: config.poll_interval,
        }
    }

    /// Run until stopped or the connection fails. Consumes the engine;
    /// the socket closes when it returns.
    pub fn run(mut self) {
        tracing::info!("I/O thread started for {}", self.connection.peer_addr());

        while self.connection.is_running() {
            if let Err(e) = self.step() {
                if !matches!(e, ClientError::Cancelled) {
                    tracing::error!("Connection to {} lost: {}", self.connection.peer_addr(), e);
                }
                break;
            }
        }

        self.connection.stop();
        self.queue.close();
        tracing::info!("I/O thread stopped");
    }

    /// One loop iteration: pending actions, one selector wait, inbound traffic
    fn step(&mut self) -> Result<()> {
        for action in self.queue.drain() {
            if !self.connection.is_running() {
                return Ok(());
            }
            self.dispatch(action)?;
        }
        if !self.connection.is_running() {
            return Ok(());
        }

        // A transaction may have swallowed the wake signal of an action
        // queued while it waited; never block with work pending
        if self.queue.is_empty() {
            match self.connection.wait(self.poll_interval)? {
                Selected::Woken => tracing::trace!("Woken for queued actions"),
                Selected::Ready(..) | Selected::TimedOut => {}
            }
        }
        self.pump_inbound()
    }

    /// Execute one action; only fatal errors escape
    fn dispatch(&mut self, action: Action) -> Result<()> {
        let name = action.name();
        match self.execute(action) {
            Ok(()) => Ok(()),
            Err(e) => {
                self.report(name, &e);
                if e.is_fatal() {
                    Err(e)
                } else {
                    Ok(())
                }
            }
        }
    }

    fn execute(&mut self, action: Action) -> Result<()> {
        tracing::debug!("Executing {}", action.name());
        match action {
            Action::ListTables => self.list_tables(),
            Action::CreateTable { name } => self.create_table(&name),
            Action::SelectTable { table_id } => {
                self.shared.selected_table.store(table_id, Ordering::Release);
                self.handler.on_table_selected(table_id);
                Ok(())
            }
            Action::Query { kind } => self.query(kind),
            Action::Add { value } => self.add(&value),
            Action::Update { record_id, value } => self.update(record_id, &value),
            Action::Remove { record_id } => self.remove(record_id),
            Action::Subscribe { kind } => self.subscribe(kind),
            Action::Unsubscribe => self.unsubscribe(),
            Action::Sync { done } => {
                // The waiter may have given up already
                let _ = done.send(());
                Ok(())
            }
            Action::Quit => {
                self.connection.stop();
                Ok(())
            }
        }
    }

    /// Record a failure as the last error and tell the handler
    fn report(&self, action: &str, error: &ClientError) {
        if matches!(error, ClientError::Cancelled) {
            tracing::debug!("{} cancelled", action);
            return;
        }
        tracing::debug!("{} failed: {}", action, error);
        *self.shared.last_error.lock() = error.to_string();
        self.handler.on_error(action, error);
    }

    fn selected_table(&self) -> u32 {
        self.shared.selected_table.load(Ordering::Acquire)
    }

    // =========================================================================
    // Actions
    // =========================================================================

    fn list_tables(&mut self) -> Result<()> {
        let request_id = self.connection.next_request_id();
        let request = encode_query_request(request_id, WellKnownTable::Tables.id(), QueryKind::All)?;
        self.connection.send(&request)?;

        let handler = Arc::clone(&self.handler);
        self.read_pages(request_id, MessageType::QueryResponse, "query", |payload| {
            deliver_tables(handler.as_ref(), payload)
        })
    }

    fn create_table(&mut self, name: &str) -> Result<()> {
        let mut entity = BytesMut::new();
        encode_table_entity(&mut entity, 0, 0, 0, name)?;

        let request_id = self.connection.next_request_id();
        let request = encode_add_request(request_id, WellKnownTable::Tables.id(), &entity)?;
        self.connection.send(&request)?;

        let response = self.receive_response(request_id)?;
        let table_id = decode_add_response(&response)?;
        self.handler.on_table_created(table_id, name);
        Ok(())
    }

    fn query(&mut self, kind: QueryKind) -> Result<()> {
        let table_id = self.selected_table();
        let request_id = self.connection.next_request_id();
        let request = encode_query_request(request_id, table_id, kind)?;
        self.connection.send(&request)?;

        let handler = Arc::clone(&self.handler);
        self.read_pages(request_id, MessageType::QueryResponse, "query", |payload| {
            deliver_entities(handler.as_ref(), table_id, payload)
        })
    }

    fn add(&mut self, value: &[u8]) -> Result<()> {
        let table_id = self.selected_table();
        let mut entity = BytesMut::new();
        encode_entity(&mut entity, 0, 0, value)?;

        let request_id = self.connection.next_request_id();
        let request = encode_add_request(request_id, table_id, &entity)?;
        self.connection.send(&request)?;

        let response = self.receive_response(request_id)?;
        let record_id = decode_add_response(&response)?;
        self.handler.on_record_added(table_id, record_id);
        Ok(())
    }

    fn update(&mut self, record_id: u64, value: &[u8]) -> Result<()> {
        let table_id = self.selected_table();
        let mut entity = BytesMut::new();
        encode_entity(&mut entity, record_id, 0, value)?;

        let request_id = self.connection.next_request_id();
        let request = encode_update_request(request_id, table_id, &entity)?;
        self.connection.send(&request)?;

        let response = self.receive_response(request_id)?;
        expect_body(&response, MessageType::UpdateResponse, 0, "update")?;
        self.handler.on_record_updated(table_id, record_id);
        Ok(())
    }

    fn remove(&mut self, record_id: u64) -> Result<()> {
        let table_id = self.selected_table();
        let request_id = self.connection.next_request_id();
        let request = encode_remove_request(request_id, table_id, record_id)?;
        self.connection.send(&request)?;

        let response = self.receive_response(request_id)?;
        expect_body(&response, MessageType::RemoveResponse, 0, "remove")?;
        self.handler.on_record_removed(table_id, record_id);
        Ok(())
    }

    /// Load the table like a query, then keep the request id open for pushes
    fn subscribe(&mut self, kind: QueryKind) -> Result<()> {
        let table_id = self.selected_table();
        let request_id = self.connection.next_request_id();
        let request = encode_subscribe_request(request_id, table_id, kind)?;
        self.connection.send(&request)?;

        let handler = Arc::clone(&self.handler);
        self.read_pages(request_id, MessageType::SubscribeResponse, "subscribe", |payload| {
            deliver_entities(handler.as_ref(), table_id, payload)
        })?;

        self.subscriptions.insert(request_id, table_id);
        self.handler.on_subscribed(table_id);
        Ok(())
    }

    fn unsubscribe(&mut self) -> Result<()> {
        let table_id = self.selected_table();
        if !self.subscriptions.values().any(|&t| t == table_id) {
            return Err(ClientError::InvalidArgument(format!(
                "not subscribed to table {}",
                table_id
            )));
        }

        let request_id = self.connection.next_request_id();
        let request = encode_unsubscribe_request(request_id, table_id)?;
        self.connection.send(&request)?;

        let response = self.receive_response(request_id)?;
        expect_body(&response, MessageType::UnsubscribeResponse, 0, "unsubscribe")?;
        self.subscriptions.retain(|_, t| *t != table_id);
        self.handler.on_unsubscribed(table_id);
        Ok(())
    }

    // =========================================================================
    // Transactions
    // =========================================================================

    /// Read messages until one answers `request_id`.
    ///
    /// Anything else is routed as unsolicited. An error response fails the
    /// transaction with the decoded server error.
    fn receive_response(&mut self, request_id: u32) -> Result<Message> {
        loop {
            let message = self.connection.receive(self.request_timeout)?;
            if message.header().request_id != request_id {
                self.dispatch_unsolicited(message);
                continue;
            }
            if message.header().is(MessageType::ErrorResponse) {
                return Err(decode_error_response(&message)?.into());
            }
            return Ok(message);
        }
    }

    /// Read response pages until one arrives without the fragmented flag.
    ///
    /// Each page is fully validated before `deliver` sees it. After a failed
    /// page, the rest of the response is dropped as it arrives.
    fn read_pages<F>(&mut self, request_id: u32, response_type: MessageType, what: &str, mut deliver: F) -> Result<()>
    where
        F: FnMut(&[u8]) -> Result<()>,
    {
        loop {
            let message = self.receive_response(request_id)?;
            let fragmented = message.header().is_fragmented();

            let result = expect_body(&message, response_type, 0, what)
                .and_then(|_| page_payload(&message))
                .and_then(|payload| deliver(&payload));

            if let Err(e) = result {
                if fragmented {
                    self.abandoned = Some(request_id);
                }
                return Err(e);
            }
            if !fragmented {
                return Ok(());
            }
        }
    }

    // =========================================================================
    // Inbound traffic outside a transaction
    // =========================================================================

    /// Handle every complete message already received
    fn pump_inbound(&mut self) -> Result<()> {
        loop {
            match self.connection.try_receive() {
                Ok(Some(message)) => self.dispatch_unsolicited(message),
                Ok(None) => break,
                Err(e) => {
                    self.report("receive", &e);
                    if e.is_fatal() {
                        return Err(e);
                    }
                }
            }
        }

        if self.connection.is_peer_closed() {
            let e = ClientError::ConnectionClosed;
            self.report("receive", &e);
            return Err(e);
        }
        Ok(())
    }

    fn dispatch_unsolicited(&mut self, message: Message) {
        let request_id = message.header().request_id;

        if self.abandoned == Some(request_id) {
            if !message.header().is_fragmented() {
                self.abandoned = None;
            }
            tracing::debug!("Dropping page of abandoned request {}", request_id);
            return;
        }

        if let Some(&table_id) = self.subscriptions.get(&request_id) {
            if let Err(e) = self.deliver_push(table_id, &message) {
                self.report("subscribe", &e);
            }
            return;
        }

        self.handler.on_unexpected_message(&message);
    }

    /// Entities pushed for an open subscription
    fn deliver_push(&self, table_id: u32, message: &Message) -> Result<()> {
        let payload = page_payload(message)?;
        match message.header().message_type() {
            Some(MessageType::SubscribeResponse) => {
                deliver_entities(self.handler.as_ref(), table_id, &payload)
            }
            Some(MessageType::AddRequest) | Some(MessageType::UpdateRequest) => {
                // Forwarded writes keep their table id in front of the entity
                if payload.len() < 4 {
                    return Err(ClientError::Protocol(format!(
                        "Pushed message of {} bytes has no table id",
                        payload.len()
                    )));
                }
                deliver_entities(self.handler.as_ref(), table_id, &payload[4..])
            }
            _ => {
                self.handler.on_unexpected_message(message);
                Ok(())
            }
        }
    }
}

/// Validate every entity of a page, then hand them over in order
fn deliver_entities(handler: &dyn EventHandler, table_id: u32, payload: &[u8]) -> Result<()> {
    let entities = iter_entities(payload, ENTITY_HEADER_SIZE).collect::<Result<Vec<_>>>()?;
    for entity in &entities {
        handler.on_entity(table_id, entity);
    }
    Ok(())
}

/// Same as `deliver_entities`, for rows of the tables directory
fn deliver_tables(handler: &dyn EventHandler, payload: &[u8]) -> Result<()> {
    let tables = iter_entities(payload, TABLE_HEADER_SIZE)
        .map(|entity| entity.and_then(TableView::from_entity))
        .collect::<Result<Vec<_>>>()?;
    for table in &tables {
        handler.on_table(table);
    }
    Ok(())
}
