//! Actions and the Action Queue
//!
//! Caller threads describe work as [`Action`]s and push them onto the
//! [`ActionQueue`]; the I/O thread drains the queue and executes them in
//! submission order.
//!
//! ## Wake Protocol
//! `enqueue` appends under the lock, releases it, then signals the wake
//! channel. The I/O thread drains the whole queue per wake, so coalesced
//! signals never strand an action.

use std::collections::VecDeque;

use crossbeam::channel::Sender;
use parking_lot::Mutex;

use crate::error::{ClientError, Result};
use crate::network::WakeHandle;
use crate::protocol::QueryKind;

/// A deferred operation, executed on the I/O thread
#[derive(Debug)]
pub enum Action {
    /// Query the tables directory
    ListTables,

    /// Add a table to the directory
    CreateTable { name: String },

    /// Make `table_id` the target of later record operations
    SelectTable { table_id: u32 },

    /// Query the selected table
    Query { kind: QueryKind },

    /// Add a record to the selected table
    Add { value: Vec<u8> },

    /// Replace a record of the selected table
    Update { record_id: u64, value: Vec<u8> },

    /// Remove a record from the selected table
    Remove { record_id: u64 },

    /// Load the selected table and keep receiving its pushes
    Subscribe { kind: QueryKind },

    /// Stop receiving pushes for the selected table
    Unsubscribe,

    /// Completes once every earlier action has executed
    Sync { done: Sender<()> },

    /// Stop the I/O thread
    Quit,
}

impl Action {
    /// Short name for logs and error reports
    pub fn name(&self) -> &'static str {
        match self {
            Action::ListTables => "list",
            Action::CreateTable { .. } => "create",
            Action::SelectTable { .. } => "select",
            Action::Query { .. } => "query",
            Action::Add { .. } => "add",
            Action::Update { .. } => "update",
            Action::Remove { .. } => "remove",
            Action::Subscribe { .. } => "subscribe",
            Action::Unsubscribe => "unsubscribe",
            Action::Sync { .. } => "sync",
            Action::Quit => "quit",
        }
    }
}

struct QueueState {
    actions: VecDeque<Action>,
    closed: bool,
}

/// Thread-safe FIFO of pending actions, paired with the selector's wake channel
pub struct ActionQueue {
    state: Mutex<QueueState>,
    waker: WakeHandle,
}

impl ActionQueue {
    pub fn new(waker: WakeHandle) -> Self {
        Self {
            state: Mutex::new(QueueState {
                actions: VecDeque::new(),
                closed: false,
            }),
            waker,
        }
    }

    /// Append an action and wake the I/O thread.
    ///
    /// Fails with `NotConnected` once the queue has been closed.
    pub fn enqueue(&self, action: Action) -> Result<()> {
        {
            let mut state = self.state.lock();
            if state.closed {
                return Err(ClientError::NotConnected);
            }
            state.actions.push_back(action);
        }
        self.waker.wake()?;
        Ok(())
    }

    /// Take every pending action, oldest first
    pub fn drain(&self) -> VecDeque<Action> {
        std::mem::take(&mut self.state.lock().actions)
    }

    /// Refuse further actions and drop the pending ones
    pub fn close(&self) {
        let dropped = {
            let mut state = self.state.lock();
            state.closed = true;
            std::mem::take(&mut state.actions)
        };
        if !dropped.is_empty() {
            tracing::debug!("Discarding {} pending actions", dropped.len());
        }
    }

    /// Interrupt a blocked selector wait without queueing anything
    pub fn wake(&self) -> Result<()> {
        Ok(self.waker.wake()?)
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    pub fn len(&self) -> usize {
        self.state.lock().actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
