//! Result Delivery
//!
//! Everything the I/O thread learns (rows, assigned ids, failures, stray
//! messages) is reported through an [`EventHandler`]. Callbacks run on the
//! I/O thread, in the order results arrive; a slow callback stalls the
//! connection.

use crate::error::ClientError;
use crate::protocol::{EntityView, Message, TableView};

/// Observer for the outcomes of queued actions.
///
/// Every callback has a default that logs through `tracing`, so handlers
/// only override what they consume.
pub trait EventHandler: Send + Sync {
    /// One row of a table listing
    fn on_table(&self, table: &TableView<'_>) {
        tracing::info!("table {}: {}", table.id(), table.name());
    }

    /// One record from a query, subscription load, or subscription push
    fn on_entity(&self, table_id: u32, entity: &EntityView<'_>) {
        tracing::info!(
            "table {}: id={}, size={}, time={}",
            table_id,
            entity.id(),
            entity.size(),
            entity.time()
        );
    }

    fn on_table_created(&self, table_id: u64, name: &str) {
        tracing::info!("created table {} ({})", table_id, name);
    }

    fn on_table_selected(&self, table_id: u32) {
        tracing::info!("selected table {}", table_id);
    }

    fn on_record_added(&self, table_id: u32, record_id: u64) {
        tracing::info!("added record {} to table {}", record_id, table_id);
    }

    fn on_record_updated(&self, table_id: u32, record_id: u64) {
        tracing::info!("updated record {} in table {}", record_id, table_id);
    }

    fn on_record_removed(&self, table_id: u32, record_id: u64) {
        tracing::info!("removed record {} from table {}", record_id, table_id);
    }

    /// The initial load of a subscription finished; pushes follow
    fn on_subscribed(&self, table_id: u32) {
        tracing::info!("subscribed to table {}", table_id);
    }

    fn on_unsubscribed(&self, table_id: u32) {
        tracing::info!("unsubscribed from table {}", table_id);
    }

    /// An action failed. `action` is the short action name.
    fn on_error(&self, action: &str, error: &ClientError) {
        tracing::warn!("{} failed: {}", action, error);
    }

    /// A message that answers no outstanding request and no subscription
    fn on_unexpected_message(&self, message: &Message) {
        tracing::warn!(
            "Dropping unsolicited message type {} for request {}",
            message.header().message_type,
            message.header().request_id
        );
    }
}

/// Handler that only logs
#[derive(Debug, Default, Clone, Copy)]
pub struct LogHandler;

impl EventHandler for LogHandler {}
