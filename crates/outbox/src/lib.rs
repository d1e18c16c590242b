//! Transactional outbox.
//!
//! Rows are written next to the state change they announce, then moved to
//! the broker by [`OutboxRelay`]. Failed rows return to the relay through
//! [`RequeueWorker`]. Stores:
//! - [`InMemoryOutboxStore`] for tests and single-process runs
//! - [`PostgresOutboxStore`] with skip-locked claims

pub mod error;
pub mod memory;
pub mod message;
pub mod postgres;
pub mod relay;
pub mod requeue;
pub mod store;

pub use error::{OutboxError, Result};
pub use memory::InMemoryOutboxStore;
pub use message::{MAX_ERROR_LEN, OutboxId, OutboxMessage, OutboxStatus};
pub use postgres::{PostgresOutboxStore, insert_in_tx};
pub use relay::{OutboxRelay, RELAY_ERROR_LEN, RelayConfig, RelayStats};
pub use requeue::{RequeueConfig, RequeueWorker};
pub use store::OutboxStore;
