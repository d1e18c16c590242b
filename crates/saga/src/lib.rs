//! Order fulfillment saga.
//!
//! This crate provides:
//! - [`contracts`]: decoding of upstream results and encoding of outbound events
//! - [`SagaListener`], which applies results to orders and writes outbox rows
//! - [`SagaStore`] with in-memory and PostgreSQL implementations
//!
//! Every order change and the outbox rows announcing it are committed
//! together under an optimistic version check.

pub mod config;
pub mod contracts;
pub mod error;
pub mod listener;
pub mod postgres;
pub mod store;

pub use config::TopicConfig;
pub use contracts::{InboundEvent, InboundKind, InboundMessage, Outcome};
pub use error::{Result, SagaError};
pub use listener::{Applied, EventRegistry, SagaListener};
pub use postgres::PostgresSagaStore;
pub use store::{InMemorySagaStore, SagaStore};
