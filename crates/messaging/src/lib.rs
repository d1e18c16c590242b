//! Message bus plumbing for the order saga.
//!
//! This crate provides:
//! - [`Publisher`], [`Subscriber`] and [`TopicAdmin`] seams over a partitioned broker
//! - [`InMemoryBroker`], a partitioned in-process broker with per-group offsets
//! - [`ListenerContainer`], the polling consumer loop
//! - [`ErrorPipeline`], bounded retries followed by dead-letter routing
//! - [`DeadLetterReprocessor`], capped replay from dead-letter topics with operator alerts

pub mod alert;
pub mod broker;
pub mod container;
pub mod error;
pub mod handler;
pub mod memory;
pub mod pipeline;
pub mod record;
pub mod reprocessor;
pub mod topics;

pub use alert::{Alert, AlertNotifier, RecordingNotifier, WebhookConfig, WebhookNotifier};
pub use broker::{Publisher, Subscriber, TopicAdmin};
pub use container::{ContainerConfig, ListenerContainer, PollStats};
pub use error::{BusError, Result};
pub use handler::{ErrorKind, HandlerError, MessageHandler};
pub use memory::InMemoryBroker;
pub use pipeline::{BackoffPolicy, Disposition, ErrorPipeline};
pub use record::{
    DEAD_LETTER_SUFFIX, Headers, ProducerRecord, Record, RecordMetadata, dead_letter_topic, header,
};
pub use reprocessor::{DeadLetterReprocessor, REPLAY_GROUP, ReplayOutcome, ReprocessorConfig};
pub use topics::{TopicSpec, provision_with_dead_letters};
