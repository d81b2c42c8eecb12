//! Redpanda transport for the airlock status update processor.
//!
//! - [`RedpandaMessageReceiver`]: reads step result messages from a topic and
//!   implements the queue acknowledgment contract with manual offset commits
//! - [`RedpandaEventPublisher`]: publishes status-changed and notification
//!   events as JSON
//!
//! # Delivery Semantics
//!
//! **At-least-once** in both directions:
//! - A step result is committed only after the processor completes it; an
//!   abandoned message is read again from the same offset
//! - Events are keyed by request id, so ordering holds per request
//!
//! Redpanda speaks the Kafka protocol, so any Kafka-compatible broker works.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod ledger;
mod publisher;
mod receiver;

pub use publisher::{EVENT_TYPE_HEADER, RedpandaEventPublisher, RedpandaEventPublisherBuilder};
pub use receiver::{CORRELATION_ID_HEADER, RedpandaMessageReceiver, RedpandaMessageReceiverBuilder};
