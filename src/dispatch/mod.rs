//! Dispatch pipeline: outbox relay, broker producer and webhook consumer.
//!
//! A timer leaves storage through the [`relay::Relay`], which hands it to
//! the [`producer::TimerProducer`]. The broker releases the task at the
//! fire time to the [`processor::WebhookProcessor`] run by the
//! [`consumer`] worker pool.

pub mod consumer;
pub mod processor;
pub mod producer;
pub mod relay;
pub mod task;
