//! Consumer: the worker pool wired to the webhook processor.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::broker::queue::TaskQueue;
use crate::broker::server::{ServeMux, WorkerServer};
use crate::config::ConsumerConfig;

use super::processor::WebhookProcessor;
use super::task::TYPE_NAME;

/// Build a worker server that routes `timer:webhook` tasks to `processor`.
#[must_use]
pub fn build_consumer(
    queue: TaskQueue,
    processor: WebhookProcessor,
    config: &ConsumerConfig,
) -> WorkerServer {
    let mut mux = ServeMux::new();
    mux.handle(TYPE_NAME, Arc::new(processor));
    WorkerServer::new(queue, mux, config)
}

/// Build and spawn the consumer; see [`WorkerServer::spawn`].
#[must_use]
pub fn spawn_consumer(
    queue: TaskQueue,
    processor: WebhookProcessor,
    config: &ConsumerConfig,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    build_consumer(queue, processor, config).spawn(cancel)
}
