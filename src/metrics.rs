//! Counter metrics as an injected capability.
//!
//! Components never touch the global Prometheus registry. They receive an
//! `Arc<dyn MetricsSink>` at construction and bump named counters with a
//! small label set. [`CounterRegistry`] owns a private
//! [`prometheus::Registry`] and renders it for `GET /metrics`.

use std::collections::HashMap;
use std::sync::Arc;

use prometheus::{Encoder, IntCounterVec, Opts, Registry, TextEncoder};
use tracing::{debug, warn};

use crate::Result;

/// Relay failures, labelled by `type` (`dequeue`/`producer`) and `reason`.
pub const RELAY_ERRORS: &str = "httpqueue_relay_errors_total";
/// Consumer task outcomes, labelled by `outcome`.
pub const CONSUMER_OUTCOMES: &str = "httpqueue_consumer_outcomes_total";
/// API responses answered with a 500, labelled by `method` and `reason`.
pub const API_ERRORS: &str = "httpqueue_api_errors_total";

/// Sink for monotonically increasing counters.
pub trait MetricsSink: Send + Sync {
    /// Increment the counter `name` identified by `labels` by one.
    fn increment_counter(&self, name: &str, labels: &[(&str, &str)]);
}

/// Prometheus-backed counter store scoped to one process component graph.
pub struct CounterRegistry {
    registry: Registry,
    relay_errors: IntCounterVec,
    consumer_outcomes: IntCounterVec,
    api_errors: IntCounterVec,
}

impl CounterRegistry {
    /// Build a registry with every service counter registered.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Metrics` if a counter descriptor is rejected.
    pub fn new() -> Result<Self> {
        let registry = Registry::new();
        let relay_errors = register(
            &registry,
            RELAY_ERRORS,
            "Relay failures by stage and reason",
            &["type", "reason"],
        )?;
        let consumer_outcomes = register(
            &registry,
            CONSUMER_OUTCOMES,
            "Consumer task outcomes",
            &["outcome"],
        )?;
        let api_errors = register(
            &registry,
            API_ERRORS,
            "API requests answered with an internal error",
            &["method", "reason"],
        )?;
        Ok(Self {
            registry,
            relay_errors,
            consumer_outcomes,
            api_errors,
        })
    }

    /// Build a registry behind an `Arc`, ready to be shared.
    ///
    /// # Errors
    ///
    /// See [`CounterRegistry::new`].
    pub fn shared() -> Result<Arc<Self>> {
        Self::new().map(Arc::new)
    }

    /// Current value of one series; zero when it was never incremented.
    #[must_use]
    pub fn get(&self, name: &str, labels: &[(&str, &str)]) -> u64 {
        let Some(vec) = self.vec_for(name) else {
            return 0;
        };
        let wanted = label_map(labels);
        let exists = self
            .registry
            .gather()
            .iter()
            .filter(|family| family.get_name() == name)
            .flat_map(|family| family.get_metric())
            .any(|metric| {
                let pairs = metric.get_label();
                pairs.len() == wanted.len()
                    && pairs
                        .iter()
                        .all(|lp| wanted.get(lp.get_name()) == Some(&lp.get_value()))
            });
        if !exists {
            return 0;
        }
        vec.get_metric_with(&wanted).map_or(0, |counter| counter.get())
    }

    /// Sum of every series sharing `name`.
    #[must_use]
    pub fn total(&self, name: &str) -> u64 {
        let Some(vec) = self.vec_for(name) else {
            return 0;
        };
        self.registry
            .gather()
            .iter()
            .filter(|family| family.get_name() == name)
            .flat_map(|family| family.get_metric())
            .map(|metric| {
                let labels: HashMap<&str, &str> = metric
                    .get_label()
                    .iter()
                    .map(|lp| (lp.get_name(), lp.get_value()))
                    .collect();
                vec.get_metric_with(&labels).map_or(0, |counter| counter.get())
            })
            .sum()
    }

    /// Render all series in the Prometheus text exposition format.
    #[must_use]
    pub fn render(&self) -> String {
        let mut buf = Vec::new();
        if let Err(err) = TextEncoder::new().encode(&self.registry.gather(), &mut buf) {
            warn!(%err, "failed to encode metrics");
            return String::new();
        }
        String::from_utf8_lossy(&buf).into_owned()
    }

    fn vec_for(&self, name: &str) -> Option<&IntCounterVec> {
        match name {
            RELAY_ERRORS => Some(&self.relay_errors),
            CONSUMER_OUTCOMES => Some(&self.consumer_outcomes),
            API_ERRORS => Some(&self.api_errors),
            _ => None,
        }
    }
}

impl MetricsSink for CounterRegistry {
    fn increment_counter(&self, name: &str, labels: &[(&str, &str)]) {
        let Some(vec) = self.vec_for(name) else {
            warn!(counter = name, "unknown counter");
            return;
        };
        match vec.get_metric_with(&label_map(labels)) {
            Ok(counter) => {
                counter.inc();
                debug!(counter = name, ?labels, "counter incremented");
            }
            Err(err) => warn!(counter = name, ?labels, %err, "counter labels rejected"),
        }
    }
}

fn register(
    registry: &Registry,
    name: &str,
    help: &str,
    labels: &[&str],
) -> Result<IntCounterVec> {
    let vec = IntCounterVec::new(Opts::new(name, help), labels)?;
    registry.register(Box::new(vec.clone()))?;
    Ok(vec)
}

fn label_map<'a>(labels: &[(&'a str, &'a str)]) -> HashMap<&'a str, &'a str> {
    labels.iter().copied().collect()
}
