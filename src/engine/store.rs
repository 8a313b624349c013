//! # Shared Metric Store
//!
//! The secondary sink: a process-local, read-optimized view of the most
//! recent derived metric per `(type, name)` pair. Local readers poll it
//! without touching the bus, and a store write can never block or fail bus
//! publication.
//!
//! Uses `DashMap` for lock-free concurrent reads: the writer is a single
//! actor task per composite metric, readers may be many.

use crate::engine::envelope::MetricEnvelope;
use dashmap::DashMap;
use std::sync::Arc;

/// Cloneable handle to the shared store. All clones see the same data.
#[derive(Debug, Clone, Default)]
pub struct SharedMetricStore {
    inner: Arc<DashMap<(String, String), MetricEnvelope>>,
}

impl SharedMetricStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert-or-replace the latest metric for its `(type, name)` key.
    pub fn write(&self, metric: &MetricEnvelope) {
        self.inner.insert(
            (metric.metric_type.clone(), metric.name.clone()),
            metric.clone(),
        );
    }

    /// Latest metric for `(metric_type, name)`, if one has been published.
    pub fn read(&self, metric_type: &str, name: &str) -> Option<MetricEnvelope> {
        self.inner
            .get(&(metric_type.to_string(), name.to_string()))
            .map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}
