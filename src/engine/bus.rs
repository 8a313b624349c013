//! # Metric Bus
//!
//! The actor's view of the message bus, abstracted as a narrow capability
//! trait so the loop never depends on a concrete transport: it connects
//! under its own identity, registers as a producer on the derived-metric
//! stream, registers pattern subscriptions on the sensor stream, and then
//! sends and receives subject-addressed payloads.
//!
//! [`MetricBroker`] is the in-process implementation: a pattern-based
//! stream broker with one mailbox per connected client, used by the test
//! suite and by embedders that run the whole pipeline in one process.

use crate::engine::error::{CompositeError, Result};
use async_trait::async_trait;
use log::trace;
use regex::Regex;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;

/// Stream carrying derived composite metrics (the engine produces here).
pub const STREAM_METRICS: &str = "METRICS";

/// Stream carrying raw per-sensor metrics (the engine consumes from here).
pub const STREAM_SENSOR_METRICS: &str = "_METRICS_SENSOR";

/// A subject-addressed payload as it travels on a stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMessage {
    /// Routing subject the message was published under; for metric
    /// envelopes this is the topic.
    pub subject: String,
    pub payload: Vec<u8>,
}

/// A connected bus client owned by one actor.
#[async_trait]
pub trait MetricBus: Send {
    /// Register this client as a producer on `stream`.
    async fn set_producer(&mut self, stream: &str) -> Result<()>;

    /// Subscribe to messages on `stream` whose subject matches the regex
    /// `pattern`. Multiple calls accumulate subscriptions.
    async fn set_consumer(&mut self, stream: &str, pattern: &str) -> Result<()>;

    /// Publish `payload` under `subject` on the producer stream.
    async fn send(&mut self, subject: &str, payload: Vec<u8>) -> Result<()>;

    /// Next message matching any subscription, or `None` once the bus is
    /// gone. Cancel-safe; this is the actor's poll point.
    async fn recv(&mut self) -> Option<BusMessage>;
}

/// Connection capability handed to an actor; exercised when a `CONNECT`
/// command names an endpoint.
#[async_trait]
pub trait BusConnector: Send + Sync {
    async fn connect(&self, endpoint: &str, name: &str) -> Result<Box<dyn MetricBus>>;
}

struct Subscription {
    client: String,
    patterns: Vec<Regex>,
    tx: mpsc::UnboundedSender<BusMessage>,
}

#[derive(Default)]
struct BrokerState {
    /// Stream name -> subscribers with their accumulated patterns.
    streams: HashMap<String, Vec<Subscription>>,
}

fn lock_state(state: &Mutex<BrokerState>) -> std::sync::MutexGuard<'_, BrokerState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// In-process stream broker. Cloning yields another handle to the same
/// broker; clients stay connected for as long as any handle or client
/// keeps the shared state alive.
#[derive(Clone)]
pub struct MetricBroker {
    endpoint: String,
    state: Arc<Mutex<BrokerState>>,
}

impl MetricBroker {
    /// Create a broker answering to `endpoint`.
    pub fn bind(endpoint: &str) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            state: Arc::new(Mutex::new(BrokerState::default())),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Connect a client under `name`.
    pub fn client(&self, name: &str) -> BrokerClient {
        let (tx, rx) = mpsc::unbounded_channel();
        BrokerClient {
            name: name.to_string(),
            state: Arc::clone(&self.state),
            producer_stream: None,
            tx,
            rx,
        }
    }

    /// Connector capability for actors on this broker.
    pub fn connector(&self) -> BrokerConnector {
        BrokerConnector {
            broker: self.clone(),
        }
    }
}

/// One client's connection to a [`MetricBroker`].
pub struct BrokerClient {
    name: String,
    state: Arc<Mutex<BrokerState>>,
    producer_stream: Option<String>,
    tx: mpsc::UnboundedSender<BusMessage>,
    rx: mpsc::UnboundedReceiver<BusMessage>,
}

#[async_trait]
impl MetricBus for BrokerClient {
    async fn set_producer(&mut self, stream: &str) -> Result<()> {
        self.producer_stream = Some(stream.to_string());
        Ok(())
    }

    async fn set_consumer(&mut self, stream: &str, pattern: &str) -> Result<()> {
        let regex = Regex::new(pattern).map_err(|e| {
            CompositeError::bus(format!("invalid subscription pattern '{pattern}': {e}"))
        })?;
        let mut state = lock_state(&self.state);
        let subscriptions = state.streams.entry(stream.to_string()).or_default();
        match subscriptions.iter_mut().find(|s| s.client == self.name) {
            Some(subscription) => subscription.patterns.push(regex),
            None => subscriptions.push(Subscription {
                client: self.name.clone(),
                patterns: vec![regex],
                tx: self.tx.clone(),
            }),
        }
        trace!("{}: registered to receive '{pattern}' from stream '{stream}'", self.name);
        Ok(())
    }

    async fn send(&mut self, subject: &str, payload: Vec<u8>) -> Result<()> {
        let stream = self
            .producer_stream
            .as_deref()
            .ok_or_else(|| CompositeError::bus("send before set_producer"))?;
        let message = BusMessage {
            subject: subject.to_string(),
            payload,
        };
        let state = lock_state(&self.state);
        if let Some(subscriptions) = state.streams.get(stream) {
            for subscription in subscriptions {
                if subscription.patterns.iter().any(|p| p.is_match(subject)) {
                    // A hung-up subscriber is not the producer's problem.
                    let _ = subscription.tx.send(message.clone());
                }
            }
        }
        Ok(())
    }

    async fn recv(&mut self) -> Option<BusMessage> {
        self.rx.recv().await
    }
}

/// Connects actors to one [`MetricBroker`].
pub struct BrokerConnector {
    broker: MetricBroker,
}

#[async_trait]
impl BusConnector for BrokerConnector {
    async fn connect(&self, endpoint: &str, name: &str) -> Result<Box<dyn MetricBus>> {
        if endpoint != self.broker.endpoint() {
            return Err(CompositeError::bus(format!(
                "no broker bound at '{endpoint}'"
            )));
        }
        Ok(Box::new(self.broker.client(name)))
    }
}
