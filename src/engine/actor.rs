//! # Composite Metric Actor
//!
//! One long-lived task per composite metric. The actor owns its cache, its
//! bus client, and its evaluation script; nothing is shared across actor
//! instances, so a corrupt script or a stalled sensor in one instance
//! cannot affect another.
//!
//! The loop has a single cooperative suspension point multiplexing the
//! control mailbox and, once connected, the bus receive handle. Whichever
//! source wakes first is drained by one message before the loop polls
//! again; there is no timeout and no periodic wake. Every accepted inbound
//! metric triggers exactly one evaluation cycle.

use crate::engine::bus::{
    BusConnector, BusMessage, MetricBus, STREAM_METRICS, STREAM_SENSOR_METRICS,
};
use crate::engine::cache::MetricCache;
use crate::engine::descriptor::Descriptor;
use crate::engine::envelope::MetricEnvelope;
use crate::engine::error::{CompositeError, Result};
use crate::engine::evaluator::{self, EvalError};
use crate::engine::store::SharedMetricStore;
use crate::engine::topic::{split_topic, subscription_filter};
use chrono::Utc;
use log::{debug, error, info, trace, warn};
use std::path::PathBuf;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Fixed TTL (seconds) stamped on every published composite metric.
pub const OUTPUT_TTL: u32 = 5 * 60;

/// Control commands accepted on the actor mailbox.
#[derive(Debug, Clone)]
pub enum Command {
    /// `CONNECT <endpoint>`: open the bus connection under the actor's own
    /// identity and register it as a producer of derived metrics.
    Connect(String),
    /// `CONFIG <path>`: load the descriptor file and subscribe to its
    /// input topics. Accepted exactly once, after `Connect`.
    Config(PathBuf),
    /// `$TERM`: end the loop cleanly from the top, in any phase.
    Term,
}

/// Control state gating which commands and events are currently valid.
/// Monotonic; the actor never regresses to an earlier phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Phase {
    Unconfigured,
    Connected,
    Configured,
}

/// Why an evaluation cycle published nothing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// Script raised an error, returned the wrong number of values, or
    /// returned values of the wrong type.
    Eval(EvalError),
    /// The script's result topic carries no `@`.
    InvalidOutputTopic(String),
}

/// Result of one evaluation cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    Published(MetricEnvelope),
    Skipped(SkipReason),
}

enum Wake {
    Control(Option<Command>),
    Bus(Option<BusMessage>),
}

/// The composite metric evaluation engine: consumes raw sensor metrics,
/// folds them through the descriptor's script, and republishes the result
/// on the bus and into the shared store.
pub struct CompositeActor {
    name: String,
    connector: Box<dyn BusConnector>,
    store: SharedMetricStore,
    commands: mpsc::UnboundedReceiver<Command>,
    phase: Phase,
    bus: Option<Box<dyn MetricBus>>,
    cache: MetricCache,
    script: String,
}

impl CompositeActor {
    /// Build an actor from its injected capabilities: the identity it
    /// connects under, the bus connector, the shared store sink, and the
    /// control mailbox.
    pub fn new(
        name: impl Into<String>,
        connector: Box<dyn BusConnector>,
        store: SharedMetricStore,
        commands: mpsc::UnboundedReceiver<Command>,
    ) -> Self {
        Self {
            name: name.into(),
            connector,
            store,
            commands,
            phase: Phase::Unconfigured,
            bus: None,
            cache: MetricCache::new(),
            script: String::new(),
        }
    }

    /// Spawn the actor on the current tokio runtime and return a handle
    /// for driving it with control commands.
    pub fn spawn(
        name: impl Into<String>,
        connector: Box<dyn BusConnector>,
        store: SharedMetricStore,
    ) -> ActorHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        let actor = Self::new(name, connector, store, rx);
        ActorHandle {
            commands: tx,
            task: tokio::spawn(actor.run()),
        }
    }

    /// Run the actor loop to completion.
    ///
    /// Returns `Ok(())` on `$TERM` or when the mailbox closes; returns the
    /// descriptor error when a `CONFIG` load fails, which is the only
    /// fatal condition.
    pub async fn run(mut self) -> Result<()> {
        loop {
            let wake = match self.bus.as_mut() {
                Some(bus) => tokio::select! {
                    cmd = self.commands.recv() => Wake::Control(cmd),
                    msg = bus.recv() => Wake::Bus(msg),
                },
                None => Wake::Control(self.commands.recv().await),
            };

            match wake {
                Wake::Control(None) => {
                    info!("{}: control mailbox closed, shutting down", self.name);
                    break;
                }
                Wake::Control(Some(Command::Term)) => {
                    info!("{}: Got $TERM", self.name);
                    break;
                }
                Wake::Control(Some(command)) => self.handle_command(command).await?,
                Wake::Bus(None) => {
                    warn!("{}: bus connection closed, shutting down", self.name);
                    break;
                }
                Wake::Bus(Some(message)) => self.handle_metric(message).await,
            }
        }
        Ok(())
    }

    /// Apply a `CONNECT` or `CONFIG` command. Out-of-phase commands are
    /// logged and ignored; only a descriptor load failure is returned.
    async fn handle_command(&mut self, command: Command) -> Result<()> {
        trace!("{}: actor command={command:?}", self.name);
        match command {
            Command::Connect(endpoint) => {
                if self.phase > Phase::Unconfigured {
                    warn!("{}: CONNECT while already connected, ignored", self.name);
                    return Ok(());
                }
                match self.connector.connect(&endpoint, &self.name).await {
                    Ok(mut bus) => {
                        if let Err(e) = bus.set_producer(STREAM_METRICS).await {
                            error!("{}: set_producer failed: {e}", self.name);
                        }
                        self.bus = Some(bus);
                        self.phase = Phase::Connected;
                    }
                    Err(e) => error!("{}: cannot connect to '{endpoint}': {e}", self.name),
                }
            }
            Command::Config(path) => {
                if self.phase < Phase::Connected {
                    error!("{}: CONFIG before CONNECT", self.name);
                    return Ok(());
                }
                if self.phase == Phase::Configured {
                    warn!("{}: already configured, CONFIG ignored", self.name);
                    return Ok(());
                }
                trace!("{}: Opening '{}'", self.name, path.display());
                let descriptor = match Descriptor::from_file(&path) {
                    Ok(descriptor) => descriptor,
                    Err(e) => {
                        error!(
                            "{}: cannot load config file '{}': {e}",
                            self.name,
                            path.display()
                        );
                        return Err(e);
                    }
                };
                self.configure(descriptor).await;
            }
            // $TERM is intercepted by the loop before dispatch.
            Command::Term => {}
        }
        Ok(())
    }

    /// Create the expired cache slots and register one exact-match bus
    /// subscription per input topic.
    async fn configure(&mut self, descriptor: Descriptor) {
        self.cache.configure(descriptor.inputs.iter().cloned());
        if let Some(bus) = self.bus.as_mut() {
            for topic in &descriptor.inputs {
                let filter = subscription_filter(topic);
                if let Err(e) = bus.set_consumer(STREAM_SENSOR_METRICS, &filter).await {
                    error!("{}: cannot subscribe to '{filter}': {e}", self.name);
                }
            }
        }
        self.script = descriptor.evaluation;
        self.phase = Phase::Configured;
    }

    /// Fold one inbound sensor metric into the cache and run exactly one
    /// evaluation cycle. All failures here are isolated to this message.
    async fn handle_metric(&mut self, message: BusMessage) {
        if self.phase < Phase::Configured {
            error!("{}: DATA before CONFIG", self.name);
            return;
        }
        let envelope = match MetricEnvelope::decode(&message.payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!("{}: undecodable envelope on '{}': {e}", self.name, message.subject);
                return;
            }
        };
        let value: f64 = match envelope.value.trim().parse() {
            Ok(value) => value,
            Err(_) => {
                warn!(
                    "{}: unparsable value '{}' on '{}'",
                    self.name, envelope.value, message.subject
                );
                return;
            }
        };
        trace!("{}: Got message '{}' with value {value}", self.name, message.subject);
        // Keyed by the routing subject the message arrived on, not by any
        // field inside the payload.
        self.cache
            .update(&message.subject, value, envelope.valid_till());

        match self.run_cycle(Utc::now().timestamp()).await {
            CycleOutcome::Published(metric) => {
                debug!(
                    "{}: published {}@{} = {}",
                    self.name, metric.metric_type, metric.name, metric.value
                );
            }
            CycleOutcome::Skipped(SkipReason::Eval(EvalError::Arity(_))) => {
                error!("{}: Not enough valid data", self.name);
            }
            CycleOutcome::Skipped(SkipReason::Eval(e)) => {
                error!("{}: {e}", self.name);
            }
            CycleOutcome::Skipped(SkipReason::InvalidOutputTopic(topic)) => {
                error!("{}: Invalid output topic '{topic}'", self.name);
            }
        }
    }

    /// One evaluation cycle: snapshot the currently-valid inputs, run the
    /// script in a fresh interpreter, and on success publish the derived
    /// metric to both sinks.
    async fn run_cycle(&mut self, now: i64) -> CycleOutcome {
        let inputs = self.cache.snapshot(now);
        let (topic, value, unit) = match evaluator::evaluate(&inputs, &self.script) {
            Ok(result) => result,
            Err(e) => return CycleOutcome::Skipped(SkipReason::Eval(e)),
        };
        let Some((metric_type, name)) = split_topic(&topic) else {
            return CycleOutcome::Skipped(SkipReason::InvalidOutputTopic(topic));
        };

        let metric = MetricEnvelope {
            metric_type: metric_type.to_string(),
            name: name.to_string(),
            value: format!("{value:.2}"),
            unit,
            ttl: OUTPUT_TTL,
            time: now,
        };

        // Shared store first; its write can neither block nor fail bus
        // publication.
        self.store.write(&metric);

        match metric.encode() {
            Ok(payload) => {
                if let Some(bus) = self.bus.as_mut() {
                    if let Err(e) = bus.send(&topic, payload).await {
                        error!("{}: send failed: {e}", self.name);
                    }
                }
            }
            Err(e) => error!("{}: cannot encode metric: {e}", self.name),
        }

        CycleOutcome::Published(metric)
    }
}

/// Handle to a spawned [`CompositeActor`]: the command sender plus the task
/// handle for observing its exit.
pub struct ActorHandle {
    commands: mpsc::UnboundedSender<Command>,
    task: JoinHandle<Result<()>>,
}

impl ActorHandle {
    /// Send `CONNECT <endpoint>`.
    pub fn connect(&self, endpoint: &str) -> Result<()> {
        self.send(Command::Connect(endpoint.to_string()))
    }

    /// Send `CONFIG <path>`.
    pub fn config<P: Into<PathBuf>>(&self, path: P) -> Result<()> {
        self.send(Command::Config(path.into()))
    }

    /// Send `$TERM`.
    pub fn term(&self) -> Result<()> {
        self.send(Command::Term)
    }

    /// Wait for the actor to exit and surface its final result.
    pub async fn join(self) -> Result<()> {
        self.task
            .await
            .map_err(|e| CompositeError::protocol(format!("actor task failed: {e}")))?
    }

    fn send(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| CompositeError::protocol("actor is no longer running"))
    }
}
