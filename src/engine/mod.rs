pub mod actor;
pub mod bus;
pub mod cache;
pub mod descriptor;
pub mod envelope;
pub mod error;
pub mod evaluator;
pub mod store;
pub mod topic;

// Re-export key types for easier access
pub use actor::{ActorHandle, Command, CompositeActor, CycleOutcome, Phase, SkipReason};
pub use bus::{BusConnector, BusMessage, MetricBroker, MetricBus};
pub use cache::MetricCache;
pub use descriptor::Descriptor;
pub use envelope::MetricEnvelope;
pub use store::SharedMetricStore;
