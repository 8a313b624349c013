/*!
# Composite Metrics

A composite metric evaluation engine for physical-infrastructure telemetry:
it consumes a live stream of scalar sensor readings (temperature and
humidity sensors attached to racks and data centers), keeps the most recent
value per input topic with a validity deadline, folds the currently-valid
subset through a per-asset Lua script, and republishes the result as a new
derived metric on the bus and into a process-local shared store.

## Key Components

* **CompositeActor**: a long-lived single-task actor, one per composite
  metric, driven by `CONNECT`/`CONFIG`/`$TERM` control commands
* **Descriptor**: the JSON configuration unit naming the input topics and
  the evaluation script
* **MetricCache**: last-known value per input topic; staleness is decided
  lazily at snapshot time, entries are never removed
* **evaluator**: the script runtime bridge, a fresh sandboxed Lua
  interpreter per cycle, fed the snapshot as a global table `mt` and
  required to return exactly `(topic, value, unit)`
* **MetricBus / MetricBroker**: the bus capability trait and an in-process
  pattern-based stream broker implementing it
* **SharedMetricStore**: the secondary sink, a read-optimized map of the
  latest derived metric per `(type, name)`

## Usage Example

```rust,no_run
use composite_metrics::{CompositeActor, MetricBroker, SharedMetricStore};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let broker = MetricBroker::bind("inproc://metrics");
    let store = SharedMetricStore::new();

    // One actor per generated descriptor; lifecycle is managed externally.
    let actor = CompositeActor::spawn(
        "composite-metrics-rack01",
        Box::new(broker.connector()),
        store.clone(),
    );
    actor.connect("inproc://metrics")?;
    actor.config("/etc/composite-metrics/rack01.cfg")?;

    // ... sensors publish on the broker's _METRICS_SENSOR stream;
    // derived metrics appear on METRICS and in the shared store ...
    let latest = store.read("average.temperature", "Rack01");
    println!("{latest:?}");

    actor.term()?;
    actor.join().await?;
    Ok(())
}
```

## Error Handling

Only one condition is fatal to an actor: a descriptor that cannot be read
or parsed at `CONFIG` time, in which case [`CompositeActor::spawn`]'s task
resolves to that error. Everything else (out-of-phase commands,
undecodable envelopes, script errors, wrong return arity, invalid result
topics) is logged, isolated to the offending command or cycle, and the
loop keeps running; the next inbound event triggers a fresh evaluation
with updated inputs.
*/

pub mod engine;

// Re-export all public APIs for easier access
pub use engine::actor::{
    ActorHandle, Command, CompositeActor, CycleOutcome, Phase, SkipReason, OUTPUT_TTL,
};
pub use engine::bus::{
    BrokerClient, BrokerConnector, BusConnector, BusMessage, MetricBroker, MetricBus,
    STREAM_METRICS, STREAM_SENSOR_METRICS,
};
pub use engine::cache::{CacheEntry, MetricCache};
pub use engine::descriptor::Descriptor;
pub use engine::envelope::MetricEnvelope;
pub use engine::error::{CompositeError, Result};
pub use engine::evaluator::{evaluate, EvalError};
pub use engine::store::SharedMetricStore;
