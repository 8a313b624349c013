use chrono::Utc;
use composite_metrics::{
    CompositeActor, MetricBroker, MetricBus, MetricEnvelope, SharedMetricStore,
    STREAM_METRICS, STREAM_SENSOR_METRICS,
};
use std::io::Write;
use std::time::Duration;
use tokio::time::timeout;

/// The script shape the external configurator generates: average every
/// currently-valid input, raise when none are left.
const AVERAGE_DESCRIPTOR: &str = r#"{
    "in": ["temperature@TH1", "temperature@TH2"],
    "evaluation": "local sum = 0 local num = 0 for _, value in pairs(mt) do sum = sum + value num = num + 1 end if num == 0 then error('all sensors lost') end return 'temperature@world', sum / num, 'C'"
}"#;

fn descriptor_file(json: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(json.as_bytes()).unwrap();
    file
}

fn sensor_reading(metric_type: &str, name: &str, value: &str, ttl: u32, time: i64) -> Vec<u8> {
    MetricEnvelope {
        metric_type: metric_type.to_string(),
        name: name.to_string(),
        value: value.to_string(),
        unit: "C".to_string(),
        ttl,
        time,
    }
    .encode()
    .unwrap()
}

async fn recv_metric(consumer: &mut impl MetricBus) -> MetricEnvelope {
    let message = timeout(Duration::from_secs(5), consumer.recv())
        .await
        .expect("timed out waiting for a derived metric")
        .expect("bus closed");
    MetricEnvelope::decode(&message.payload).unwrap()
}

/// Scenarios from the composite server selftest: single input, two-input
/// averaging, update semantics, then all-stale starvation, in sequence
/// against one live actor.
#[tokio::test]
async fn composite_actor_end_to_end() {
    let _ = env_logger::builder().is_test(true).try_init();

    let broker = MetricBroker::bind("inproc://composite-test");
    let store = SharedMetricStore::new();
    let config = descriptor_file(AVERAGE_DESCRIPTOR);

    let mut producer = broker.client("producer");
    producer.set_producer(STREAM_SENSOR_METRICS).await.unwrap();

    let mut consumer = broker.client("consumer");
    consumer
        .set_consumer(STREAM_METRICS, "^temperature@world$")
        .await
        .unwrap();

    let actor = CompositeActor::spawn(
        "composite-metrics-test",
        Box::new(broker.connector()),
        store.clone(),
    );
    actor.connect("inproc://composite-test").unwrap();
    actor.config(config.path()).unwrap();
    // Let the actor drain the mailbox and register its subscriptions
    // before the first reading is published.
    tokio::time::sleep(Duration::from_millis(200)).await;

    let now = Utc::now().timestamp();

    // Scenario A: single input.
    producer
        .send(
            "temperature@TH1",
            sensor_reading("temperature", "TH1", "40", 60, now),
        )
        .await
        .unwrap();

    let metric = recv_metric(&mut consumer).await;
    assert_eq!(metric.metric_type, "temperature");
    assert_eq!(metric.name, "world");
    assert_eq!(metric.value, "40.00"); // 40 / 1
    assert_eq!(metric.unit, "C");
    assert_eq!(metric.ttl, 300);

    let shm = store.read("temperature", "world").unwrap();
    assert_eq!(shm.value, "40.00");

    // Scenario B: second input joins the average.
    producer
        .send(
            "temperature@TH2",
            sensor_reading("temperature", "TH2", "100", 60, now),
        )
        .await
        .unwrap();

    let metric = recv_metric(&mut consumer).await;
    assert_eq!(metric.value, "70.00"); // (40 + 100) / 2
    assert_eq!(store.read("temperature", "world").unwrap().value, "70.00");

    // Scenario C: update semantics. TH1 overwritten, TH2 still valid.
    producer
        .send(
            "temperature@TH1",
            sensor_reading("temperature", "TH1", "70.00", 60, now),
        )
        .await
        .unwrap();

    let metric = recv_metric(&mut consumer).await;
    assert_eq!(metric.value, "85.00"); // (70 + 100) / 2
    assert_eq!(store.read("temperature", "world").unwrap().value, "85.00");

    // Scenario D: drive every input past its deadline. Each accepted
    // event still triggers exactly one cycle, so the stale TH1 reading
    // publishes the average of what remains valid (TH2 alone) first.
    producer
        .send(
            "temperature@TH1",
            sensor_reading("temperature", "TH1", "10", 60, now - 3_600),
        )
        .await
        .unwrap();

    let metric = recv_metric(&mut consumer).await;
    assert_eq!(metric.value, "100.00"); // TH2 is the only valid input left
    assert_eq!(store.read("temperature", "world").unwrap().value, "100.00");

    // Now stale out TH2 as well: the cycle runs, the script sees an empty
    // mt and raises; nothing is published and the actor stays alive.
    producer
        .send(
            "temperature@TH2",
            sensor_reading("temperature", "TH2", "10", 60, now - 3_600),
        )
        .await
        .unwrap();

    assert!(
        timeout(Duration::from_millis(300), consumer.recv())
            .await
            .is_err(),
        "stale inputs must not produce a metric"
    );
    // Last good value still visible to local readers.
    assert_eq!(store.read("temperature", "world").unwrap().value, "100.00");

    // Still alive: a fresh reading for TH1 restarts publication.
    let now = Utc::now().timestamp();
    producer
        .send(
            "temperature@TH1",
            sensor_reading("temperature", "TH1", "20", 60, now),
        )
        .await
        .unwrap();
    let metric = recv_metric(&mut consumer).await;
    assert_eq!(metric.value, "20.00");

    actor.term().unwrap();
    actor.join().await.unwrap();
}

/// A reading on a topic the actor never subscribed to is filtered out by
/// the anchored exact-match pattern and triggers no cycle.
#[tokio::test]
async fn unsubscribed_topics_are_filtered_by_the_bus() {
    let broker = MetricBroker::bind("inproc://composite-test");
    let store = SharedMetricStore::new();
    let config = descriptor_file(AVERAGE_DESCRIPTOR);

    let mut producer = broker.client("producer");
    producer.set_producer(STREAM_SENSOR_METRICS).await.unwrap();
    let mut consumer = broker.client("consumer");
    consumer
        .set_consumer(STREAM_METRICS, "^temperature@world$")
        .await
        .unwrap();

    let actor = CompositeActor::spawn(
        "composite-metrics-test",
        Box::new(broker.connector()),
        store.clone(),
    );
    actor.connect("inproc://composite-test").unwrap();
    actor.config(config.path()).unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    let now = Utc::now().timestamp();
    // "temperature@TH10" would match an unanchored/unescaped TH1 filter.
    producer
        .send(
            "temperature@TH10",
            sensor_reading("temperature", "TH10", "99", 60, now),
        )
        .await
        .unwrap();

    assert!(
        timeout(Duration::from_millis(300), consumer.recv())
            .await
            .is_err()
    );

    actor.term().unwrap();
    actor.join().await.unwrap();
}

/// Undecodable envelopes are dropped without disturbing the cache or the
/// loop; the next well-formed reading publishes normally.
#[tokio::test]
async fn malformed_envelopes_are_ignored() {
    let broker = MetricBroker::bind("inproc://composite-test");
    let store = SharedMetricStore::new();
    let config = descriptor_file(AVERAGE_DESCRIPTOR);

    let mut producer = broker.client("producer");
    producer.set_producer(STREAM_SENSOR_METRICS).await.unwrap();
    let mut consumer = broker.client("consumer");
    consumer
        .set_consumer(STREAM_METRICS, "^temperature@world$")
        .await
        .unwrap();

    let actor = CompositeActor::spawn(
        "composite-metrics-test",
        Box::new(broker.connector()),
        store.clone(),
    );
    actor.connect("inproc://composite-test").unwrap();
    actor.config(config.path()).unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    let now = Utc::now().timestamp();
    producer
        .send("temperature@TH1", b"not an envelope".to_vec())
        .await
        .unwrap();
    producer
        .send(
            "temperature@TH1",
            sensor_reading("temperature", "TH1", "not-a-number", 60, now),
        )
        .await
        .unwrap();
    producer
        .send(
            "temperature@TH1",
            sensor_reading("temperature", "TH1", "40", 60, now),
        )
        .await
        .unwrap();

    let metric = recv_metric(&mut consumer).await;
    assert_eq!(metric.value, "40.00");

    actor.term().unwrap();
    actor.join().await.unwrap();
}

/// A script that breaks the three-value contract never publishes and never
/// kills the actor.
#[tokio::test]
async fn wrong_arity_produces_no_publication() {
    let broker = MetricBroker::bind("inproc://composite-test");
    let store = SharedMetricStore::new();
    let config = descriptor_file(
        r#"{
            "in": ["temperature@TH1"],
            "evaluation": "return 'temperature@world', 1"
        }"#,
    );

    let mut producer = broker.client("producer");
    producer.set_producer(STREAM_SENSOR_METRICS).await.unwrap();
    let mut consumer = broker.client("consumer");
    consumer.set_consumer(STREAM_METRICS, ".*").await.unwrap();

    let actor = CompositeActor::spawn(
        "composite-metrics-test",
        Box::new(broker.connector()),
        store.clone(),
    );
    actor.connect("inproc://composite-test").unwrap();
    actor.config(config.path()).unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    producer
        .send(
            "temperature@TH1",
            sensor_reading("temperature", "TH1", "40", 60, Utc::now().timestamp()),
        )
        .await
        .unwrap();

    assert!(
        timeout(Duration::from_millis(300), consumer.recv())
            .await
            .is_err()
    );
    assert!(store.is_empty());

    // The loop is still serving commands.
    actor.term().unwrap();
    actor.join().await.unwrap();
}

/// A result topic without '@' is rejected after evaluation.
#[tokio::test]
async fn invalid_output_topic_produces_no_publication() {
    let broker = MetricBroker::bind("inproc://composite-test");
    let store = SharedMetricStore::new();
    let config = descriptor_file(
        r#"{
            "in": ["temperature@TH1"],
            "evaluation": "return 'no-asset-separator', 1, 'C'"
        }"#,
    );

    let mut producer = broker.client("producer");
    producer.set_producer(STREAM_SENSOR_METRICS).await.unwrap();
    let mut consumer = broker.client("consumer");
    consumer.set_consumer(STREAM_METRICS, ".*").await.unwrap();

    let actor = CompositeActor::spawn(
        "composite-metrics-test",
        Box::new(broker.connector()),
        store.clone(),
    );
    actor.connect("inproc://composite-test").unwrap();
    actor.config(config.path()).unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    producer
        .send(
            "temperature@TH1",
            sensor_reading("temperature", "TH1", "40", 60, Utc::now().timestamp()),
        )
        .await
        .unwrap();

    assert!(
        timeout(Duration::from_millis(300), consumer.recv())
            .await
            .is_err()
    );
    assert!(store.is_empty());

    actor.term().unwrap();
    actor.join().await.unwrap();
}

/// Actors are isolated: two composites over disjoint sensors publish
/// independently, and a broken script in one never affects the other.
#[tokio::test]
async fn actor_instances_are_isolated() {
    let broker = MetricBroker::bind("inproc://composite-test");
    let store = SharedMetricStore::new();

    let good = descriptor_file(
        r#"{
            "in": ["temperature@TH1"],
            "evaluation": "local sum = 0 local num = 0 for _, value in pairs(mt) do sum = sum + value num = num + 1 end if num == 0 then error('all sensors lost') end return 'temperature@RackA', sum / num, 'C'"
        }"#,
    );
    let broken = descriptor_file(
        r#"{
            "in": ["temperature@TH2"],
            "evaluation": "error('always broken')"
        }"#,
    );

    let mut producer = broker.client("producer");
    producer.set_producer(STREAM_SENSOR_METRICS).await.unwrap();
    let mut consumer = broker.client("consumer");
    consumer.set_consumer(STREAM_METRICS, ".*").await.unwrap();

    let rack_a = CompositeActor::spawn(
        "composite-metrics-rack-a",
        Box::new(broker.connector()),
        store.clone(),
    );
    rack_a.connect("inproc://composite-test").unwrap();
    rack_a.config(good.path()).unwrap();

    let rack_b = CompositeActor::spawn(
        "composite-metrics-rack-b",
        Box::new(broker.connector()),
        store.clone(),
    );
    rack_b.connect("inproc://composite-test").unwrap();
    rack_b.config(broken.path()).unwrap();

    tokio::time::sleep(Duration::from_millis(200)).await;

    let now = Utc::now().timestamp();
    producer
        .send(
            "temperature@TH2",
            sensor_reading("temperature", "TH2", "50", 60, now),
        )
        .await
        .unwrap();
    producer
        .send(
            "temperature@TH1",
            sensor_reading("temperature", "TH1", "21", 60, now),
        )
        .await
        .unwrap();

    // Only rack A's metric appears, regardless of rack B's broken script.
    let metric = recv_metric(&mut consumer).await;
    assert_eq!(metric.name, "RackA");
    assert_eq!(metric.value, "21.00");
    assert!(
        timeout(Duration::from_millis(300), consumer.recv())
            .await
            .is_err()
    );

    rack_a.term().unwrap();
    rack_b.term().unwrap();
    rack_a.join().await.unwrap();
    rack_b.join().await.unwrap();
}
