//! # Metric Envelope
//!
//! The per-sensor metric message carried on the bus streams, both inbound
//! (raw sensor readings) and outbound (derived composite metrics). Only the
//! fields the engine reads and writes are modeled; the envelope is encoded
//! as JSON on the wire.

use crate::engine::error::{CompositeError, Result};
use serde::{Deserialize, Serialize};

/// A metric sample: `type@name` identifies the measurement and asset, the
/// value travels as a decimal string, and `time + ttl` bounds its validity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricEnvelope {
    /// Measurement type, e.g. `temperature` or `average.humidity`.
    #[serde(rename = "type")]
    pub metric_type: String,
    /// Asset the measurement belongs to, e.g. `TH1` or `Rack01`.
    pub name: String,
    /// Decimal string; outbound values carry exactly two fractional digits.
    pub value: String,
    pub unit: String,
    /// Seconds after `time` during which the value is considered valid.
    pub ttl: u32,
    /// Epoch seconds at which the value was taken (inbound) or computed
    /// (outbound).
    pub time: i64,
}

impl MetricEnvelope {
    /// Encode for bus transport.
    pub fn encode(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(CompositeError::from_serde)
    }

    /// Decode a bus payload. Undecodable payloads are a recoverable
    /// condition for the actor (logged and dropped), so the serde error
    /// is classified as a protocol error, not a descriptor error.
    pub fn decode(payload: &[u8]) -> Result<Self> {
        serde_json::from_slice(payload)
            .map_err(|e| CompositeError::protocol(format!("undecodable envelope: {e}")))
    }

    /// The deadline past which this sample is stale.
    pub fn valid_till(&self) -> i64 {
        self.time + i64::from(self.ttl)
    }
}
