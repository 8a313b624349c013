//! # Descriptor
//!
//! The JSON configuration unit defining one composite metric: the ordered
//! list of input topics and the evaluation script run against them. It is
//! produced by the external configurator and loaded exactly once per actor;
//! there is no hot patch of inputs.

use crate::engine::error::{CompositeError, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;

/// One composite metric's configuration: which topics feed it and the Lua
/// script that folds them into a derived value.
///
/// ```json
/// {
///     "in": ["temperature@TH1", "temperature@TH2"],
///     "evaluation": "..."
/// }
/// ```
///
/// The script reads a global table `mt` (topic -> number, stale inputs
/// absent) and returns exactly three values: `(topic, value, unit)`.
#[derive(Debug, Clone, Deserialize)]
pub struct Descriptor {
    /// Input topics, in configurator order. Duplicates collapse to a single
    /// cache slot when the actor is configured.
    #[serde(rename = "in")]
    pub inputs: Vec<String>,
    /// Opaque script body executed on every evaluation cycle.
    pub evaluation: String,
}

impl Descriptor {
    /// Parse a descriptor from a JSON string. Malformed JSON or missing
    /// members is an error; at CONFIG time the actor treats it as fatal.
    pub fn from_json(json_str: &str) -> Result<Self> {
        serde_json::from_str(json_str).map_err(CompositeError::from_serde)
    }

    /// Read and parse a descriptor file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let json_str = fs::read_to_string(path).map_err(CompositeError::from_io)?;
        Self::from_json(&json_str)
    }
}
