use thiserror::Error;

use crate::engine::evaluator::EvalError;

/// Main error type for the composite metric engine.
#[derive(Debug, Error, Clone)]
pub enum CompositeError {
    /// Descriptor file unreadable or unparsable at CONFIG time.
    #[error("Descriptor error: {0}")]
    Descriptor(String),

    /// Bus connection, subscription, or publication failures.
    #[error("Bus error: {0}")]
    Bus(String),

    /// Script execution failures during an evaluation cycle.
    #[error("Evaluation error: {0}")]
    Eval(#[from] EvalError),

    /// Command received out of phase order, or a malformed bus envelope.
    #[error("Protocol error: {0}")]
    Protocol(String),
}

impl CompositeError {
    /// Convert from std::io::Error (descriptor file reads).
    pub fn from_io(err: std::io::Error) -> Self {
        CompositeError::Descriptor(err.to_string())
    }

    /// Convert from serde_json::Error (descriptor parsing).
    ///
    /// Bus payload decoding reclassifies through [`CompositeError::protocol`]
    /// instead, since a bad envelope is recoverable.
    pub fn from_serde(err: serde_json::Error) -> Self {
        CompositeError::Descriptor(err.to_string())
    }

    /// Creates a protocol error.
    pub fn protocol<S: Into<String>>(message: S) -> Self {
        CompositeError::Protocol(message.into())
    }

    /// Creates a bus error.
    pub fn bus<S: Into<String>>(message: S) -> Self {
        CompositeError::Bus(message.into())
    }

    /// Determines whether this error terminates the actor.
    ///
    /// Only descriptor load failures are fatal: a misconfigured composite
    /// metric can never produce a correct result, and restart is owned by
    /// the external lifecycle manager. Every other failure is isolated to
    /// the command or cycle that raised it; the loop continues and the next
    /// inbound event triggers a fresh attempt with updated inputs.
    pub fn fatal(&self) -> bool {
        match self {
            CompositeError::Descriptor(_) => true,
            CompositeError::Bus(_) => false,
            CompositeError::Eval(_) => false,
            CompositeError::Protocol(_) => false,
        }
    }
}

/// Type alias for Result with CompositeError.
pub type Result<T> = std::result::Result<T, CompositeError>;
