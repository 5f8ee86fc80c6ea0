use thiserror::Error;

use crate::register::{Register, Setting};

/// Failures raised by the transport adapter.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The broker could not be reached, refused the session, or never sent a CONNACK.
    #[error("connection to {broker} failed: {reason}")]
    Connection { broker: String, reason: String },

    /// A publish was attempted without an active broker session.
    #[error("not connected to broker")]
    NotConnected,
}

/// Reasons a workflow could not be started.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WorkflowError {
    #[error("cannot start {0}: not connected to broker")]
    NotConnected(&'static str),

    #[error("{setting} value {value} out of range {min}..={max}")]
    OutOfRange {
        setting: Setting,
        value: i64,
        min: i64,
        max: i64,
    },

    #[error("{0} has no write register configured")]
    NotWritable(Setting),

    #[error("unlock password is not a 5-digit number")]
    InvalidUnlockPassword,
}

/// Why a running workflow failed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    #[error("timed out waiting for {awaiting}")]
    Timeout { awaiting: String },

    #[error("verification of register {register} failed: expected {expected}, got {actual}")]
    Mismatch {
        register: Register,
        expected: i64,
        actual: i64,
    },
}

impl FailureReason {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    pub fn is_mismatch(&self) -> bool {
        matches!(self, Self::Mismatch { .. })
    }
}
