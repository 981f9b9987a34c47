//! Error taxonomy for the transport codec.
//!
//! Only two conditions are ever reported as errors: an invalid argument, and
//! running out of memory. Every other anomaly — a malformed frame, a toggle
//! mismatch, a CRC failure, an unrecognized port — is not an error; the
//! affected frame or transfer is silently discarded and the call returns a
//! normal "nothing happened" result instead.

use core::fmt;

pub use cyphal_core::{InvalidValueError, OutOfMemoryError};

/// The two conditions the transport codec can report as an error at its
/// public entry points.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CanardError {
    InvalidValue,
    OutOfMemory,
}

impl fmt::Display for CanardError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CanardError::InvalidValue => f.write_str("invalid argument"),
            CanardError::OutOfMemory => f.write_str("out of memory"),
        }
    }
}

impl From<InvalidValueError> for CanardError {
    fn from(_: InvalidValueError) -> Self {
        CanardError::InvalidValue
    }
}

impl From<OutOfMemoryError> for CanardError {
    fn from(_: OutOfMemoryError) -> Self {
        CanardError::OutOfMemory
    }
}
