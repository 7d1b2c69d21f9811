//! Error taxonomy of the host stack boundary
//!
//! Low-level failures are converted into one of these kinds at the
//! smallest enclosing operation. Only [`StackError::Permission`] aborts a
//! run; everything else is scoped to the candidate device or interface
//! being examined.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StackError {
    /// No access to the USB subsystem. Fatal: the whole run stops.
    #[error("access to the USB subsystem was denied: {0}")]
    Permission(String),

    /// A submitted transfer failed (hardware not responding, stall,
    /// timeout, abort). Recoverable: skip the candidate, continue.
    #[error("transfer failed during {operation}: {reason}")]
    Transport { operation: String, reason: String },

    /// An inbound transfer returned fewer bytes than the semantic minimum
    /// for the request. The transfer itself succeeded; the candidate just
    /// has no usable data.
    #[error("{operation} returned {got} bytes, expected at least {needed}")]
    ShortRead {
        operation: String,
        needed: usize,
        got: usize,
    },

    /// A claim failed because another owner holds the interface.
    #[error("interface {interface} is unavailable: {reason}")]
    Unavailable { interface: u8, reason: String },

    /// The device lacks something its declared class requires, e.g. a HID
    /// interface without an interrupt-in endpoint. Fatal for that device
    /// only.
    #[error("device violates its class profile: {0}")]
    ConfigurationViolation(String),
}

impl StackError {
    /// Shorthand for a transport failure with operation context.
    pub fn transport(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Transport {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    /// Whether this error should abort the whole run rather than just the
    /// current candidate.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Permission(_))
    }
}

/// Type alias for host stack results.
pub type Result<T> = std::result::Result<T, StackError>;
