//! Scoped acquisition guards
//!
//! Claim/release and open/close come in pairs that must balance on every
//! exit path, including error paths. These guards release in `Drop` as a
//! backstop and offer consuming `release`/`close` methods for the paths
//! that want to observe the outcome; consuming the guard makes a double
//! release a compile error rather than a runtime bug.

use std::sync::Arc;

use tracing::{debug, warn};

use topology::InterfaceKey;

use crate::error::Result;
use crate::stack::HostStack;

/// Exclusive claim over an interface, released exactly once.
pub struct InterfaceClaim {
    stack: Arc<dyn HostStack>,
    key: InterfaceKey,
    released: bool,
}

impl InterfaceClaim {
    /// Claim the interface. No side effects on failure.
    pub fn acquire(stack: Arc<dyn HostStack>, key: InterfaceKey) -> Result<Self> {
        stack.claim_interface(key)?;
        debug!(device = key.device.0, interface = key.number, "claimed interface");
        Ok(Self {
            stack,
            key,
            released: false,
        })
    }

    /// The claimed interface.
    pub fn key(&self) -> InterfaceKey {
        self.key
    }

    /// Release the claim, reporting the stack's verdict. Consumes the
    /// guard so the claim cannot be released twice.
    pub fn release(mut self) -> Result<()> {
        self.released = true;
        let result = self.stack.release_interface(self.key);
        if result.is_ok() {
            debug!(
                device = self.key.device.0,
                interface = self.key.number,
                "released interface"
            );
        }
        result
    }
}

impl Drop for InterfaceClaim {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        if let Err(err) = self.stack.release_interface(self.key) {
            warn!(
                device = self.key.device.0,
                interface = self.key.number,
                %err,
                "failed to release interface during unwind"
            );
        }
    }
}

/// An open pipe on an endpoint, closed exactly once.
pub struct PipeGuard {
    stack: Arc<dyn HostStack>,
    key: InterfaceKey,
    endpoint: u8,
    closed: bool,
}

impl PipeGuard {
    /// Open the pipe bound to `endpoint`. No side effects on failure.
    pub fn open(stack: Arc<dyn HostStack>, key: InterfaceKey, endpoint: u8) -> Result<Self> {
        stack.open_pipe(key, endpoint)?;
        debug!(device = key.device.0, endpoint, "opened pipe");
        Ok(Self {
            stack,
            key,
            endpoint,
            closed: false,
        })
    }

    /// The endpoint address this pipe is bound to.
    pub fn endpoint(&self) -> u8 {
        self.endpoint
    }

    /// Close the pipe, reporting the stack's verdict.
    pub fn close(mut self) -> Result<()> {
        self.closed = true;
        let result = self.stack.close_pipe(self.key, self.endpoint);
        if result.is_ok() {
            debug!(device = self.key.device.0, endpoint = self.endpoint, "closed pipe");
        }
        result
    }
}

impl Drop for PipeGuard {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Err(err) = self.stack.close_pipe(self.key, self.endpoint) {
            warn!(
                device = self.key.device.0,
                endpoint = self.endpoint,
                %err,
                "failed to close pipe during unwind"
            );
        }
    }
}
