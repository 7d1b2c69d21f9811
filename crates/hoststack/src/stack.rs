//! The `HostStack` trait
//!
//! Everything the core needs from the underlying USB stack, expressed as a
//! blocking, `&self` interface. Implementations use interior mutability;
//! the streaming session shares a stack between threads via
//! `Arc<dyn HostStack>`.

use topology::{DeviceId, InterfaceKey, Topology};

use crate::error::Result;

/// Recipient of a control request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlTarget {
    /// Device-recipient request on the default control pipe.
    Device(DeviceId),
    /// Interface-recipient request. Most implementations expect the
    /// interface to be claimed first; see the claim discipline notes on
    /// [`crate::InterfaceClaim`].
    Interface(InterfaceKey),
}

impl ControlTarget {
    /// The device the request is routed through.
    pub fn device(&self) -> DeviceId {
        match self {
            Self::Device(id) => *id,
            Self::Interface(key) => key.device,
        }
    }
}

/// Setup packet of a control transfer, minus the data stage. The caller
/// owns the data buffer and learns the transferred length from the return
/// value of [`HostStack::control_transfer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlRequest {
    /// bmRequestType bitmask (direction, type, recipient).
    pub request_type: u8,
    /// bRequest code.
    pub request: u8,
    /// wValue parameter.
    pub value: u16,
    /// wIndex parameter.
    pub index: u16,
}

/// Interface to the host USB stack.
///
/// All methods block the calling thread. Control transfers complete or
/// fail within a bound enforced by the transport; interrupt submissions
/// block without bound until data arrives, the transfer fails, or
/// [`HostStack::abort_submissions`] unblocks them.
pub trait HostStack: Send + Sync {
    /// Take a snapshot of the device tree, rooted at the virtual root hub.
    ///
    /// Fails with [`crate::StackError::Permission`] if the caller may not
    /// access the USB subsystem, or a transport error if the stack is
    /// unavailable.
    fn topology(&self) -> Result<Topology>;

    /// Claim exclusive access to an interface. Fails without side effects
    /// with [`crate::StackError::Unavailable`] if another owner holds it.
    fn claim_interface(&self, iface: InterfaceKey) -> Result<()>;

    /// Release a previously claimed interface.
    fn release_interface(&self, iface: InterfaceKey) -> Result<()>;

    /// Open the pipe bound to an endpoint of a claimed interface. Open is
    /// a precondition for submitting transfers on non-control endpoints.
    fn open_pipe(&self, iface: InterfaceKey, endpoint: u8) -> Result<()>;

    /// Close an open pipe. Pending submissions should be aborted first.
    fn close_pipe(&self, iface: InterfaceKey, endpoint: u8) -> Result<()>;

    /// Submit `buffer` on an open interrupt pipe and block until the
    /// device fills it, the transfer fails, or an abort is delivered.
    /// Returns the number of bytes received. An aborted submission
    /// surfaces as a transport error.
    fn submit_interrupt(&self, iface: InterfaceKey, endpoint: u8, buffer: &mut [u8])
    -> Result<usize>;

    /// Abort all pending submissions on a pipe, unblocking any in-flight
    /// receive without destroying the pipe itself.
    fn abort_submissions(&self, iface: InterfaceKey, endpoint: u8) -> Result<()>;

    /// Execute a control transfer against `target`, blocking until it
    /// completes or fails. For inbound transfers the return value is the
    /// number of bytes placed in `buffer`, which may be fewer than the
    /// buffer length; a short read is not an error at this layer.
    fn control_transfer(
        &self,
        target: ControlTarget,
        request: &ControlRequest,
        buffer: &mut [u8],
    ) -> Result<usize>;
}
