//! Standard control-transfer requests
//!
//! A control request is a bmRequestType bitmask, a request code and two
//! 16-bit parameters; the helpers here build the standard ones and
//! interpret the transferred length against each request's semantic
//! minimum. A short read is never an error at the transport layer, only
//! relative to what a particular request requires.

use hoststack::{ControlRequest, ControlTarget, HostStack, Result, StackError};
use topology::DeviceId;

/// Specifies the direction of a request.
#[repr(u8)]
#[derive(Copy, Debug, Clone, PartialEq, Eq)]
pub enum Direction {
    Out = 0,
    In = 1,
}

/// Specifies the type of a request.
#[repr(u8)]
#[derive(Copy, Debug, Clone, PartialEq, Eq)]
pub enum RequestKind {
    Standard = 0,
    Class = 1,
    Vendor = 2,
}

/// Specifies the recipient of a request.
#[repr(u8)]
#[derive(Copy, Debug, Clone, PartialEq, Eq)]
pub enum Recipient {
    Device = 0,
    Interface = 1,
    Endpoint = 2,
    Other = 3,
}

/// Helper for composing bmRequestType fields.
#[derive(Copy, Debug, Clone, PartialEq, Eq)]
pub struct RequestType {
    /// Whether data flows to the device (OUT) or to the host (IN).
    pub direction: Direction,
    /// Standard, class or vendor request.
    pub kind: RequestKind,
    /// The recipient the request is delivered to.
    pub recipient: Recipient,
}

impl From<RequestType> for u8 {
    fn from(encoded: RequestType) -> u8 {
        let direction = (encoded.direction as u8) << 7;
        let kind = (encoded.kind as u8) << 5;
        let recipient = encoded.recipient as u8;

        direction | kind | recipient
    }
}

/// Shorthand for a standard read from the device, e.g. get-descriptor.
pub const STANDARD_IN_FROM_DEVICE: RequestType = RequestType {
    direction: Direction::In,
    kind: RequestKind::Standard,
    recipient: Recipient::Device,
};

/// Shorthand for a standard read addressed to an interface. Mind that the
/// interface number goes into the request's index field, and that the
/// interface should be claimed first.
pub const STANDARD_IN_FROM_INTERFACE: RequestType = RequestType {
    direction: Direction::In,
    kind: RequestKind::Standard,
    recipient: Recipient::Interface,
};

/// Standard request codes.
#[repr(u8)]
#[derive(Copy, Debug, Clone, PartialEq, Eq)]
pub enum StandardRequest {
    GetStatus = 0,
    ClearFeature = 1,
    SetFeature = 3,
    SetAddress = 5,
    GetDescriptor = 6,
    SetDescriptor = 7,
    GetConfiguration = 8,
    SetConfiguration = 9,
}

impl From<StandardRequest> for u8 {
    fn from(request: StandardRequest) -> u8 {
        request as u8
    }
}

/// Standard descriptor types.
#[repr(u8)]
#[derive(Copy, Debug, Clone, PartialEq, Eq)]
pub enum DescriptorKind {
    Device = 1,
    Configuration = 2,
    String = 3,
    Interface = 4,
    Endpoint = 5,
}

impl From<DescriptorKind> for u8 {
    fn from(descriptor: DescriptorKind) -> u8 {
        descriptor as u8
    }
}

/// Execute an arbitrary control request against `target`, blocking until
/// it completes or fails. Returns the number of bytes transferred.
pub fn execute_control_request(
    stack: &dyn HostStack,
    target: ControlTarget,
    request_type: RequestType,
    request: u8,
    value: u16,
    index: u16,
    buffer: &mut [u8],
) -> Result<usize> {
    stack.control_transfer(
        target,
        &ControlRequest {
            request_type: request_type.into(),
            request,
            value,
            index,
        },
        buffer,
    )
}

/// Read a descriptor from a device into `buffer`.
///
/// If the buffer is shorter than the full descriptor, it just gets filled;
/// that is not an error. All descriptors carry a length field, so callers
/// that need the full thing can size a second read from the first.
pub fn get_descriptor(
    stack: &dyn HostStack,
    device: DeviceId,
    descriptor_kind: u8,
    index: u8,
    language_id: u16,
    buffer: &mut [u8],
) -> Result<usize> {
    execute_control_request(
        stack,
        ControlTarget::Device(device),
        STANDARD_IN_FROM_DEVICE,
        StandardRequest::GetDescriptor.into(),
        (u16::from(descriptor_kind) << 8) | u16::from(index),
        language_id,
        buffer,
    )
}

/// Read the current configuration number of a device.
///
/// The device answers with a single byte; anything less is a protocol
/// violation and surfaces as a short read.
pub fn get_configuration(stack: &dyn HostStack, device: DeviceId) -> Result<u8> {
    let mut buffer = [0u8; 1];
    let n = execute_control_request(
        stack,
        ControlTarget::Device(device),
        STANDARD_IN_FROM_DEVICE,
        StandardRequest::GetConfiguration.into(),
        0,
        0,
        &mut buffer,
    )?;
    if n < 1 {
        return Err(StackError::ShortRead {
            operation: "get-configuration".into(),
            needed: 1,
            got: n,
        });
    }
    Ok(buffer[0])
}
