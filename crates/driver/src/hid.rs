//! HID usage lookup and mouse classification
//!
//! A mouse can be recognized two ways: by the boot-interface
//! subclass/protocol pair in the interface descriptor, and by the usage
//! encoded in the first four bytes of the HID report descriptor. Both
//! checks should agree for a well-behaved device; the CLI runs both.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use hoststack::{
    ControlRequest, ControlTarget, HostStack, InterfaceClaim, Result, StackError,
};
use topology::{InterfaceDesc, InterfaceKey};

use crate::requests::{STANDARD_IN_FROM_INTERFACE, StandardRequest};

/// HID interface class code.
pub const HID_CLASS: u8 = 0x03;
/// Boot-interface subclass.
pub const HID_SUBCLASS_BOOT_INTERFACE: u8 = 0x01;
/// Mouse protocol within the boot subclass.
pub const HID_PROTOCOL_MOUSE: u8 = 0x02;
/// Descriptor type of the HID report descriptor.
pub const HID_REPORT_DESCRIPTOR_TYPE: u8 = 0x22;

/// First two report-descriptor bytes of a Generic Desktop device
/// (usage-page item prefix included), read big-endian.
pub const HID_MOUSE_USAGE_PAGE: u16 = 0x0501;
/// Next two bytes for a Mouse usage, read the same way.
pub const HID_MOUSE_USAGE_ID: u16 = 0x0902;

/// How to treat a failed claim before an interface-recipient usage read.
///
/// The USB spec routes the get-report-descriptor request to the interface,
/// so some stacks insist the interface be claimed first while others do
/// not. `BestEffort` tries the read anyway after a failed claim (and logs
/// it); `Require` propagates the claim failure.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ClaimPolicy {
    /// Attempt the usage read even when the claim fails.
    #[default]
    BestEffort,
    /// A failed claim fails the classification.
    Require,
}

/// Whether an interface descriptor declares a boot-type mouse.
pub fn is_boot_mouse(iface: &InterfaceDesc) -> bool {
    iface.class == HID_CLASS
        && iface.subclass == HID_SUBCLASS_BOOT_INTERFACE
        && iface.protocol == HID_PROTOCOL_MOUSE
}

/// Read the usage page and usage id from an interface's HID report
/// descriptor.
///
/// Issues a standard IN get-descriptor with the interface as recipient and
/// interprets the first four returned bytes as two big-endian 16-bit
/// fields. Fewer than four bytes is a short read. The claim discipline is
/// the caller's responsibility here; see [`matches_mouse_usage`] for the
/// claim-wrapping variant.
pub fn report_descriptor_usage(stack: &dyn HostStack, iface: InterfaceKey) -> Result<(u16, u16)> {
    // 256 bytes is plenty: only the first 4 matter and report descriptors
    // exceeding the buffer are simply truncated by the transport.
    let mut buffer = [0u8; 256];
    let n = stack.control_transfer(
        ControlTarget::Interface(iface),
        &ControlRequest {
            request_type: STANDARD_IN_FROM_INTERFACE.into(),
            request: StandardRequest::GetDescriptor.into(),
            value: u16::from(HID_REPORT_DESCRIPTOR_TYPE) << 8,
            index: u16::from(iface.number),
        },
        &mut buffer,
    )?;
    if n < 4 {
        return Err(StackError::ShortRead {
            operation: "get-report-descriptor".into(),
            needed: 4,
            got: n,
        });
    }

    let usage_page = u16::from_be_bytes([buffer[0], buffer[1]]);
    let usage_id = u16::from_be_bytes([buffer[2], buffer[3]]);
    debug!(
        device = iface.device.0,
        interface = iface.number,
        usage_page,
        usage_id,
        "read report descriptor usage"
    );
    Ok((usage_page, usage_id))
}

/// Classify an interface as a mouse by its report-descriptor usage.
///
/// Claims the interface around the read according to `policy` and releases
/// it on every path. A short read means the candidate has no usable
/// usage data and simply does not match.
pub fn matches_mouse_usage(
    stack: &Arc<dyn HostStack>,
    iface: InterfaceKey,
    policy: ClaimPolicy,
) -> Result<bool> {
    let claim = match InterfaceClaim::acquire(stack.clone(), iface) {
        Ok(claim) => Some(claim),
        Err(err) => match policy {
            ClaimPolicy::Require => return Err(err),
            ClaimPolicy::BestEffort => {
                warn!(
                    interface = iface.number,
                    %err,
                    "claim failed, attempting usage read anyway"
                );
                None
            }
        },
    };

    let usage = report_descriptor_usage(stack.as_ref(), iface);

    if let Some(claim) = claim {
        if let Err(err) = claim.release() {
            warn!(interface = iface.number, %err, "failed to release interface after usage read");
        }
    }

    match usage {
        Ok((page, id)) => Ok(page == HID_MOUSE_USAGE_PAGE && id == HID_MOUSE_USAGE_ID),
        Err(StackError::ShortRead { got, .. }) => {
            debug!(
                interface = iface.number,
                got, "report descriptor too short for a usage, not a match"
            );
            Ok(false)
        }
        Err(err) => Err(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use topology::{Direction, EndpointDesc, TransferKind};

    fn interface(class: u8, subclass: u8, protocol: u8) -> InterfaceDesc {
        InterfaceDesc {
            number: 0,
            class,
            subclass,
            protocol,
            endpoints: vec![EndpointDesc {
                address: 0x81,
                kind: TransferKind::Interrupt,
                direction: Direction::In,
                max_packet_size: 4,
            }],
        }
    }

    #[test]
    fn boot_mouse_requires_all_three_fields() {
        assert!(is_boot_mouse(&interface(0x03, 0x01, 0x02)));
        assert!(!is_boot_mouse(&interface(0x03, 0x01, 0x01))); // keyboard
        assert!(!is_boot_mouse(&interface(0x03, 0x00, 0x02))); // not boot
        assert!(!is_boot_mouse(&interface(0x08, 0x01, 0x02))); // not HID
    }

    #[test]
    fn mouse_usage_constants_match_a_generic_desktop_mouse() {
        // Report descriptors of mice start 05 01 09 02: Usage Page
        // (Generic Desktop), Usage (Mouse).
        let bytes = [0x05u8, 0x01, 0x09, 0x02];
        assert_eq!(u16::from_be_bytes([bytes[0], bytes[1]]), HID_MOUSE_USAGE_PAGE);
        assert_eq!(u16::from_be_bytes([bytes[2], bytes[3]]), HID_MOUSE_USAGE_ID);
    }
}
