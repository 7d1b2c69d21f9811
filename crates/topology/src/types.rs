//! Topology node type definitions
//!
//! Plain data types describing the device tree snapshot. Nothing here
//! performs I/O; the host stack fills these in and the walker reads them.

use serde::{Deserialize, Serialize};

/// Device class code assigned to hubs by the USB spec.
pub const HUB_CLASS: u8 = 0x09;

/// Handle to a device node inside a [`crate::Topology`] arena.
///
/// Ids are assigned by the builder and double as indices into the arena,
/// so lookup is O(1). A handle is only meaningful for the topology snapshot
/// it was taken from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeviceId(pub u32);

/// Handle to one interface of a device's active configuration.
///
/// This is the unit of claiming: the host stack claims and releases
/// interfaces by key, and interface-recipient control requests carry the
/// interface number from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InterfaceKey {
    /// Device the interface belongs to.
    pub device: DeviceId,
    /// Interface number (bInterfaceNumber).
    pub number: u8,
}

/// USB transfer types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferKind {
    Control,
    Interrupt,
    Bulk,
    Isochronous,
}

/// Endpoint direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    In,
    Out,
}

/// A single endpoint of an interface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointDesc {
    /// Endpoint address including the direction bit (e.g. 0x81).
    pub address: u8,
    /// Transfer type.
    pub kind: TransferKind,
    /// Direction.
    pub direction: Direction,
    /// Maximum packet size in bytes (wMaxPacketSize).
    pub max_packet_size: u16,
}

/// An interface of a configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterfaceDesc {
    /// Interface number (bInterfaceNumber).
    pub number: u8,
    /// Interface class (bInterfaceClass).
    pub class: u8,
    /// Interface subclass (bInterfaceSubClass).
    pub subclass: u8,
    /// Interface protocol (bInterfaceProtocol).
    pub protocol: u8,
    /// Endpoints, in descriptor order.
    pub endpoints: Vec<EndpointDesc>,
}

impl InterfaceDesc {
    /// First interrupt-type IN endpoint, if any.
    ///
    /// The HID spec requires one per HID interface and presumes at most
    /// one in practice; the first match is used.
    pub fn interrupt_in_endpoint(&self) -> Option<&EndpointDesc> {
        self.endpoints
            .iter()
            .find(|ep| ep.kind == TransferKind::Interrupt && ep.direction == Direction::In)
    }
}

/// The active configuration of a device.
///
/// A device has at most one active configuration; a device without one is
/// unconfigured and offers no interfaces.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Configuration {
    /// Configuration value (bConfigurationValue).
    pub number: u8,
    /// Interfaces, in descriptor order.
    pub interfaces: Vec<InterfaceDesc>,
}

/// An attachment point on a hub.
///
/// The attached-device reference is an arena handle, not ownership: the
/// device belongs to the topology, the port merely indexes it. The
/// reference is only present while a device is attached.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Port {
    /// Attached device, if any.
    pub attached: Option<DeviceId>,
}

/// Hub-specific state of a device node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubInfo {
    /// Whether this is the virtual root hub aggregating host controllers.
    pub is_root: bool,
    /// Ports in physical order; empty ports have no attached device.
    pub ports: Vec<Port>,
}

/// One node of the topology tree: a device, possibly a hub.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceNode {
    /// This node's handle.
    pub id: DeviceId,
    /// Device class code (bDeviceClass).
    pub device_class: u8,
    /// Hub state; present iff this device is a hub.
    pub hub: Option<HubInfo>,
    /// Active configuration; `None` means unconfigured.
    pub config: Option<Configuration>,
}

impl DeviceNode {
    /// Whether this node is a hub.
    pub fn is_hub(&self) -> bool {
        self.hub.is_some()
    }

    /// Whether this node is the virtual root hub.
    pub fn is_root_hub(&self) -> bool {
        self.hub.as_ref().is_some_and(|h| h.is_root)
    }

    /// Whether the device has an active configuration.
    pub fn is_configured(&self) -> bool {
        self.config.is_some()
    }

    /// The active configuration, if the device is configured.
    pub fn active_config(&self) -> Option<&Configuration> {
        self.config.as_ref()
    }

    /// Attached devices in port order. Empty for non-hubs.
    pub fn attached_devices(&self) -> Vec<DeviceId> {
        self.hub
            .as_ref()
            .map(|h| h.ports.iter().filter_map(|p| p.attached).collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint(address: u8, kind: TransferKind, direction: Direction) -> EndpointDesc {
        EndpointDesc {
            address,
            kind,
            direction,
            max_packet_size: 8,
        }
    }

    #[test]
    fn interrupt_in_endpoint_picks_first_match() {
        let iface = InterfaceDesc {
            number: 0,
            class: 0x03,
            subclass: 0x01,
            protocol: 0x02,
            endpoints: vec![
                endpoint(0x01, TransferKind::Interrupt, Direction::Out),
                endpoint(0x81, TransferKind::Interrupt, Direction::In),
                endpoint(0x82, TransferKind::Interrupt, Direction::In),
            ],
        };

        assert_eq!(iface.interrupt_in_endpoint().unwrap().address, 0x81);
    }

    #[test]
    fn interrupt_in_endpoint_absent_for_bulk_only_interface() {
        let iface = InterfaceDesc {
            number: 0,
            class: 0x08,
            subclass: 0x06,
            protocol: 0x50,
            endpoints: vec![
                endpoint(0x81, TransferKind::Bulk, Direction::In),
                endpoint(0x02, TransferKind::Bulk, Direction::Out),
            ],
        };

        assert!(iface.interrupt_in_endpoint().is_none());
    }

    #[test]
    fn unconfigured_device_offers_no_interfaces() {
        let node = DeviceNode {
            id: DeviceId(1),
            device_class: 0x00,
            hub: None,
            config: None,
        };

        assert!(!node.is_configured());
        assert!(node.active_config().is_none());
        assert!(node.attached_devices().is_empty());
    }
}
