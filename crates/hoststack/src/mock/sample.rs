//! Topology fixtures shared by tests across the workspace.

use topology::{
    Configuration, Direction, EndpointDesc, InterfaceDesc, InterfaceKey, Topology,
    TopologyBuilder, TransferKind,
};

/// Interrupt-in endpoint address used by the mouse fixtures.
pub const MOUSE_ENDPOINT: u8 = 0x81;

/// Max packet size of the mouse fixture's interrupt endpoint.
pub const MOUSE_MAX_PACKET: u16 = 4;

/// A HID boot-mouse interface with one interrupt-in endpoint.
pub fn boot_mouse_interface(number: u8) -> InterfaceDesc {
    InterfaceDesc {
        number,
        class: 0x03,
        subclass: 0x01,
        protocol: 0x02,
        endpoints: vec![EndpointDesc {
            address: MOUSE_ENDPOINT,
            kind: TransferKind::Interrupt,
            direction: Direction::In,
            max_packet_size: MOUSE_MAX_PACKET,
        }],
    }
}

/// A HID interface that (in violation of the HID spec) has no
/// interrupt-in endpoint.
pub fn broken_hid_interface(number: u8) -> InterfaceDesc {
    InterfaceDesc {
        number,
        class: 0x03,
        subclass: 0x00,
        protocol: 0x00,
        endpoints: vec![EndpointDesc {
            address: 0x01,
            kind: TransferKind::Interrupt,
            direction: Direction::Out,
            max_packet_size: 8,
        }],
    }
}

/// Root hub with a single configured boot mouse. Returns the topology and
/// the mouse interface key.
pub fn mouse_topology() -> (Topology, InterfaceKey) {
    let mut builder = TopologyBuilder::new();
    let root = builder.root();
    let mouse = builder.add_device(
        root,
        0x00,
        Some(Configuration {
            number: 1,
            interfaces: vec![boot_mouse_interface(0)],
        }),
    );
    let topo = builder.build().expect("fixture topology is valid");
    (
        topo,
        InterfaceKey {
            device: mouse,
            number: 0,
        },
    )
}
