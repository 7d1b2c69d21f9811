//! USB topology model for rust-usb-explorer
//!
//! This crate defines the read-only device tree handed out by the host
//! stack: devices, hubs, ports, configurations, interfaces and endpoints,
//! plus the generic tree walker used to enumerate and filter them.
//!
//! The tree is arena-owned: a [`Topology`] holds every node in a flat
//! vector and nodes refer to each other through [`DeviceId`] handles, so a
//! port can index its attached device without an ownership cycle.
//!
//! # Example
//!
//! ```
//! use topology::{TopologyBuilder, HUB_CLASS, walk};
//!
//! let mut builder = TopologyBuilder::new();
//! let root = builder.root();
//! let hub = builder.add_hub(root, 2);
//! builder.add_device(hub, 0x03, None);
//!
//! let topo = builder.build().unwrap();
//! let hubs = walk::devices_with_class(&topo, HUB_CLASS);
//! assert_eq!(hubs.len(), 2); // virtual root + the one real hub
//! ```

pub mod tree;
pub mod types;
pub mod walk;

pub use tree::{Topology, TopologyBuilder, TopologyError};
pub use types::{
    Configuration, DeviceId, DeviceNode, Direction, EndpointDesc, HUB_CLASS, HubInfo,
    InterfaceDesc, InterfaceKey, Port, TransferKind,
};
pub use walk::{TreeStyle, collect, collect_by_ports, devices_with_class, interfaces_with_class, render_tree};
