//! Topology arena and builder
//!
//! The topology is a finite tree: every node except the virtual root is
//! attached to exactly one hub port. The walker relies on that shape and
//! performs no cycle detection, so the builder and [`Topology::validate`]
//! are the places where malformed input gets rejected.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{Configuration, DeviceId, DeviceNode, HubInfo, InterfaceDesc, InterfaceKey, Port};

/// Structural errors in a topology snapshot.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TopologyError {
    /// A port references a device id outside the arena.
    #[error("port on device {hub:?} references unknown device {attached:?}")]
    DanglingPort { hub: DeviceId, attached: DeviceId },

    /// A device is attached to more than one port, which would make the
    /// structure a graph rather than a tree.
    #[error("device {0:?} is attached to more than one port")]
    MultipleAttachment(DeviceId),

    /// A non-root device is not reachable from any port.
    #[error("device {0:?} is not attached to any port")]
    Orphan(DeviceId),

    /// The root node is missing or is not a hub.
    #[error("topology root is not a hub")]
    RootNotHub,
}

/// An immutable snapshot of the device tree.
///
/// Node ids double as indices into the arena. Snapshots are cheap to clone
/// and safe to share between threads; nothing in this crate mutates them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Topology {
    nodes: Vec<DeviceNode>,
    root: DeviceId,
}

impl Topology {
    /// Handle of the virtual root hub.
    pub fn root(&self) -> DeviceId {
        self.root
    }

    /// Look up a node by handle.
    pub fn device(&self, id: DeviceId) -> Option<&DeviceNode> {
        self.nodes.get(id.0 as usize)
    }

    /// Look up an interface of a device's active configuration.
    pub fn interface(&self, key: InterfaceKey) -> Option<&InterfaceDesc> {
        self.device(key.device)?
            .active_config()?
            .interfaces
            .iter()
            .find(|iface| iface.number == key.number)
    }

    /// Number of devices in the snapshot, hubs included.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the snapshot holds no devices at all.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Iterate over every node in arena order.
    pub fn iter(&self) -> impl Iterator<Item = &DeviceNode> {
        self.nodes.iter()
    }

    /// Check the structural invariants: the root is a hub, every port
    /// reference resolves, and every non-root device hangs off exactly one
    /// port.
    pub fn validate(&self) -> Result<(), TopologyError> {
        let root = self.device(self.root).ok_or(TopologyError::RootNotHub)?;
        if !root.is_hub() {
            return Err(TopologyError::RootNotHub);
        }

        let mut attachment_count = vec![0u32; self.nodes.len()];
        for node in &self.nodes {
            let Some(hub) = &node.hub else { continue };
            for port in &hub.ports {
                let Some(attached) = port.attached else { continue };
                match attachment_count.get_mut(attached.0 as usize) {
                    Some(count) => *count += 1,
                    None => {
                        return Err(TopologyError::DanglingPort {
                            hub: node.id,
                            attached,
                        });
                    }
                }
            }
        }

        for node in &self.nodes {
            let count = attachment_count[node.id.0 as usize];
            if node.id == self.root {
                if count != 0 {
                    return Err(TopologyError::MultipleAttachment(node.id));
                }
            } else if count == 0 {
                return Err(TopologyError::Orphan(node.id));
            } else if count > 1 {
                return Err(TopologyError::MultipleAttachment(node.id));
            }
        }

        Ok(())
    }
}

/// Incremental topology builder.
///
/// Creates the virtual root hub up front; devices and hubs are then added
/// under an existing hub, each occupying a fresh port. The host stack
/// backends use this to assemble snapshots, and tests use it to script
/// arbitrary trees.
#[derive(Debug)]
pub struct TopologyBuilder {
    nodes: Vec<DeviceNode>,
    root: DeviceId,
}

impl TopologyBuilder {
    /// Start a new topology containing only the virtual root hub.
    pub fn new() -> Self {
        let root = DeviceId(0);
        let nodes = vec![DeviceNode {
            id: root,
            device_class: crate::types::HUB_CLASS,
            hub: Some(HubInfo {
                is_root: true,
                ports: Vec::new(),
            }),
            config: None,
        }];
        Self { nodes, root }
    }

    /// Handle of the virtual root hub.
    pub fn root(&self) -> DeviceId {
        self.root
    }

    /// Attach a device to the next port of `parent`.
    ///
    /// Panics if `parent` is not a hub; attaching to a leaf is a
    /// programming error, not a runtime condition.
    pub fn add_device(
        &mut self,
        parent: DeviceId,
        device_class: u8,
        config: Option<Configuration>,
    ) -> DeviceId {
        let id = DeviceId(self.nodes.len() as u32);
        self.nodes.push(DeviceNode {
            id,
            device_class,
            hub: None,
            config,
        });
        self.attach(parent, id);
        id
    }

    /// Attach a hub with `ports` empty ports to the next port of `parent`.
    pub fn add_hub(&mut self, parent: DeviceId, ports: usize) -> DeviceId {
        let id = DeviceId(self.nodes.len() as u32);
        self.nodes.push(DeviceNode {
            id,
            device_class: crate::types::HUB_CLASS,
            hub: Some(HubInfo {
                is_root: false,
                ports: vec![Port { attached: None }; ports],
            }),
            config: None,
        });
        self.attach(parent, id);
        id
    }

    /// Attach a device at an explicit zero-based port index of `parent`,
    /// growing the port list (with empty ports) as needed. Used by the
    /// host stack backends, which know the physical port a device sits on.
    ///
    /// Panics if `parent` is not a hub or if the port is already occupied.
    pub fn add_device_at_port(
        &mut self,
        parent: DeviceId,
        port_index: usize,
        device_class: u8,
        config: Option<Configuration>,
    ) -> DeviceId {
        let id = DeviceId(self.nodes.len() as u32);
        self.nodes.push(DeviceNode {
            id,
            device_class,
            hub: None,
            config,
        });
        self.attach_at(parent, port_index, id);
        id
    }

    /// Attach a hub at an explicit zero-based port index of `parent`; the
    /// new hub starts with `ports` empty ports of its own.
    pub fn add_hub_at_port(
        &mut self,
        parent: DeviceId,
        port_index: usize,
        ports: usize,
    ) -> DeviceId {
        let id = DeviceId(self.nodes.len() as u32);
        self.nodes.push(DeviceNode {
            id,
            device_class: crate::types::HUB_CLASS,
            hub: Some(HubInfo {
                is_root: false,
                ports: vec![Port { attached: None }; ports],
            }),
            config: None,
        });
        self.attach_at(parent, port_index, id);
        id
    }

    /// Give an already-added device an active configuration.
    pub fn set_config(&mut self, device: DeviceId, config: Configuration) {
        self.nodes[device.0 as usize].config = Some(config);
    }

    /// Add an explicitly empty port to a hub.
    pub fn add_empty_port(&mut self, hub: DeviceId) {
        let node = &mut self.nodes[hub.0 as usize];
        node.hub
            .as_mut()
            .expect("add_empty_port target must be a hub")
            .ports
            .push(Port { attached: None });
    }

    /// Validate and freeze the snapshot.
    pub fn build(self) -> Result<Topology, TopologyError> {
        let topo = Topology {
            nodes: self.nodes,
            root: self.root,
        };
        topo.validate()?;
        Ok(topo)
    }

    fn attach(&mut self, parent: DeviceId, child: DeviceId) {
        let node = &mut self.nodes[parent.0 as usize];
        let hub = node.hub.as_mut().expect("attach target must be a hub");
        // Reuse the first empty port before growing the port list, so
        // pre-declared empty ports fill in physical order.
        if let Some(port) = hub.ports.iter_mut().find(|p| p.attached.is_none()) {
            port.attached = Some(child);
        } else {
            hub.ports.push(Port {
                attached: Some(child),
            });
        }
    }

    fn attach_at(&mut self, parent: DeviceId, port_index: usize, child: DeviceId) {
        let node = &mut self.nodes[parent.0 as usize];
        let hub = node.hub.as_mut().expect("attach target must be a hub");
        if hub.ports.len() <= port_index {
            hub.ports.resize(port_index + 1, Port { attached: None });
        }
        let port = &mut hub.ports[port_index];
        assert!(port.attached.is_none(), "port already occupied");
        port.attached = Some(child);
    }
}

impl Default for TopologyBuilder {
    fn default() -> Self {
        Self::new()
    }
}
