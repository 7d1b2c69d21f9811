//! Generic tree walker
//!
//! Recursive pre-order traversal over a [`Topology`]: parent before
//! children, children in port order. Two traversal strategies exist side
//! by side, one over the derived attached-device lists and one over the
//! raw port lists, because the port view is the only one that can show
//! empty attachment points. Both visit every device exactly once.
//!
//! The topology is assumed to be a finite tree (see [`Topology::validate`]);
//! no cycle detection happens here.

use std::fmt::Write;

use crate::tree::Topology;
use crate::types::{DeviceId, DeviceNode, InterfaceKey};

/// Collect every device under `root` (inclusive) satisfying `predicate`,
/// in pre-order. Hubs are devices too and take part in the match.
pub fn collect<F>(topo: &Topology, root: DeviceId, predicate: F) -> Vec<DeviceId>
where
    F: Fn(&DeviceNode) -> bool,
{
    let mut found = Vec::new();
    collect_into(topo, root, &predicate, &mut found);
    found
}

fn collect_into<F>(topo: &Topology, id: DeviceId, predicate: &F, found: &mut Vec<DeviceId>)
where
    F: Fn(&DeviceNode) -> bool,
{
    let Some(node) = topo.device(id) else { return };

    if predicate(node) {
        found.push(id);
    }

    for child in node.attached_devices() {
        collect_into(topo, child, predicate, found);
    }
}

/// Same contract as [`collect`], but walks the hubs' port lists instead of
/// their attached-device lists. Ports without a device contribute nothing.
pub fn collect_by_ports<F>(topo: &Topology, root: DeviceId, predicate: F) -> Vec<DeviceId>
where
    F: Fn(&DeviceNode) -> bool,
{
    let mut found = Vec::new();
    collect_by_ports_into(topo, root, &predicate, &mut found);
    found
}

fn collect_by_ports_into<F>(topo: &Topology, id: DeviceId, predicate: &F, found: &mut Vec<DeviceId>)
where
    F: Fn(&DeviceNode) -> bool,
{
    let Some(node) = topo.device(id) else { return };

    if predicate(node) {
        found.push(id);
    }

    let Some(hub) = &node.hub else { return };
    for port in &hub.ports {
        if let Some(attached) = port.attached {
            collect_by_ports_into(topo, attached, predicate, found);
        }
    }
}

/// All devices in the topology with the given device class code.
pub fn devices_with_class(topo: &Topology, device_class: u8) -> Vec<DeviceId> {
    collect(topo, topo.root(), |node| node.device_class == device_class)
}

/// All interfaces with the given interface class, across every configured
/// device under `root`. Unconfigured devices contribute nothing: the only
/// communication possible with them is a limited set of default-control-pipe
/// requests, so there is no interface to hand out.
pub fn interfaces_with_class(
    topo: &Topology,
    root: DeviceId,
    interface_class: u8,
) -> Vec<InterfaceKey> {
    let mut found = Vec::new();
    for id in collect(topo, root, |_| true) {
        let Some(node) = topo.device(id) else { continue };
        let Some(config) = node.active_config() else { continue };
        for iface in &config.interfaces {
            if iface.class == interface_class {
                found.push(InterfaceKey {
                    device: id,
                    number: iface.number,
                });
            }
        }
    }
    found
}

/// Which traversal a tree rendering should use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TreeStyle {
    /// Walk the derived attached-device lists; empty ports are skipped
    /// silently.
    AttachedDevices,
    /// Walk the port lists; ports without a device render an explicit
    /// marker line.
    Ports,
}

const INDENT: &str = "  ";

/// Render the tree as indented text, one line per device (and, in
/// [`TreeStyle::Ports`], per empty port). The walker itself does no
/// printing; the caller decides where the dump goes.
pub fn render_tree(topo: &Topology, style: TreeStyle) -> String {
    let mut out = String::new();
    render_node(topo, topo.root(), style, 0, &mut out);
    out
}

fn render_node(topo: &Topology, id: DeviceId, style: TreeStyle, depth: usize, out: &mut String) {
    let Some(node) = topo.device(id) else { return };

    let prefix = INDENT.repeat(depth);
    let label = if node.is_root_hub() {
        "Virtual root hub".to_string()
    } else if node.is_hub() {
        "Hub".to_string()
    } else {
        format!("Device (class {:#04x})", node.device_class)
    };
    let _ = writeln!(out, "{prefix}{label}");

    let Some(hub) = &node.hub else { return };
    match style {
        TreeStyle::AttachedDevices => {
            for port in &hub.ports {
                if let Some(attached) = port.attached {
                    render_node(topo, attached, style, depth + 1, out);
                }
            }
        }
        TreeStyle::Ports => {
            for port in &hub.ports {
                match port.attached {
                    Some(attached) => render_node(topo, attached, style, depth + 1, out),
                    None => {
                        let _ = writeln!(out, "{}{}Port (empty)", prefix, INDENT);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::TopologyBuilder;
    use crate::types::{Configuration, HUB_CLASS, InterfaceDesc};

    fn hid_interface(number: u8) -> InterfaceDesc {
        InterfaceDesc {
            number,
            class: 0x03,
            subclass: 0x01,
            protocol: 0x02,
            endpoints: Vec::new(),
        }
    }

    #[test]
    fn collect_is_preorder_parent_before_children() {
        let mut builder = TopologyBuilder::new();
        let root = builder.root();
        let hub = builder.add_hub(root, 2);
        let a = builder.add_device(hub, 0x01, None);
        let b = builder.add_device(hub, 0x02, None);
        let c = builder.add_device(root, 0x03, None);
        let topo = builder.build().unwrap();

        let order = collect(&topo, topo.root(), |_| true);
        assert_eq!(order, vec![root, hub, a, b, c]);
    }

    #[test]
    fn interfaces_with_class_ignores_unconfigured_devices() {
        let mut builder = TopologyBuilder::new();
        let root = builder.root();
        let configured = builder.add_device(root, 0x00, None);
        builder.set_config(
            configured,
            Configuration {
                number: 1,
                interfaces: vec![hid_interface(0), hid_interface(1)],
            },
        );
        // Same interface class, but no active configuration.
        builder.add_device(root, 0x00, None);
        let topo = builder.build().unwrap();

        let found = interfaces_with_class(&topo, topo.root(), 0x03);
        assert_eq!(found.len(), 2);
        assert!(found.iter().all(|key| key.device == configured));
    }

    #[test]
    fn ports_rendering_marks_empty_ports() {
        let mut builder = TopologyBuilder::new();
        let root = builder.root();
        let hub = builder.add_hub(root, 3);
        builder.add_device(hub, 0x03, None);
        let topo = builder.build().unwrap();

        let by_ports = render_tree(&topo, TreeStyle::Ports);
        assert_eq!(by_ports.matches("Port (empty)").count(), 2);

        let by_devices = render_tree(&topo, TreeStyle::AttachedDevices);
        assert!(!by_devices.contains("Port (empty)"));
        // Both renderings show the same devices.
        assert_eq!(by_devices.matches("Hub").count(), by_ports.matches("Hub").count());
    }

    #[test]
    fn hub_class_predicate_matches_hubs_only() {
        let mut builder = TopologyBuilder::new();
        let root = builder.root();
        builder.add_hub(root, 1);
        builder.add_device(root, 0xFF, None);
        let topo = builder.build().unwrap();

        let hubs = devices_with_class(&topo, HUB_CLASS);
        assert_eq!(hubs.len(), 2); // virtual root included
        assert!(hubs.iter().all(|id| topo.device(*id).unwrap().is_hub()));
    }
}
