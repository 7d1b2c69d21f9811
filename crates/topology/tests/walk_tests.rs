//! Tree walker integration tests
//!
//! Covers the traversal guarantees: pre-order visit-once, equivalence of
//! the attached-device and port walks, and the hub/non-hub filtering
//! scenario used by the control-pipe tooling.
//!
//! Run with: `cargo test -p topology --test walk_tests`

use std::collections::BTreeSet;

use topology::{
    Configuration, DeviceId, HUB_CLASS, InterfaceDesc, TopologyBuilder, TreeStyle, collect,
    collect_by_ports, devices_with_class, render_tree, walk,
};

/// A root hub with a nested hub chain, some empty ports and a few leaves.
fn deep_topology() -> topology::Topology {
    let mut builder = TopologyBuilder::new();
    let root = builder.root();
    let hub1 = builder.add_hub(root, 4);
    let hub2 = builder.add_hub(hub1, 2);
    builder.add_device(hub2, 0x03, None);
    builder.add_device(hub2, 0x08, None);
    builder.add_device(hub1, 0xFF, None);
    builder.add_device(root, 0x03, None);
    builder.add_empty_port(root);
    builder.build().unwrap()
}

#[test]
fn collect_visits_each_node_exactly_once() {
    let topo = deep_topology();

    let visited = collect(&topo, topo.root(), |_| true);
    assert_eq!(visited.len(), topo.len());

    let unique: BTreeSet<DeviceId> = visited.iter().copied().collect();
    assert_eq!(unique.len(), visited.len());
}

#[test]
fn collect_is_preorder() {
    let topo = deep_topology();

    let visited = collect(&topo, topo.root(), |_| true);
    // Every hub must appear before all devices attached to it.
    for (idx, id) in visited.iter().enumerate() {
        for child in topo.device(*id).unwrap().attached_devices() {
            let child_idx = visited.iter().position(|v| *v == child).unwrap();
            assert!(child_idx > idx, "child {child:?} visited before its hub {id:?}");
        }
    }
}

#[test]
fn port_walk_and_device_walk_agree_for_any_class_filter() {
    let topo = deep_topology();

    for class in [HUB_CLASS, 0x03, 0x08, 0xFF, 0x42] {
        let by_devices: BTreeSet<DeviceId> =
            collect(&topo, topo.root(), |n| n.device_class == class)
                .into_iter()
                .collect();
        let by_ports: BTreeSet<DeviceId> =
            collect_by_ports(&topo, topo.root(), |n| n.device_class == class)
                .into_iter()
                .collect();
        assert_eq!(by_devices, by_ports, "class {class:#04x}");
    }
}

#[test]
fn port_walk_visits_each_node_exactly_once() {
    let topo = deep_topology();

    let visited = collect_by_ports(&topo, topo.root(), |_| true);
    assert_eq!(visited.len(), topo.len());
}

#[test]
fn hub_filter_splits_hubs_from_devices() {
    // Root hub with one non-hub device of class 0xFF and one hub.
    let mut builder = TopologyBuilder::new();
    let root = builder.root();
    let vendor_device = builder.add_device(root, 0xFF, None);
    let hub = builder.add_hub(root, 2);
    let topo = builder.build().unwrap();

    let hubs = devices_with_class(&topo, HUB_CLASS);
    assert_eq!(hubs, vec![root, hub]);

    let all = collect(&topo, topo.root(), |_| true);
    let non_hubs: Vec<DeviceId> = all.into_iter().filter(|id| !hubs.contains(id)).collect();
    assert_eq!(non_hubs, vec![vendor_device]);
}

#[test]
fn interface_filter_requires_active_configuration() {
    let mut builder = TopologyBuilder::new();
    let root = builder.root();
    let hub = builder.add_hub(root, 1);
    let dev = builder.add_device(hub, 0x00, None);
    builder.set_config(
        dev,
        Configuration {
            number: 1,
            interfaces: vec![InterfaceDesc {
                number: 3,
                class: 0x03,
                subclass: 0x01,
                protocol: 0x02,
                endpoints: Vec::new(),
            }],
        },
    );
    let topo = builder.build().unwrap();

    let found = walk::interfaces_with_class(&topo, topo.root(), 0x03);
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].device, dev);
    assert_eq!(found[0].number, 3);

    // The hub itself is unconfigured and contributes nothing.
    assert!(walk::interfaces_with_class(&topo, hub, 0x03).is_empty());
}

#[test]
fn renderings_expose_the_same_devices() {
    let topo = deep_topology();

    let by_devices = render_tree(&topo, TreeStyle::AttachedDevices);
    let by_ports = render_tree(&topo, TreeStyle::Ports);

    for needle in ["Virtual root hub", "Hub", "Device"] {
        assert_eq!(
            by_devices.matches(needle).count(),
            by_ports.matches(needle).count(),
            "marker {needle:?} count differs between renderings"
        );
    }
    assert!(by_ports.contains("Port (empty)"));
    assert!(!by_devices.contains("Port (empty)"));
}
