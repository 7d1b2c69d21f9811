//! rusb-backed host stack
//!
//! Bridges the [`HostStack`] boundary onto libusb. A topology snapshot
//! enumerates the bus and rebuilds the device registry; claim, pipe and
//! transfer calls then resolve device ids through that registry. libusb
//! has no first-class pipe objects, so pipes are bookkeeping here: open
//! tracks state and abort flips a flag the interrupt poll loop watches.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rusb::{Context, Device, DeviceHandle, UsbContext};
use tracing::{debug, warn};

use hoststack::{ControlRequest, ControlTarget, HostStack, Result, StackError};
use topology::{
    Configuration, DeviceId, Direction, EndpointDesc, HUB_CLASS, InterfaceDesc, InterfaceKey,
    Topology, TopologyBuilder, TransferKind,
};

const CONTROL_TIMEOUT: Duration = Duration::from_secs(5);

/// Poll granularity of blocking interrupt submissions. Short enough that
/// an abort is observed promptly, long enough to stay off the CPU.
const INTERRUPT_POLL_TIMEOUT: Duration = Duration::from_millis(100);

/// Bus position of a device, stable for the lifetime of an attachment.
type BusKey = (u8, u8);

pub struct LibusbStack {
    context: Context,
    inner: Mutex<Registry>,
}

/// Mapping from topology ids to live rusb objects. Rebuilt by every
/// topology snapshot; handles are opened lazily and kept for reuse.
#[derive(Default)]
struct Registry {
    devices: HashMap<DeviceId, Device<Context>>,
    handles: HashMap<DeviceId, Arc<DeviceHandle<Context>>>,
    claimed: HashSet<InterfaceKey>,
    pipes: HashMap<(InterfaceKey, u8), PipeState>,
}

struct PipeState {
    open: bool,
    abort: Arc<AtomicBool>,
}

impl LibusbStack {
    pub fn new() -> Result<Self> {
        let context = Context::new()
            .map_err(|e| map_rusb_error("initialize libusb context", e))?;
        Ok(Self {
            context,
            inner: Mutex::new(Registry::default()),
        })
    }

    /// Handle for a device, opening it on first use.
    fn handle_for(&self, device: DeviceId) -> Result<Arc<DeviceHandle<Context>>> {
        let mut reg = self.lock();
        if let Some(handle) = reg.handles.get(&device) {
            return Ok(handle.clone());
        }
        let rusb_device = reg.devices.get(&device).ok_or_else(|| {
            StackError::transport("open device", "device not in the current topology snapshot")
        })?;
        let handle = Arc::new(rusb_device.open().map_err(|e| match e {
            rusb::Error::Access => StackError::Permission(e.to_string()),
            other => map_rusb_error("open device", other),
        })?);
        debug!(device = device.0, "opened device");
        reg.handles.insert(device, handle.clone());
        Ok(handle)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Registry> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl HostStack for LibusbStack {
    fn topology(&self) -> Result<Topology> {
        let list = self
            .context
            .devices()
            .map_err(|e| match e {
                rusb::Error::Access => StackError::Permission(e.to_string()),
                other => map_rusb_error("enumerate devices", other),
            })?;

        // Index the bus: roots are devices without a parent, children are
        // keyed by their parent's bus position.
        let mut by_key: HashMap<BusKey, Device<Context>> = HashMap::new();
        let mut children: HashMap<BusKey, Vec<(u8, BusKey)>> = HashMap::new();
        let mut roots: Vec<BusKey> = Vec::new();

        for device in list.iter() {
            let key = (device.bus_number(), device.address());
            match device.get_parent() {
                Some(parent) => {
                    children
                        .entry((parent.bus_number(), parent.address()))
                        .or_default()
                        .push((device.port_number(), key));
                }
                None => roots.push(key),
            }
            by_key.insert(key, device);
        }
        roots.sort_unstable();
        for ports in children.values_mut() {
            ports.sort_unstable();
        }

        let mut builder = TopologyBuilder::new();
        let root = builder.root();
        let mut ids: HashMap<BusKey, DeviceId> = HashMap::new();

        // Each bus root hub becomes one port of the virtual root.
        for (slot, key) in roots.iter().enumerate() {
            add_subtree(&mut builder, &mut ids, &by_key, &children, *key, root, slot);
        }

        let topo = builder
            .build()
            .map_err(|e| StackError::transport("build topology snapshot", e.to_string()))?;

        let mut guard = self.lock();
        let reg = &mut *guard;
        reg.devices = ids
            .iter()
            .filter_map(|(key, id)| by_key.get(key).map(|d| (*id, d.clone())))
            .collect();
        // Handles for detached devices are useless; drop them.
        let devices = &reg.devices;
        reg.handles.retain(|id, _| devices.contains_key(id));

        debug!(devices = topo.len(), "topology snapshot taken");
        Ok(topo)
    }

    fn claim_interface(&self, iface: InterfaceKey) -> Result<()> {
        let handle = self.handle_for(iface.device)?;

        // A kernel driver on the interface makes the claim fail; detach
        // first and restore on release.
        match handle.kernel_driver_active(iface.number) {
            Ok(true) => {
                if let Err(e) = handle.detach_kernel_driver(iface.number) {
                    warn!(
                        interface = iface.number,
                        "failed to detach kernel driver: {}", e
                    );
                }
            }
            Ok(false) => {}
            Err(e) => {
                debug!(
                    interface = iface.number,
                    "could not check kernel driver status: {}", e
                );
            }
        }

        handle.claim_interface(iface.number).map_err(|e| match e {
            rusb::Error::Busy => StackError::Unavailable {
                interface: iface.number,
                reason: "held by another owner".to_string(),
            },
            rusb::Error::Access => StackError::Unavailable {
                interface: iface.number,
                reason: e.to_string(),
            },
            other => map_rusb_error("claim interface", other),
        })?;

        self.lock().claimed.insert(iface);
        debug!(device = iface.device.0, interface = iface.number, "claimed interface");
        Ok(())
    }

    fn release_interface(&self, iface: InterfaceKey) -> Result<()> {
        let handle = {
            let mut reg = self.lock();
            if !reg.claimed.remove(&iface) {
                return Err(StackError::transport(
                    "release interface",
                    "interface is not claimed",
                ));
            }
            reg.handles.get(&iface.device).cloned()
        };
        let Some(handle) = handle else {
            return Err(StackError::transport("release interface", "device not open"));
        };

        handle
            .release_interface(iface.number)
            .map_err(|e| map_rusb_error("release interface", e))?;

        if let Err(e) = handle.attach_kernel_driver(iface.number) {
            debug!(
                interface = iface.number,
                "could not reattach kernel driver (may not have been detached): {}", e
            );
        }
        debug!(device = iface.device.0, interface = iface.number, "released interface");
        Ok(())
    }

    fn open_pipe(&self, iface: InterfaceKey, endpoint: u8) -> Result<()> {
        let mut reg = self.lock();
        if !reg.claimed.contains(&iface) {
            return Err(StackError::transport(
                "open pipe",
                "interface is not claimed",
            ));
        }
        reg.pipes.insert(
            (iface, endpoint),
            PipeState {
                open: true,
                abort: Arc::new(AtomicBool::new(false)),
            },
        );
        Ok(())
    }

    fn close_pipe(&self, iface: InterfaceKey, endpoint: u8) -> Result<()> {
        let mut reg = self.lock();
        match reg.pipes.get_mut(&(iface, endpoint)) {
            Some(pipe) if pipe.open => {
                pipe.open = false;
                Ok(())
            }
            _ => Err(StackError::transport("close pipe", "pipe is not open")),
        }
    }

    fn submit_interrupt(
        &self,
        iface: InterfaceKey,
        endpoint: u8,
        buffer: &mut [u8],
    ) -> Result<usize> {
        let (handle, abort) = {
            let reg = self.lock();
            let pipe = reg
                .pipes
                .get(&(iface, endpoint))
                .filter(|p| p.open)
                .ok_or_else(|| StackError::transport("interrupt submit", "pipe is not open"))?;
            let handle = reg.handles.get(&iface.device).cloned().ok_or_else(|| {
                StackError::transport("interrupt submit", "device not open")
            })?;
            (handle, pipe.abort.clone())
        };

        // libusb has no unbounded blocking read that can be interrupted
        // from another thread, so poll with a short timeout and re-check
        // the abort flag between polls.
        loop {
            if abort.load(Ordering::Acquire) {
                return Err(StackError::transport(
                    "interrupt submit",
                    "pending submissions aborted",
                ));
            }
            match handle.read_interrupt(endpoint, buffer, INTERRUPT_POLL_TIMEOUT) {
                Ok(n) => return Ok(n),
                Err(rusb::Error::Timeout) => continue,
                Err(e) => return Err(map_rusb_error("interrupt submit", e)),
            }
        }
    }

    fn abort_submissions(&self, iface: InterfaceKey, endpoint: u8) -> Result<()> {
        let reg = self.lock();
        if let Some(pipe) = reg.pipes.get(&(iface, endpoint)) {
            pipe.abort.store(true, Ordering::Release);
        }
        Ok(())
    }

    fn control_transfer(
        &self,
        target: ControlTarget,
        request: &ControlRequest,
        buffer: &mut [u8],
    ) -> Result<usize> {
        let handle = self.handle_for(target.device())?;

        let inbound = request.request_type & 0x80 != 0;
        let result = if inbound {
            handle.read_control(
                request.request_type,
                request.request,
                request.value,
                request.index,
                buffer,
                CONTROL_TIMEOUT,
            )
        } else {
            handle.write_control(
                request.request_type,
                request.request,
                request.value,
                request.index,
                buffer,
                CONTROL_TIMEOUT,
            )
        };

        result.map_err(|e| match e {
            rusb::Error::Access => StackError::Permission(e.to_string()),
            other => map_rusb_error("control transfer", other),
        })
    }
}

/// Add `key` and its subtree to the builder at `port_index` of `parent`.
fn add_subtree(
    builder: &mut TopologyBuilder,
    ids: &mut HashMap<BusKey, DeviceId>,
    by_key: &HashMap<BusKey, Device<Context>>,
    children: &HashMap<BusKey, Vec<(u8, BusKey)>>,
    key: BusKey,
    parent: DeviceId,
    port_index: usize,
) {
    let Some(device) = by_key.get(&key) else {
        return;
    };
    let class = device
        .device_descriptor()
        .map(|d| d.class_code())
        .unwrap_or(0);
    let config = read_configuration(device);
    let node_children = children.get(&key);

    let id = if class == HUB_CLASS {
        // Synthesize the port list from observed children: ports up to the
        // highest occupied one exist, unoccupied ones render as empty.
        let max_port = node_children
            .map(|c| c.iter().map(|(p, _)| *p as usize).max().unwrap_or(0))
            .unwrap_or(0);
        let hub = builder.add_hub_at_port(parent, port_index, max_port);
        if let Some(config) = config {
            builder.set_config(hub, config);
        }
        hub
    } else {
        builder.add_device_at_port(parent, port_index, class, config)
    };
    ids.insert(key, id);

    if let Some(node_children) = node_children {
        for (port, child) in node_children {
            // Port numbers are 1-based on the wire.
            let slot = (*port as usize).saturating_sub(1);
            add_subtree(builder, ids, by_key, children, *child, id, slot);
        }
    }
}

/// Read the active configuration of a device into the topology model.
/// An unconfigured or unreadable device simply has no configuration.
fn read_configuration(device: &Device<Context>) -> Option<Configuration> {
    let config = device.active_config_descriptor().ok()?;
    let interfaces = config
        .interfaces()
        .filter_map(|interface| {
            // Alternate setting zero describes the interface as it is
            // before any set-interface request.
            let desc = interface.descriptors().next()?;
            let endpoints = desc
                .endpoint_descriptors()
                .map(|ep| EndpointDesc {
                    address: ep.address(),
                    kind: match ep.transfer_type() {
                        rusb::TransferType::Control => TransferKind::Control,
                        rusb::TransferType::Interrupt => TransferKind::Interrupt,
                        rusb::TransferType::Bulk => TransferKind::Bulk,
                        rusb::TransferType::Isochronous => TransferKind::Isochronous,
                    },
                    direction: match ep.direction() {
                        rusb::Direction::In => Direction::In,
                        rusb::Direction::Out => Direction::Out,
                    },
                    max_packet_size: ep.max_packet_size(),
                })
                .collect();
            Some(InterfaceDesc {
                number: desc.interface_number(),
                class: desc.class_code(),
                subclass: desc.sub_class_code(),
                protocol: desc.protocol_code(),
                endpoints,
            })
        })
        .collect();
    Some(Configuration {
        number: config.number(),
        interfaces,
    })
}

fn map_rusb_error(operation: &str, err: rusb::Error) -> StackError {
    StackError::transport(operation, err.to_string())
}
