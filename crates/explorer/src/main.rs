//! usb-explorer
//!
//! Command-line USB device tree explorer. Walks the topology exposed by
//! the host stack, exercises standard control requests against it, finds
//! interfaces by class, and streams interrupt reports from a mouse.

mod config;
mod libusb;

use std::io::{self, BufRead};
use std::sync::Arc;
use std::thread;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::{error, info, warn};

use config::ExplorerConfig;
use driver::{
    DescriptorKind, InterruptStream, StopReason, StreamEvent, get_configuration, get_descriptor,
    is_boot_mouse, matches_mouse_usage,
};
use hoststack::{HostStack, StackError, setup_logging};
use libusb::LibusbStack;
use topology::{HUB_CLASS, InterfaceKey, Topology, TreeStyle, walk};

#[derive(Parser, Debug)]
#[command(name = "usb-explorer")]
#[command(author, version, about = "Explore the USB device tree")]
#[command(long_about = "
Walks the USB topology as seen by libusb, rooted at a virtual root hub.

EXAMPLES:
    # Print the device tree both ways (device lists and port lists)
    usb-explorer topology

    # Print only the ports view, with empty ports marked
    usb-explorer topology --style ports

    # Dump the device descriptor of the first non-hub device
    usb-explorer control

    # List all HID interfaces
    usb-explorer find --interface-class 0x03

    # Find a mouse and stream its reports until Enter is pressed
    usb-explorer mouse
")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "PATH")]
    config: Option<std::path::PathBuf>,

    /// Save default configuration to default location and exit
    #[arg(long)]
    save_config: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL")]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the device tree
    Topology {
        /// Traversal to render; both are printed when omitted
        #[arg(long, value_enum)]
        style: Option<StyleArg>,

        /// Emit the topology snapshot as JSON instead of a tree
        #[arg(long)]
        json: bool,
    },
    /// Dump the device descriptor and current configuration of the first
    /// non-hub device
    Control,
    /// List interfaces with a given class
    Find {
        /// Interface class to look for (decimal or 0x-prefixed hex)
        #[arg(long, value_parser = parse_class)]
        interface_class: Option<u8>,
    },
    /// Find a mouse and stream its interrupt reports
    Mouse,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum StyleArg {
    /// Derived attached-device lists; empty ports are skipped
    Attached,
    /// Port lists; empty ports are shown explicitly
    Ports,
}

impl From<StyleArg> for TreeStyle {
    fn from(style: StyleArg) -> Self {
        match style {
            StyleArg::Attached => TreeStyle::AttachedDevices,
            StyleArg::Ports => TreeStyle::Ports,
        }
    }
}

fn parse_class(s: &str) -> Result<u8, String> {
    let result = if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u8::from_str_radix(hex, 16)
    } else {
        s.parse()
    };
    result.map_err(|_| format!("invalid class code '{}'", s))
}

fn main() -> Result<()> {
    let args = Args::parse();

    if args.save_config {
        let config = ExplorerConfig::default();
        let path = ExplorerConfig::default_path();
        config.save(&path).context("Failed to save configuration")?;
        println!("Configuration saved to: {}", path.display());
        return Ok(());
    }

    let config = if let Some(ref path) = args.config {
        ExplorerConfig::load(Some(path.clone())).context("Failed to load configuration")?
    } else {
        ExplorerConfig::load_or_default()
    };

    let log_level = args
        .log_level
        .as_deref()
        .unwrap_or(&config.explorer.log_level);
    setup_logging(log_level).context("Failed to setup logging")?;

    info!("usb-explorer v{}", env!("CARGO_PKG_VERSION"));

    let stack: Arc<dyn HostStack> = Arc::new(LibusbStack::new()?);
    let topo = stack.topology()?;

    match args.command {
        Command::Topology { style, json } => cmd_topology(&topo, style, json),
        Command::Control => cmd_control(stack.as_ref(), &topo),
        Command::Find { interface_class } => {
            let class = interface_class.unwrap_or(config.hid.interface_class);
            cmd_find(&topo, class)
        }
        Command::Mouse => cmd_mouse(&stack, &topo, &config),
    }
}

fn cmd_topology(topo: &Topology, style: Option<StyleArg>, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(topo)?);
        return Ok(());
    }
    match style {
        Some(style) => print!("{}", walk::render_tree(topo, style.into())),
        None => {
            println!("Using attached-device lists:");
            print!("{}", walk::render_tree(topo, TreeStyle::AttachedDevices));
            println!();
            println!("Using port lists:");
            print!("{}", walk::render_tree(topo, TreeStyle::Ports));
        }
    }
    Ok(())
}

fn cmd_control(stack: &dyn HostStack, topo: &Topology) -> Result<()> {
    let all = walk::collect(topo, topo.root(), |_| true);
    let hubs = walk::devices_with_class(topo, HUB_CLASS);
    println!("Found {} devices, {} of them hubs", all.len(), hubs.len());

    let Some(device) = all.iter().find(|id| {
        topo.device(**id)
            .map(|node| !node.is_hub())
            .unwrap_or(false)
    }) else {
        println!("No non-hub device to interrogate");
        return Ok(());
    };

    let mut buffer = [0u8; 256];
    match get_descriptor(stack, *device, DescriptorKind::Device.into(), 0, 0, &mut buffer) {
        Ok(n) => {
            println!("Device descriptor of device {} ({} bytes):", device.0, n);
            print_hex(&buffer[..n]);
        }
        Err(err) => skip_or_bail(err, "device descriptor read failed")?,
    }

    match get_configuration(stack, *device) {
        Ok(value) => println!("Current configuration value: {}", value),
        Err(err) => skip_or_bail(err, "get-configuration failed")?,
    }
    Ok(())
}

fn cmd_find(topo: &Topology, interface_class: u8) -> Result<()> {
    let found = walk::interfaces_with_class(topo, topo.root(), interface_class);
    if found.is_empty() {
        println!("No interfaces with class 0x{:02x}", interface_class);
        return Ok(());
    }
    for key in found {
        println!(
            "Device {} interface {} has class 0x{:02x}",
            key.device.0, key.number, interface_class
        );
    }
    Ok(())
}

fn cmd_mouse(stack: &Arc<dyn HostStack>, topo: &Topology, config: &ExplorerConfig) -> Result<()> {
    let Some(mouse) = find_mouse(stack, topo, config)? else {
        println!("No mouse found");
        return Ok(());
    };
    println!(
        "Streaming from device {} interface {}; move the mouse, press Enter to stop",
        mouse.device.0, mouse.number
    );

    let stream = match InterruptStream::start_with_capacity(
        stack.clone(),
        topo,
        mouse,
        config.stream.event_buffer,
    ) {
        Ok(stream) => stream,
        Err(err) => {
            error!("could not start streaming session: {}", err);
            return Err(err.into());
        }
    };

    let events = stream.events();
    let printer = thread::spawn(move || {
        while let Ok(event) = events.recv_blocking() {
            match event {
                StreamEvent::Frame(data) => {
                    println!("{} bytes: {:02x?}", data.len(), data);
                }
                StreamEvent::Stopped(reason) => {
                    if let StopReason::TransferFailed(reason) = reason {
                        warn!("streaming stopped on failure: {}", reason);
                    }
                    break;
                }
            }
        }
    });

    let mut line = String::new();
    io::stdin()
        .lock()
        .read_line(&mut line)
        .context("Failed to read from stdin")?;

    stream.wait();
    if printer.join().is_err() {
        error!("event printer thread panicked");
    }
    Ok(())
}

/// First HID interface that classifies as a mouse, by boot-protocol fields
/// or by report descriptor usage. Non-fatal errors skip the candidate.
fn find_mouse(
    stack: &Arc<dyn HostStack>,
    topo: &Topology,
    config: &ExplorerConfig,
) -> Result<Option<InterfaceKey>> {
    let candidates = walk::interfaces_with_class(topo, topo.root(), driver::hid::HID_CLASS);
    for key in candidates {
        let Some(desc) = topo.interface(key) else {
            continue;
        };
        if is_boot_mouse(desc) {
            info!(
                device = key.device.0,
                interface = key.number,
                "mouse found by boot protocol"
            );
            return Ok(Some(key));
        }
        match matches_mouse_usage(stack, key, config.hid.claim_policy) {
            Ok(true) => {
                info!(
                    device = key.device.0,
                    interface = key.number,
                    "mouse found by report descriptor usage"
                );
                return Ok(Some(key));
            }
            Ok(false) => {}
            Err(err) => skip_or_bail(err, "usage probe failed")?,
        }
    }
    Ok(None)
}

/// Log a recoverable stack error and move on; propagate a fatal one.
fn skip_or_bail(err: StackError, what: &str) -> Result<()> {
    if err.is_fatal() {
        return Err(err.into());
    }
    warn!("{}: {}", what, err);
    Ok(())
}

fn print_hex(data: &[u8]) {
    for chunk in data.chunks(16) {
        let bytes: Vec<String> = chunk.iter().map(|b| format!("{:02x}", b)).collect();
        println!("  {}", bytes.join(" "));
    }
}
