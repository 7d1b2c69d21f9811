//! Core engine of rust-usb-explorer
//!
//! Three pieces layered over the [`hoststack`] boundary:
//!
//! - [`requests`] — building and executing standard control-transfer
//!   requests on the default control pipe.
//! - [`hid`] — HID usage lookup and mouse classification.
//! - [`stream`] — the interrupt streaming session: claim an interface,
//!   open its interrupt-in pipe, poll it on a dedicated thread, and unwind
//!   cleanly on stop or failure.

pub mod hid;
pub mod requests;
pub mod stream;

pub use hid::{ClaimPolicy, is_boot_mouse, matches_mouse_usage, report_descriptor_usage};
pub use requests::{
    DescriptorKind, Direction, Recipient, RequestKind, RequestType, StandardRequest,
    execute_control_request, get_configuration, get_descriptor,
};
pub use stream::{InterruptStream, StopReason, StreamEvent};
