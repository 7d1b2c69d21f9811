//! Host USB stack boundary for rust-usb-explorer
//!
//! This crate specifies the seam between the core and whatever actually
//! talks to the hardware: the [`HostStack`] trait, the error taxonomy every
//! implementation maps into, scoped claim/pipe guards, logging setup, and a
//! scripted [`mock::MockStack`] used by tests across the workspace.

pub mod error;
pub mod guard;
pub mod logging;
pub mod mock;
pub mod stack;

pub use error::{Result, StackError};
pub use guard::{InterfaceClaim, PipeGuard};
pub use logging::setup_logging;
pub use stack::{ControlRequest, ControlTarget, HostStack};
