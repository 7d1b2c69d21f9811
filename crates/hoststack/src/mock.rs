//! Scripted in-memory host stack
//!
//! `MockStack` implements [`HostStack`] over a topology built in the test
//! and queues of scripted outcomes for control and interrupt transfers.
//! It also keeps claim bookkeeping (totals and the concurrency high-water
//! mark) so tests can assert the claim/release pairing invariant.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Condvar, Mutex};

use tracing::trace;

use topology::{InterfaceKey, Topology};

use crate::error::{Result, StackError};
use crate::stack::{ControlRequest, ControlTarget, HostStack};

pub mod sample;

/// Reason string used when an abort unblocks an in-flight submission.
/// Exposed so callers can tell an abort apart from a genuine failure in
/// tests; the streaming loop itself relies on its stop flag instead.
pub const ABORTED_REASON: &str = "pending submissions aborted";

/// Claim bookkeeping snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClaimStats {
    /// Total successful claims.
    pub claims: u64,
    /// Total releases.
    pub releases: u64,
    /// Most claims held concurrently at any point.
    pub max_concurrent: usize,
}

/// Scripted outcome of a control transfer.
#[derive(Debug, Clone)]
enum ControlReply {
    Data(Vec<u8>),
    Fail(String),
}

/// Scripted outcome of an interrupt submission.
#[derive(Debug, Clone)]
enum FrameAction {
    Data(Vec<u8>),
    Fail(String),
}

#[derive(Debug, Default)]
struct PipeState {
    open: bool,
    aborted: bool,
    frames: VecDeque<FrameAction>,
}

#[derive(Debug, Default)]
struct MockState {
    claimed: HashSet<InterfaceKey>,
    externally_held: HashSet<InterfaceKey>,
    claims: u64,
    releases: u64,
    max_concurrent: usize,
    control_replies: VecDeque<ControlReply>,
    pipes: HashMap<(InterfaceKey, u8), PipeState>,
    permission_denied: Option<String>,
}

/// In-memory [`HostStack`] for tests.
pub struct MockStack {
    topology: Topology,
    state: Mutex<MockState>,
    wakeup: Condvar,
}

impl MockStack {
    /// Wrap a scripted topology.
    pub fn new(topology: Topology) -> Self {
        Self {
            topology,
            state: Mutex::new(MockState::default()),
            wakeup: Condvar::new(),
        }
    }

    /// Simulate another owner (e.g. a native driver) holding an interface,
    /// so claims on it fail with [`StackError::Unavailable`].
    pub fn hold_interface(&self, iface: InterfaceKey) {
        self.state.lock().unwrap().externally_held.insert(iface);
    }

    /// Release the simulated external owner.
    pub fn drop_external_hold(&self, iface: InterfaceKey) {
        self.state.lock().unwrap().externally_held.remove(&iface);
    }

    /// Make `topology()` fail as if the caller lacked access.
    pub fn deny_access(&self, reason: impl Into<String>) {
        self.state.lock().unwrap().permission_denied = Some(reason.into());
    }

    /// Queue data for the next control transfer. Longer replies than the
    /// caller's buffer are truncated to the buffer length; shorter replies
    /// report their own length.
    pub fn push_control_reply(&self, data: Vec<u8>) {
        self.state
            .lock()
            .unwrap()
            .control_replies
            .push_back(ControlReply::Data(data));
    }

    /// Queue a failure for the next control transfer.
    pub fn push_control_failure(&self, reason: impl Into<String>) {
        self.state
            .lock()
            .unwrap()
            .control_replies
            .push_back(ControlReply::Fail(reason.into()));
    }

    /// Queue a frame for an interrupt pipe and wake any blocked receiver.
    pub fn push_frame(&self, iface: InterfaceKey, endpoint: u8, data: Vec<u8>) {
        let mut state = self.state.lock().unwrap();
        state
            .pipes
            .entry((iface, endpoint))
            .or_default()
            .frames
            .push_back(FrameAction::Data(data));
        self.wakeup.notify_all();
    }

    /// Queue a transfer failure for an interrupt pipe.
    pub fn push_frame_failure(&self, iface: InterfaceKey, endpoint: u8, reason: impl Into<String>) {
        let mut state = self.state.lock().unwrap();
        state
            .pipes
            .entry((iface, endpoint))
            .or_default()
            .frames
            .push_back(FrameAction::Fail(reason.into()));
        self.wakeup.notify_all();
    }

    /// Claim bookkeeping so far.
    pub fn claim_stats(&self) -> ClaimStats {
        let state = self.state.lock().unwrap();
        ClaimStats {
            claims: state.claims,
            releases: state.releases,
            max_concurrent: state.max_concurrent,
        }
    }

    /// Whether the interface is currently claimed through this stack.
    pub fn is_claimed(&self, iface: InterfaceKey) -> bool {
        self.state.lock().unwrap().claimed.contains(&iface)
    }

    /// Whether the pipe is currently open.
    pub fn is_pipe_open(&self, iface: InterfaceKey, endpoint: u8) -> bool {
        self.state
            .lock()
            .unwrap()
            .pipes
            .get(&(iface, endpoint))
            .is_some_and(|p| p.open)
    }
}

impl HostStack for MockStack {
    fn topology(&self) -> Result<Topology> {
        if let Some(reason) = &self.state.lock().unwrap().permission_denied {
            return Err(StackError::Permission(reason.clone()));
        }
        Ok(self.topology.clone())
    }

    fn claim_interface(&self, iface: InterfaceKey) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.externally_held.contains(&iface) {
            return Err(StackError::Unavailable {
                interface: iface.number,
                reason: "held by another owner".into(),
            });
        }
        if !state.claimed.insert(iface) {
            return Err(StackError::Unavailable {
                interface: iface.number,
                reason: "already claimed through this stack".into(),
            });
        }
        state.claims += 1;
        state.max_concurrent = state.max_concurrent.max(state.claimed.len());
        trace!(device = iface.device.0, interface = iface.number, "mock claim");
        Ok(())
    }

    fn release_interface(&self, iface: InterfaceKey) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if !state.claimed.remove(&iface) {
            return Err(StackError::transport(
                "release interface",
                format!("interface {} was not claimed", iface.number),
            ));
        }
        state.releases += 1;
        trace!(device = iface.device.0, interface = iface.number, "mock release");
        Ok(())
    }

    fn open_pipe(&self, iface: InterfaceKey, endpoint: u8) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if !state.claimed.contains(&iface) {
            return Err(StackError::transport(
                "open pipe",
                format!("interface {} is not claimed", iface.number),
            ));
        }
        let pipe = state.pipes.entry((iface, endpoint)).or_default();
        if pipe.open {
            return Err(StackError::transport(
                "open pipe",
                format!("pipe {endpoint:#04x} is already open"),
            ));
        }
        pipe.open = true;
        pipe.aborted = false;
        Ok(())
    }

    fn close_pipe(&self, iface: InterfaceKey, endpoint: u8) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let pipe = state
            .pipes
            .get_mut(&(iface, endpoint))
            .filter(|p| p.open)
            .ok_or_else(|| {
                StackError::transport("close pipe", format!("pipe {endpoint:#04x} is not open"))
            })?;
        pipe.open = false;
        Ok(())
    }

    fn submit_interrupt(
        &self,
        iface: InterfaceKey,
        endpoint: u8,
        buffer: &mut [u8],
    ) -> Result<usize> {
        let mut state = self.state.lock().unwrap();
        loop {
            let pipe = state.pipes.entry((iface, endpoint)).or_default();
            if !pipe.open {
                return Err(StackError::transport(
                    "interrupt submit",
                    format!("pipe {endpoint:#04x} is not open"),
                ));
            }
            if pipe.aborted {
                return Err(StackError::transport("interrupt submit", ABORTED_REASON));
            }
            match pipe.frames.pop_front() {
                Some(FrameAction::Data(data)) => {
                    let n = data.len().min(buffer.len());
                    buffer[..n].copy_from_slice(&data[..n]);
                    return Ok(n);
                }
                Some(FrameAction::Fail(reason)) => {
                    return Err(StackError::transport("interrupt submit", reason));
                }
                None => {
                    // Block until a frame is pushed or the pipe is aborted.
                    state = self.wakeup.wait(state).unwrap();
                }
            }
        }
    }

    fn abort_submissions(&self, iface: InterfaceKey, endpoint: u8) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.pipes.entry((iface, endpoint)).or_default().aborted = true;
        self.wakeup.notify_all();
        Ok(())
    }

    fn control_transfer(
        &self,
        target: ControlTarget,
        request: &ControlRequest,
        buffer: &mut [u8],
    ) -> Result<usize> {
        trace!(
            ?target,
            request_type = request.request_type,
            request = request.request,
            value = request.value,
            index = request.index,
            "mock control transfer"
        );
        let reply = self.state.lock().unwrap().control_replies.pop_front();
        match reply {
            Some(ControlReply::Data(data)) => {
                let n = data.len().min(buffer.len());
                buffer[..n].copy_from_slice(&data[..n]);
                Ok(n)
            }
            Some(ControlReply::Fail(reason)) => {
                Err(StackError::transport("control transfer", reason))
            }
            // Unscripted transfers succeed and just fill the buffer, the
            // "buffer gets filled, no error" semantics of the transport.
            None => {
                buffer.fill(0);
                Ok(buffer.len())
            }
        }
    }
}
