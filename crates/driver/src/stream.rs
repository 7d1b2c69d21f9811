//! Interrupt streaming session
//!
//! Claim the target interface, open its interrupt-in pipe and poll it on a
//! dedicated thread: submit a buffer sized exactly to the endpoint's
//! maximum packet size, block until the device fills it, report the frame,
//! repeat. Stopping is cooperative — a stop flag plus an abort on the pipe
//! to unblock the in-flight submission — and the unwind closes the pipe
//! and releases the interface exactly once on every path.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};

use async_channel::{Receiver, Sender};
use tracing::{debug, info, warn};

use hoststack::{HostStack, InterfaceClaim, PipeGuard, Result, StackError};
use topology::{InterfaceKey, Topology};

/// Default capacity of the frame event channel.
const DEFAULT_EVENT_BUFFER: usize = 64;

/// Events reported by a streaming session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// One received frame; length is the byte count the device provided,
    /// at most the endpoint's maximum packet size.
    Frame(Vec<u8>),
    /// The session finished unwinding. Always the last event.
    Stopped(StopReason),
}

/// Why a streaming session stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// [`InterruptStream::stop`] was called; a submission failure observed
    /// after the stop flag was set is part of the expected cancellation.
    Requested,
    /// A submission failed while the session was still wanted.
    TransferFailed(String),
}

/// Handle to a running interrupt streaming session.
///
/// Once started, the session reaches released/closed exactly once on every
/// path: the streaming thread owns the claim and pipe guards and unwinds
/// them itself, whether it stops on request, on failure, or because the
/// event receiver went away.
pub struct InterruptStream {
    stack: Arc<dyn HostStack>,
    iface: InterfaceKey,
    endpoint: u8,
    stop: Arc<AtomicBool>,
    events: Receiver<StreamEvent>,
    thread: Option<JoinHandle<StopReason>>,
}

impl std::fmt::Debug for InterruptStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InterruptStream")
            .field("iface", &self.iface)
            .field("endpoint", &self.endpoint)
            .field("stop", &self.stop)
            .finish_non_exhaustive()
    }
}

impl InterruptStream {
    /// Start streaming from the interface's interrupt-in endpoint.
    ///
    /// Fails with [`StackError::ConfigurationViolation`] if the interface
    /// has no interrupt-in endpoint (a HID device without one violates the
    /// HID spec), with [`StackError::Unavailable`] if the interface is
    /// already claimed, or with the pipe-open error after releasing the
    /// claim again.
    pub fn start(
        stack: Arc<dyn HostStack>,
        topo: &Topology,
        iface: InterfaceKey,
    ) -> Result<Self> {
        Self::start_with_capacity(stack, topo, iface, DEFAULT_EVENT_BUFFER)
    }

    /// [`InterruptStream::start`] with an explicit event channel capacity.
    pub fn start_with_capacity(
        stack: Arc<dyn HostStack>,
        topo: &Topology,
        iface: InterfaceKey,
        event_buffer: usize,
    ) -> Result<Self> {
        let desc = topo.interface(iface).ok_or_else(|| {
            StackError::ConfigurationViolation(format!(
                "interface {} not present in the active configuration",
                iface.number
            ))
        })?;
        let endpoint = desc.interrupt_in_endpoint().ok_or_else(|| {
            StackError::ConfigurationViolation(format!(
                "interface {} has no interrupt-in endpoint",
                iface.number
            ))
        })?;
        let address = endpoint.address;
        let max_packet = endpoint.max_packet_size;

        let claim = InterfaceClaim::acquire(stack.clone(), iface)?;
        // If the pipe fails to open, dropping the claim releases the
        // interface before the error propagates.
        let pipe = PipeGuard::open(stack.clone(), iface, address)?;

        let stop = Arc::new(AtomicBool::new(false));
        let (tx, rx) = async_channel::bounded(event_buffer);

        let thread = {
            let stack = stack.clone();
            let stop = stop.clone();
            thread::Builder::new()
                .name("interrupt-stream".to_string())
                .spawn(move || run_stream(stack, claim, pipe, max_packet, stop, tx))
                .map_err(|err| StackError::transport("spawn streaming thread", err.to_string()))?
        };

        info!(
            device = iface.device.0,
            interface = iface.number,
            endpoint = address,
            max_packet,
            "interrupt streaming session started"
        );

        Ok(Self {
            stack,
            iface,
            endpoint: address,
            stop,
            events: rx,
            thread: Some(thread),
        })
    }

    /// The event stream: frames, then one final `Stopped`.
    pub fn events(&self) -> Receiver<StreamEvent> {
        self.events.clone()
    }

    /// Request the session to stop. Idempotent.
    ///
    /// The stop flag is set before the abort is issued; the loop re-checks
    /// the flag after every submission, so a submission unblocked by the
    /// abort is recognized as the expected cancellation.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Err(err) = self.stack.abort_submissions(self.iface, self.endpoint) {
            warn!(
                device = self.iface.device.0,
                endpoint = self.endpoint,
                %err,
                "failed to abort pending submissions"
            );
        }
    }

    /// Stop the session and wait for the streaming thread to finish its
    /// unwind. Returns the reason the loop exited.
    pub fn wait(mut self) -> StopReason {
        self.stop();
        match self.thread.take() {
            Some(handle) => handle
                .join()
                .unwrap_or_else(|_| StopReason::TransferFailed("streaming thread panicked".into())),
            None => StopReason::Requested,
        }
    }
}

impl Drop for InterruptStream {
    fn drop(&mut self) {
        if let Some(handle) = self.thread.take() {
            self.stop();
            let _ = handle.join();
        }
    }
}

/// The streaming loop, running on its own thread. Owns the claim and pipe
/// guards and unwinds them on every exit path: close the pipe, then
/// release the interface. Secondary errors during the unwind are logged
/// and never displace the primary stop reason.
fn run_stream(
    stack: Arc<dyn HostStack>,
    claim: InterfaceClaim,
    pipe: PipeGuard,
    max_packet: u16,
    stop: Arc<AtomicBool>,
    events: Sender<StreamEvent>,
) -> StopReason {
    let iface = claim.key();
    let endpoint = pipe.endpoint();
    // The buffer must be exactly the endpoint's maximum packet size: a
    // larger one delays notification of short frames, a smaller one risks
    // truncation. Hard contract, not a tunable.
    let mut buffer = vec![0u8; usize::from(max_packet)];

    let reason = loop {
        match stack.submit_interrupt(iface, endpoint, &mut buffer) {
            Ok(n) => {
                // An abort alone does not stop one more submission from
                // completing; the flag decides whether to report or exit.
                if stop.load(Ordering::SeqCst) {
                    break StopReason::Requested;
                }
                if events.send_blocking(StreamEvent::Frame(buffer[..n].to_vec())).is_err() {
                    debug!(device = iface.device.0, "event receiver dropped, stopping stream");
                    break StopReason::Requested;
                }
            }
            Err(err) => {
                if stop.load(Ordering::SeqCst) {
                    // The stop path aborts the in-flight submission, so
                    // this failure is the expected cancellation.
                    break StopReason::Requested;
                }
                warn!(
                    device = iface.device.0,
                    endpoint,
                    %err,
                    "interrupt submission failed, stopping stream"
                );
                break StopReason::TransferFailed(err.to_string());
            }
        }
    };

    if let Err(err) = pipe.close() {
        warn!(device = iface.device.0, endpoint, %err, "failed to close pipe while stopping");
    }
    if let Err(err) = claim.release() {
        warn!(device = iface.device.0, %err, "failed to release interface while stopping");
    }

    debug!(device = iface.device.0, ?reason, "interrupt streaming session unwound");
    let _ = events.send_blocking(StreamEvent::Stopped(reason.clone()));
    reason
}
