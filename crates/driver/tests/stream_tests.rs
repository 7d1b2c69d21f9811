//! Interrupt streaming session tests
//!
//! State machine and resource discipline: frame delivery, failure vs.
//! cancellation, missing-endpoint rejection and the claim/release pairing
//! over many cycles.
//!
//! Run with: `cargo test -p driver --test stream_tests`

use std::sync::Arc;
use std::time::Duration;

use driver::{InterruptStream, StopReason, StreamEvent};
use hoststack::mock::MockStack;
use hoststack::mock::sample::{MOUSE_ENDPOINT, broken_hid_interface, mouse_topology};
use hoststack::{HostStack, StackError};
use topology::{Configuration, InterfaceKey, TopologyBuilder};

fn recv(events: &async_channel::Receiver<StreamEvent>) -> StreamEvent {
    events
        .recv_blocking()
        .expect("event channel closed unexpectedly")
}

#[test]
fn frames_are_reported_with_their_received_length() {
    let (topo, iface) = mouse_topology();
    let mock = Arc::new(MockStack::new(topo.clone()));
    let stack: Arc<dyn HostStack> = mock.clone();

    mock.push_frame(iface, MOUSE_ENDPOINT, vec![0x01, 0xFE, 0x02]);
    let stream = InterruptStream::start(stack, &topo, iface).unwrap();
    let events = stream.events();

    assert_eq!(recv(&events), StreamEvent::Frame(vec![0x01, 0xFE, 0x02]));

    assert_eq!(stream.wait(), StopReason::Requested);
    assert_eq!(recv(&events), StreamEvent::Stopped(StopReason::Requested));
}

#[test]
fn zero_movement_frame_is_data_not_an_error() {
    // maxPacketSize 2, and the device reports two zero bytes.
    let mut builder = TopologyBuilder::new();
    let root = builder.root();
    let mut iface_desc = hoststack::mock::sample::boot_mouse_interface(0);
    iface_desc.endpoints[0].max_packet_size = 2;
    let dev = builder.add_device(
        root,
        0x00,
        Some(Configuration {
            number: 1,
            interfaces: vec![iface_desc],
        }),
    );
    let topo = builder.build().unwrap();
    let iface = InterfaceKey { device: dev, number: 0 };

    let mock = Arc::new(MockStack::new(topo.clone()));
    let stack: Arc<dyn HostStack> = mock.clone();
    mock.push_frame(iface, MOUSE_ENDPOINT, vec![0x00, 0x00]);

    let stream = InterruptStream::start(stack, &topo, iface).unwrap();
    let events = stream.events();

    assert_eq!(recv(&events), StreamEvent::Frame(vec![0x00, 0x00]));
    stream.wait();
}

#[test]
fn submission_failure_while_running_stops_and_releases() {
    let (topo, iface) = mouse_topology();
    let mock = Arc::new(MockStack::new(topo.clone()));
    let stack: Arc<dyn HostStack> = mock.clone();

    mock.push_frame_failure(iface, MOUSE_ENDPOINT, "endpoint stalled");
    let stream = InterruptStream::start(stack, &topo, iface).unwrap();
    let events = stream.events();

    match recv(&events) {
        StreamEvent::Stopped(StopReason::TransferFailed(reason)) => {
            assert!(reason.contains("endpoint stalled"));
        }
        other => panic!("expected transfer failure, got {other:?}"),
    }

    // The unwind already ran: pipe closed, interface released.
    assert!(!mock.is_claimed(iface));
    assert!(!mock.is_pipe_open(iface, MOUSE_ENDPOINT));
    let stats = mock.claim_stats();
    assert_eq!(stats.claims, 1);
    assert_eq!(stats.releases, 1);

    match stream.wait() {
        StopReason::TransferFailed(_) => {}
        other => panic!("expected transfer failure, got {other:?}"),
    }
}

#[test]
fn failure_after_stop_is_the_expected_cancellation() {
    let (topo, iface) = mouse_topology();
    let mock = Arc::new(MockStack::new(topo.clone()));
    let stack: Arc<dyn HostStack> = mock.clone();

    let stream = InterruptStream::start(stack, &topo, iface).unwrap();
    // The loop is blocked on an empty frame queue; stop() sets the flag
    // and aborts, which fails the submission. That failure must read as a
    // cancellation, not an error.
    assert_eq!(stream.wait(), StopReason::Requested);

    assert!(!mock.is_claimed(iface));
    assert!(!mock.is_pipe_open(iface, MOUSE_ENDPOINT));
}

#[test]
fn missing_interrupt_in_endpoint_is_a_configuration_violation() {
    let mut builder = TopologyBuilder::new();
    let root = builder.root();
    let dev = builder.add_device(
        root,
        0x00,
        Some(Configuration {
            number: 1,
            interfaces: vec![broken_hid_interface(0)],
        }),
    );
    let topo = builder.build().unwrap();
    let iface = InterfaceKey { device: dev, number: 0 };

    let mock = Arc::new(MockStack::new(topo.clone()));
    let stack: Arc<dyn HostStack> = mock.clone();

    let err = InterruptStream::start(stack, &topo, iface).unwrap_err();
    assert!(matches!(err, StackError::ConfigurationViolation(_)));
    // No claim was taken.
    assert_eq!(mock.claim_stats().claims, 0);
}

#[test]
fn starting_on_a_claimed_interface_is_unavailable_without_side_effects() {
    let (topo, iface) = mouse_topology();
    let mock = Arc::new(MockStack::new(topo.clone()));
    let stack: Arc<dyn HostStack> = mock.clone();
    mock.hold_interface(iface);

    let err = InterruptStream::start(stack, &topo, iface).unwrap_err();
    assert!(matches!(err, StackError::Unavailable { .. }));
    assert_eq!(mock.claim_stats().claims, 0);
}

#[test]
fn hundred_start_stop_cycles_balance_claims_and_releases() {
    let (topo, iface) = mouse_topology();
    let mock = Arc::new(MockStack::new(topo.clone()));
    let stack: Arc<dyn HostStack> = mock.clone();

    for cycle in 0..100 {
        let stream = InterruptStream::start(stack.clone(), &topo, iface)
            .unwrap_or_else(|err| panic!("cycle {cycle}: start failed: {err}"));
        // Alternate between stopping an idle loop and one that got data.
        if cycle % 2 == 0 {
            mock.push_frame(iface, MOUSE_ENDPOINT, vec![cycle as u8, 0, 0, 0]);
            // Make sure the frame was consumed before stopping.
            match stream
                .events()
                .recv_blocking()
                .expect("frame event expected")
            {
                StreamEvent::Frame(_) => {}
                other => panic!("cycle {cycle}: unexpected event {other:?}"),
            }
        }
        assert_eq!(stream.wait(), StopReason::Requested);
    }

    let stats = mock.claim_stats();
    assert_eq!(stats.claims, 100);
    assert_eq!(stats.releases, 100);
    assert_eq!(stats.max_concurrent, 1);
    assert!(!mock.is_claimed(iface));
}

#[test]
fn dropping_the_handle_unwinds_the_session() {
    let (topo, iface) = mouse_topology();
    let mock = Arc::new(MockStack::new(topo.clone()));
    let stack: Arc<dyn HostStack> = mock.clone();

    let stream = InterruptStream::start(stack, &topo, iface).unwrap();
    drop(stream);

    // Drop stops and joins the streaming thread, so the unwind is done.
    assert!(!mock.is_claimed(iface));
    assert!(!mock.is_pipe_open(iface, MOUSE_ENDPOINT));
}

#[test]
fn stop_is_idempotent() {
    let (topo, iface) = mouse_topology();
    let mock = Arc::new(MockStack::new(topo.clone()));
    let stack: Arc<dyn HostStack> = mock.clone();

    let stream = InterruptStream::start(stack, &topo, iface).unwrap();
    stream.stop();
    stream.stop();
    assert_eq!(stream.wait(), StopReason::Requested);

    // Give nothing time to double-release; the counters must balance.
    std::thread::sleep(Duration::from_millis(10));
    let stats = mock.claim_stats();
    assert_eq!(stats.claims, 1);
    assert_eq!(stats.releases, 1);
}
