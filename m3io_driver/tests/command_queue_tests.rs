//! # Command Queue Integration Tests
//!
//! Drives the request queue, command worker and completion notifier
//! together against instrumented stub transports:
//!
//! - FIFO service order under concurrent producers
//! - At most one transport call in flight
//! - Exactly one completion per enqueue
//! - Correlation id assignment and echo checking
//! - Transport failures and recovery
//! - Request reuse across cycles

use m3io_common::consts::{FORMAT_CODE_SEQ, MAIN_CODE_SEQ_DEVICE, SUB_CODE_READ};
use m3io_common::error::DriverError;
use m3io_common::protocol::{AccessType, Command, DeviceType, Response};
use m3io_common::transport::CommandTransport;
use m3io_driver::drivers::simulation::{ERR_ADDRESS_RANGE, SimulatedCpu};
use m3io_driver::{
    CallbackQueue, CommandWorker, CompletionNotifier, PendingRequest, RequestOwner, RequestStatus,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(10);

// ─── Stub transports ────────────────────────────────────────────────

/// Records every frame it sees and echoes the id with the top device
/// number as payload.
#[derive(Clone, Default)]
struct RecordingTransport {
    seen: Arc<Mutex<Vec<Command>>>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
    delay: Duration,
}

impl CommandTransport for RecordingTransport {
    fn name(&self) -> &'static str {
        "recording"
    }

    fn call(&mut self, command: &Command) -> Result<Response, DriverError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.delay.is_zero() {
            thread::sleep(self.delay);
        }
        self.seen.lock().push(command.clone());
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(Response::ok(command.com_id, vec![command.device.top_dev_no as u16]))
    }
}

/// Echoes a fixed payload, optionally with a wrong correlation id.
struct FixedTransport {
    payload: Vec<u16>,
    echo_offset: u16,
}

impl CommandTransport for FixedTransport {
    fn name(&self) -> &'static str {
        "fixed"
    }

    fn call(&mut self, command: &Command) -> Result<Response, DriverError> {
        Ok(Response::ok(
            command.com_id.wrapping_add(self.echo_offset),
            self.payload.clone(),
        ))
    }
}

/// Blocks every call until the test opens the gate once.
struct GatedTransport {
    gate: mpsc::Receiver<()>,
}

impl CommandTransport for GatedTransport {
    fn name(&self) -> &'static str {
        "gated"
    }

    fn call(&mut self, command: &Command) -> Result<Response, DriverError> {
        self.gate
            .recv()
            .map_err(|_| DriverError::Transport("gate dropped".to_string()))?;
        Ok(Response::ok(command.com_id, Vec::new()))
    }
}

/// Panics on the first call, then echoes like a healthy channel.
#[derive(Default)]
struct PanicOnceTransport {
    panicked: bool,
}

impl CommandTransport for PanicOnceTransport {
    fn name(&self) -> &'static str {
        "panic-once"
    }

    fn call(&mut self, command: &Command) -> Result<Response, DriverError> {
        if !self.panicked {
            self.panicked = true;
            panic!("channel driver fault");
        }
        Ok(Response::ok(command.com_id, vec![1]))
    }
}

// ─── Helpers ────────────────────────────────────────────────────────

fn read(top: u32) -> Command {
    Command::read(1, 3, DeviceType::DataRegister, AccessType::Word, top, 1)
}

fn request(name: &str, top: u32) -> Arc<PendingRequest> {
    let req = PendingRequest::new(name);
    req.set_command(read(top)).unwrap();
    req
}

#[derive(Default)]
struct CountingOwner {
    resumed: Mutex<HashMap<String, usize>>,
    name: String,
}

impl RequestOwner for CountingOwner {
    fn resume(&self, _status: RequestStatus) {
        *self.resumed.lock().entry(self.name.clone()).or_default() += 1;
    }
}

// ─── Ordering and exclusion ─────────────────────────────────────────

#[test]
fn test_concurrent_enqueue_is_serviced_in_fifo_order() {
    let transport = RecordingTransport::default();
    let seen = transport.seen.clone();
    let worker = Arc::new(
        CommandWorker::spawn(Box::new(transport), CompletionNotifier::inline()).unwrap(),
    );

    // Each producer records its enqueue under the same lock, so `submitted`
    // is the exact submission order.
    let submitted = Arc::new(Mutex::new(Vec::new()));
    let mut producers = Vec::new();
    for p in 0..8u32 {
        let worker = worker.clone();
        let submitted = submitted.clone();
        producers.push(thread::spawn(move || {
            let mut mine = Vec::new();
            for i in 0..50u32 {
                let top = p * 100 + i;
                let req = request("fifo", top);
                let mut order = submitted.lock();
                worker.enqueue(&req).unwrap();
                order.push(top);
                drop(order);
                mine.push(req);
            }
            mine
        }));
    }

    let requests: Vec<_> = producers
        .into_iter()
        .flat_map(|h| h.join().unwrap())
        .collect();
    for req in &requests {
        assert_eq!(req.wait_timeout(WAIT), Some(RequestStatus::Success));
    }

    let serviced: Vec<u32> = seen.lock().iter().map(|c| c.device.top_dev_no).collect();
    assert_eq!(serviced, *submitted.lock());
    assert_eq!(serviced.len(), 400);
}

#[test]
fn test_at_most_one_transport_call_in_flight() {
    let transport = RecordingTransport {
        delay: Duration::from_micros(200),
        ..Default::default()
    };
    let max_in_flight = transport.max_in_flight.clone();
    let worker = Arc::new(
        CommandWorker::spawn(Box::new(transport), CompletionNotifier::inline()).unwrap(),
    );

    let handles: Vec<_> = (0..4u32)
        .map(|p| {
            let worker = worker.clone();
            thread::spawn(move || {
                (0..25u32)
                    .map(|i| {
                        let req = request("excl", p * 100 + i);
                        worker.enqueue(&req).unwrap();
                        req
                    })
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    for handle in handles {
        for req in handle.join().unwrap() {
            assert_eq!(req.wait_timeout(WAIT), Some(RequestStatus::Success));
        }
    }
    assert_eq!(max_in_flight.load(Ordering::SeqCst), 1);
}

#[test]
fn test_every_enqueue_gets_exactly_one_completion() {
    let callbacks = CallbackQueue::start().unwrap();
    let mut worker = CommandWorker::spawn(
        Box::new(RecordingTransport::default()),
        CompletionNotifier::new(callbacks.clone()),
    )
    .unwrap();

    let owners: Vec<_> = (0..32)
        .map(|i| {
            Arc::new(CountingOwner {
                name: format!("client{i}"),
                ..Default::default()
            })
        })
        .collect();
    let requests: Vec<_> = owners
        .iter()
        .enumerate()
        .map(|(i, owner)| {
            let req = PendingRequest::with_owner(owner.name.clone(), owner.clone());
            req.set_command(read(i as u32)).unwrap();
            req
        })
        .collect();

    for req in &requests {
        worker.enqueue(req).unwrap();
    }
    worker.shutdown();
    callbacks.shutdown();

    for (owner, req) in owners.iter().zip(&requests) {
        assert_eq!(req.completions(), 1);
        assert_eq!(owner.resumed.lock().get(&owner.name), Some(&1));
    }
}

// ─── Correlation ────────────────────────────────────────────────────

#[test]
fn test_correlation_ids_increase_by_one() {
    let transport = RecordingTransport::default();
    let seen = transport.seen.clone();
    let worker = CommandWorker::spawn(Box::new(transport), CompletionNotifier::inline()).unwrap();

    let req = request("seq", 0);
    for _ in 0..20 {
        worker.enqueue(&req).unwrap();
        assert_eq!(req.wait_timeout(WAIT), Some(RequestStatus::Success));
    }

    let ids: Vec<u16> = seen.lock().iter().map(|c| c.com_id).collect();
    assert_eq!(ids, (1..=20).collect::<Vec<u16>>());
    assert_eq!(worker.stats().last_id, 20);
}

#[test]
fn test_wrong_echo_always_yields_correlation_error() {
    let worker = CommandWorker::spawn(
        Box::new(FixedTransport {
            payload: vec![0xDEAD],
            echo_offset: 1,
        }),
        CompletionNotifier::inline(),
    )
    .unwrap();

    let req = request("bad-echo", 0);
    for assigned in 1..=5u16 {
        worker.enqueue(&req).unwrap();
        assert_eq!(req.wait_timeout(WAIT), Some(RequestStatus::CorrelationError));
        assert_eq!(
            req.outcome(),
            Err(DriverError::CorrelationMismatch {
                assigned,
                echoed: assigned + 1,
            })
        );
    }
    assert_eq!(worker.stats().correlation_errors, 5);
    assert_eq!(worker.stats().succeeded, 0);
}

#[test]
fn test_example_round_trip() {
    let worker = CommandWorker::spawn(
        Box::new(FixedTransport {
            payload: vec![0x1234],
            echo_offset: 0,
        }),
        CompletionNotifier::inline(),
    )
    .unwrap();

    let command = read(0);
    assert_eq!(command.format_code, FORMAT_CODE_SEQ);
    assert_eq!(command.main_code, MAIN_CODE_SEQ_DEVICE);
    assert_eq!(command.sub_code, SUB_CODE_READ);
    assert_eq!(command.dest_slot, 3);

    let req = PendingRequest::new("ai");
    req.set_command(command).unwrap();
    worker.enqueue(&req).unwrap();

    assert_eq!(req.wait_timeout(WAIT), Some(RequestStatus::Success));
    assert_eq!(req.command().unwrap().com_id, 1);
    let response = req.outcome().unwrap();
    assert_eq!(response.com_id, 1);
    assert_eq!(response.error_code, 0);
    assert_eq!(response.data, vec![0x1234]);
}

// ─── Failures ───────────────────────────────────────────────────────

#[test]
fn test_transport_failure_then_recovery() {
    let cpu = SimulatedCpu::new(Duration::ZERO);
    let handle = cpu.handle();
    handle.poke(3, DeviceType::DataRegister, 0, 7);
    let worker = CommandWorker::spawn(Box::new(cpu), CompletionNotifier::inline()).unwrap();

    handle.fail_next(1);
    let req = request("ai", 0);
    worker.enqueue(&req).unwrap();
    assert_eq!(req.wait_timeout(WAIT), Some(RequestStatus::TransportError));
    assert!(matches!(req.outcome(), Err(DriverError::Transport(_))));

    worker.enqueue(&req).unwrap();
    assert_eq!(req.wait_timeout(WAIT), Some(RequestStatus::Success));
    assert_eq!(req.outcome().unwrap().data, vec![7]);

    let stats = worker.stats();
    assert_eq!(stats.transport_errors, 1);
    assert_eq!(stats.succeeded, 1);
    // Ids keep advancing across failures.
    assert_eq!(stats.last_id, 2);
}

#[test]
fn test_device_error_code_reaches_outcome() {
    let worker = CommandWorker::spawn(
        Box::new(SimulatedCpu::new(Duration::ZERO)),
        CompletionNotifier::inline(),
    )
    .unwrap();

    let req = PendingRequest::new("empty-slot");
    req.set_command(Command::read(1, 0, DeviceType::DataRegister, AccessType::Word, 0, 1))
        .unwrap();
    worker.enqueue(&req).unwrap();
    assert_eq!(req.wait_timeout(WAIT), Some(RequestStatus::Success));
    assert!(matches!(req.outcome(), Err(DriverError::DeviceError(_))));
}

#[test]
fn test_range_past_last_address_keeps_worker_running() {
    let worker = CommandWorker::spawn(
        Box::new(SimulatedCpu::new(Duration::ZERO)),
        CompletionNotifier::inline(),
    )
    .unwrap();

    let edge = PendingRequest::new("edge");
    edge.set_command(Command::read(1, 3, DeviceType::DataRegister, AccessType::Word, u32::MAX, 2))
        .unwrap();
    worker.enqueue(&edge).unwrap();
    assert_eq!(edge.wait_timeout(WAIT), Some(RequestStatus::Success));
    assert_eq!(edge.outcome(), Err(DriverError::DeviceError(ERR_ADDRESS_RANGE)));

    let next = request("next", 0);
    worker.enqueue(&next).unwrap();
    assert_eq!(next.wait_timeout(WAIT), Some(RequestStatus::Success));
    assert_eq!(next.outcome().unwrap().data, vec![0]);
}

#[test]
fn test_panicking_transport_fails_one_request_only() {
    let worker = CommandWorker::spawn(
        Box::new(PanicOnceTransport::default()),
        CompletionNotifier::inline(),
    )
    .unwrap();

    let first = request("first", 0);
    let second = request("second", 1);
    worker.enqueue(&first).unwrap();
    worker.enqueue(&second).unwrap();

    assert_eq!(first.wait_timeout(WAIT), Some(RequestStatus::TransportError));
    match first.outcome() {
        Err(DriverError::Transport(message)) => assert!(message.contains("channel driver fault")),
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert_eq!(second.wait_timeout(WAIT), Some(RequestStatus::Success));
    assert_eq!(second.outcome().unwrap().data, vec![1]);

    let stats = worker.stats();
    assert_eq!(stats.transport_errors, 1);
    assert_eq!(stats.succeeded, 1);
}

/// Owner whose resumption blows up on the worker thread.
struct PanickingOwner;

impl RequestOwner for PanickingOwner {
    fn resume(&self, _status: RequestStatus) {
        panic!("owner resumption fault");
    }
}

#[test]
fn test_dead_worker_fails_queued_requests_and_refuses_new_ones() {
    let (gate, rx) = mpsc::channel();
    let worker = CommandWorker::spawn(
        Box::new(GatedTransport { gate: rx }),
        CompletionNotifier::inline(),
    )
    .unwrap();

    let first = PendingRequest::with_owner("first", Arc::new(PanickingOwner));
    first.set_command(read(0)).unwrap();
    worker.enqueue(&first).unwrap();
    let queued: Vec<_> = (1..4).map(|i| request("queued", i)).collect();
    for req in &queued {
        worker.enqueue(req).unwrap();
    }

    gate.send(()).unwrap();
    assert_eq!(first.wait_timeout(WAIT), Some(RequestStatus::Success));
    for req in &queued {
        assert_eq!(req.wait_timeout(WAIT), Some(RequestStatus::TransportError));
        assert_eq!(
            req.outcome(),
            Err(DriverError::Transport("command worker stopped".to_string()))
        );
    }
    assert_eq!(worker.enqueue(&request("late", 9)), Err(DriverError::Stopped));
}

// ─── Reuse ──────────────────────────────────────────────────────────

#[test]
fn test_request_reuse_and_busy_rejection() {
    let (gate, rx) = mpsc::channel();
    let worker =
        CommandWorker::spawn(Box::new(GatedTransport { gate: rx }), CompletionNotifier::inline())
            .unwrap();

    let req = request("ao", 1);
    for cycle in 1..=3u64 {
        worker.enqueue(&req).unwrap();
        assert_eq!(req.status(), RequestStatus::Pending);

        // Queued or in flight: neither resubmission nor modification.
        assert!(matches!(worker.enqueue(&req), Err(DriverError::InvalidArgument(_))));
        assert!(matches!(req.set_command(read(2)), Err(DriverError::InvalidArgument(_))));

        gate.send(()).unwrap();
        assert_eq!(req.wait_timeout(WAIT), Some(RequestStatus::Success));
        assert_eq!(req.completions(), cycle);

        req.set_command(Command::write(
            1,
            3,
            DeviceType::DataRegister,
            AccessType::Word,
            cycle as u32,
            vec![cycle as u16],
        ))
        .unwrap();
    }
}

#[test]
fn test_invalid_requests_are_rejected_synchronously() {
    let worker = CommandWorker::spawn(
        Box::new(RecordingTransport::default()),
        CompletionNotifier::inline(),
    )
    .unwrap();

    let empty = PendingRequest::new("empty");
    assert!(matches!(worker.enqueue(&empty), Err(DriverError::InvalidArgument(_))));
    assert_eq!(empty.status(), RequestStatus::Idle);

    let relay_word = PendingRequest::new("relay");
    relay_word
        .set_command(Command::read(1, 3, DeviceType::InternalRelay, AccessType::Word, 0, 1))
        .unwrap();
    assert!(matches!(worker.enqueue(&relay_word), Err(DriverError::InvalidArgument(_))));
    assert_eq!(worker.stats().completed, 0);
}
