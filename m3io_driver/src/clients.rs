//! Configured clients run by the driver binary.
//!
//! - [`PollClient`] - periodically reads a device range through the
//!   command queue, blocking on each completion
//! - [`WatchClient`] - interrupt listener that counts and logs wake-ups
//! - [`spawn_event_ticker`] - raises every enabled interrupt periodically
//!   on simulated backends

use crate::backend_registry::EventInjector;
use crate::interrupt::EventListener;
use crate::queue::RequestQueue;
use crate::request::PendingRequest;
use m3io_common::config::{CommandConfig, PollConfig, WatchConfig};
use m3io_common::error::DriverError;
use m3io_common::event::IoAddress;
use m3io_common::protocol::Command;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Granularity of the running-flag checks while sleeping.
const SLEEP_SLICE: Duration = Duration::from_millis(50);

/// Slack added to the transport timeout when waiting for a completion.
const COMPLETION_GRACE: Duration = Duration::from_millis(500);

/// Client reading one device range per period.
pub struct PollClient {
    name: String,
    period: Duration,
    completion_timeout: Duration,
    request: Arc<PendingRequest>,
    queue: Arc<RequestQueue>,
}

impl PollClient {
    /// Build the client and its reusable request.
    ///
    /// # Errors
    /// `InvalidArgument` if the configured read is not a valid command.
    pub fn new(
        poll: &PollConfig,
        command: &CommandConfig,
        queue: Arc<RequestQueue>,
    ) -> Result<Self, DriverError> {
        let mut frame = Command::read(
            command.src_slot,
            poll.dest_slot,
            poll.device,
            poll.access,
            poll.top,
            poll.count,
        );
        frame.timeout_s = command.timeout_s;
        frame.validate()?;

        let request = PendingRequest::new(poll.name.clone());
        request.set_command(frame)?;

        Ok(Self {
            name: poll.name.clone(),
            period: Duration::from_millis(poll.period_ms),
            completion_timeout: Duration::from_secs(u64::from(command.timeout_s)) + COMPLETION_GRACE,
            request,
            queue,
        })
    }

    /// Client name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run one read cycle and return the payload.
    ///
    /// # Errors
    /// Enqueue errors, the cycle's failure status, or `Transport` if no
    /// completion arrived in time.
    pub fn poll_once(&self) -> Result<Vec<u16>, DriverError> {
        self.queue.enqueue(&self.request)?;
        if self.request.wait_timeout(self.completion_timeout).is_none() {
            return Err(DriverError::Transport(format!(
                "no completion within {:?}",
                self.completion_timeout
            )));
        }
        Ok(self.request.outcome()?.data)
    }

    /// Run the poll loop on its own thread until `running` clears or the
    /// queue stops.
    pub fn spawn(self, running: Arc<AtomicBool>) -> Result<JoinHandle<()>, DriverError> {
        let thread_name = format!("m3io-poll-{}", self.name);
        thread::Builder::new()
            .name(thread_name)
            .spawn(move || self.run(&running))
            .map_err(|e| DriverError::InitFailed(format!("poll thread: {e}")))
    }

    fn run(self, running: &AtomicBool) {
        info!("{}: polling every {:?}", self.name, self.period);
        while running.load(Ordering::SeqCst) {
            match self.poll_once() {
                Ok(words) => info!("{}: {:04X?}", self.name, words),
                Err(DriverError::Stopped) => break,
                Err(e) => warn!("{}: {}", self.name, e),
            }
            sleep_while(running, self.period);
        }
        debug!("{}: poll loop exited after {} cycles", self.name, self.request.completions());
    }
}

/// Interrupt listener logging every wake-up.
pub struct WatchClient {
    name: String,
    address: IoAddress,
    wakeups: AtomicU64,
}

impl WatchClient {
    /// Create a listener for a `[[watch]]` entry.
    pub fn new(watch: &WatchConfig) -> Arc<Self> {
        Arc::new(Self {
            name: watch.name.clone(),
            address: IoAddress::new(watch.unit, watch.slot, watch.channel),
            wakeups: AtomicU64::new(0),
        })
    }

    /// Client name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Address this client registers for.
    pub fn address(&self) -> IoAddress {
        self.address
    }

    /// Wake-ups received so far.
    pub fn wakeups(&self) -> u64 {
        self.wakeups.load(Ordering::Relaxed)
    }
}

impl EventListener for WatchClient {
    fn wake(&self) {
        let n = self.wakeups.fetch_add(1, Ordering::Relaxed) + 1;
        info!("{}: interrupt ({}) #{}", self.name, self.address, n);
    }
}

/// Raise every enabled interrupt once per `period` until `running` clears.
pub fn spawn_event_ticker(
    injector: Arc<dyn EventInjector>,
    period: Duration,
    running: Arc<AtomicBool>,
) -> Result<JoinHandle<()>, DriverError> {
    thread::Builder::new()
        .name("m3io-sim-events".to_string())
        .spawn(move || {
            info!("Simulated interrupts every {:?}", period);
            while running.load(Ordering::SeqCst) {
                sleep_while(&running, period);
                for address in injector.enabled() {
                    if let Err(e) = injector.raise(address) {
                        warn!("Raising ({}) failed: {}", address, e);
                    }
                }
            }
        })
        .map_err(|e| DriverError::InitFailed(format!("event ticker thread: {e}")))
}

/// Sleep for `total`, returning early once `running` clears.
pub fn sleep_while(running: &AtomicBool, total: Duration) {
    let deadline = Instant::now() + total;
    while running.load(Ordering::SeqCst) {
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        thread::sleep(SLEEP_SLICE.min(deadline - now));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::simulation::SimulatedCpu;
    use crate::notifier::CompletionNotifier;
    use crate::worker::CommandWorker;
    use m3io_common::protocol::{AccessType, DeviceType};

    fn poll_config() -> PollConfig {
        PollConfig {
            name: "d100".to_string(),
            dest_slot: 3,
            device: DeviceType::DataRegister,
            access: AccessType::Word,
            top: 100,
            count: 2,
            period_ms: 10,
        }
    }

    #[test]
    fn poll_once_reads_device_memory() {
        let cpu = SimulatedCpu::new(Duration::ZERO);
        cpu.handle().poke(3, DeviceType::DataRegister, 101, 0xBEEF);
        let worker = CommandWorker::spawn(Box::new(cpu), CompletionNotifier::inline()).unwrap();

        let client = PollClient::new(&poll_config(), &CommandConfig::default(), worker.queue()).unwrap();
        assert_eq!(client.poll_once().unwrap(), vec![0, 0xBEEF]);
        assert_eq!(client.poll_once().unwrap(), vec![0, 0xBEEF]);
    }

    #[test]
    fn poll_after_shutdown_reports_stopped() {
        let cpu = SimulatedCpu::new(Duration::ZERO);
        let mut worker = CommandWorker::spawn(Box::new(cpu), CompletionNotifier::inline()).unwrap();
        let client = PollClient::new(&poll_config(), &CommandConfig::default(), worker.queue()).unwrap();
        worker.shutdown();
        assert_eq!(client.poll_once(), Err(DriverError::Stopped));
    }

    #[test]
    fn invalid_poll_is_rejected() {
        let mut poll = poll_config();
        poll.device = DeviceType::InternalRelay;
        let queue = Arc::new(RequestQueue::new());
        assert!(PollClient::new(&poll, &CommandConfig::default(), queue).is_err());
    }

    #[test]
    fn watch_client_counts_wakeups() {
        let watch = WatchClient::new(&WatchConfig {
            name: "door".to_string(),
            unit: 0,
            slot: 4,
            channel: 1,
        });
        watch.wake();
        watch.wake();
        assert_eq!(watch.wakeups(), 2);
        assert_eq!(watch.address(), IoAddress::new(0, 4, 1));
    }

    #[test]
    fn sleep_while_returns_when_flag_clears() {
        let running = AtomicBool::new(false);
        let start = Instant::now();
        sleep_while(&running, Duration::from_secs(10));
        assert!(start.elapsed() < Duration::from_secs(1));
    }
}
