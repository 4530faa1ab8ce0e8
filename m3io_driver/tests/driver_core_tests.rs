//! # Driver Core Integration Tests
//!
//! End-to-end runs of `DriverCore` on the simulation backend, configured
//! from a TOML file the way the binary does it.

use m3io_common::error::DriverError;
use m3io_common::protocol::DeviceType;
use m3io_driver::clients::{PollClient, WatchClient};
use m3io_driver::drivers::simulation::{SimulatedCpu, SimulatedInterrupts};
use m3io_driver::{Backend, BackendRegistry, DriverCore, EventInjector, WakeSignal};
use std::io::Write;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::NamedTempFile;

const CONFIG: &str = r#"
backend = "simulation"

[shared]
service_name = "m3io-test"

[command]
resume = "inline"
timeout_s = 2

[interrupts]
max_unit = 2
max_slot = 8

[[poll]]
name = "d200"
dest_slot = 3
device = "data_register"
top = 200
count = 2

[[watch]]
name = "door"
unit = 1
slot = 4
channel = 7
"#;

fn write_config(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file
}

#[test]
fn test_configured_clients_run_on_simulation() {
    let file = write_config(CONFIG);
    let config = DriverCore::load_config(file.path()).unwrap();
    let mut core = DriverCore::new(config.clone()).unwrap();
    core.init(&BackendRegistry::with_builtin()).unwrap();

    let watch = WatchClient::new(&config.watch[0]);
    let addr = watch.address();
    core.register(watch.clone(), addr.unit, addr.slot, addr.channel)
        .unwrap();

    let poll = PollClient::new(&config.poll[0], &config.command, core.request_queue().unwrap())
        .unwrap();
    assert_eq!(poll.poll_once().unwrap(), vec![0, 0]);

    let injector = core.injector().unwrap();
    assert_eq!(injector.raise(addr).unwrap(), 1);

    let deadline = Instant::now() + Duration::from_secs(10);
    while watch.wakeups() == 0 && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(5));
    }
    assert_eq!(watch.wakeups(), 1);

    let stats = core.stats();
    assert_eq!(stats.worker.completed, 1);
    assert_eq!(stats.buckets, 1);
    core.shutdown();
}

#[test]
fn test_bounds_from_config_are_enforced() {
    let file = write_config(CONFIG);
    let config = DriverCore::load_config(file.path()).unwrap();
    let mut core = DriverCore::new(config).unwrap();
    core.init(&BackendRegistry::with_builtin()).unwrap();

    assert!(matches!(
        core.register(WakeSignal::new(), 2, 1, 1),
        Err(DriverError::InvalidArgument(_))
    ));
    assert!(matches!(
        core.register(WakeSignal::new(), 1, 9, 1),
        Err(DriverError::InvalidArgument(_))
    ));
}

#[test]
fn test_missing_config_file_is_a_config_error() {
    let result = DriverCore::load_config(std::path::Path::new("/nonexistent/m3io.toml"));
    assert!(matches!(result, Err(DriverError::ConfigError(_))));
}

#[test]
fn test_injected_backend_exposes_simulator_handles() {
    let cpu = SimulatedCpu::new(Duration::ZERO);
    let memory = cpu.handle();
    memory.poke(3, DeviceType::DataRegister, 200, 0x00AA);
    let interrupts = Arc::new(SimulatedInterrupts::new());

    let config = DriverCore::load_config(write_config(CONFIG).path()).unwrap();
    let mut core = DriverCore::new(config.clone()).unwrap();
    core.start(Backend {
        transport: Box::new(cpu),
        interrupts: interrupts.clone(),
        injector: Some(interrupts.clone()),
    })
    .unwrap();
    assert!(matches!(
        core.init(&BackendRegistry::with_builtin()),
        Err(DriverError::InitFailed(_))
    ));

    memory.fail_next(1);
    let poll = PollClient::new(&config.poll[0], &config.command, core.request_queue().unwrap())
        .unwrap();
    assert!(matches!(poll.poll_once(), Err(DriverError::Transport(_))));
    assert_eq!(poll.poll_once().unwrap(), vec![0x00AA, 0]);

    let stats = core.stats();
    assert_eq!(stats.worker.transport_errors, 1);
    assert_eq!(stats.worker.succeeded, 1);
    assert_eq!(memory.calls(), 2);
}
