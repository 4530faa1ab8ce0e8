//! Simulation backend with System V message queues.
//!
//! Commands are served by the simulated CPU; interrupt events travel
//! through real kernel message queues (`msgget`/`msgsnd`/`msgrcv`), the
//! same path hardware drivers use to post events to user space. Removing
//! a queue (`IPC_RMID`) wakes its blocked receiver with `EIDRM`, which
//! the event queue reports as `QueueClosed`.

use crate::backend_registry::{Backend, EventInjector};
use crate::drivers::simulation::SimulatedCpu;
use m3io_common::config::DriverConfig;
use m3io_common::error::DriverError;
use m3io_common::event::{IoAddress, IoEventMessage};
use m3io_common::transport::{EventQueue, InterruptController, QueueHandle};
use nix::errno::Errno;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Registry name of this backend.
pub const BACKEND_NAME: &str = "simulation-msgq";

/// Message type used for event messages.
const EVENT_MSG_TYPE: libc::c_long = 1;

/// Capacity of the message text area.
const MSG_TEXT_LEN: usize = 32;

#[repr(C)]
struct MsgBuf {
    mtype: libc::c_long,
    mtext: [u8; MSG_TEXT_LEN],
}

impl MsgBuf {
    fn new() -> Self {
        Self {
            mtype: EVENT_MSG_TYPE,
            mtext: [0; MSG_TEXT_LEN],
        }
    }
}

/// Factory function to create the message queue backend.
pub fn create_backend(config: &DriverConfig) -> Result<Backend, DriverError> {
    let cpu = SimulatedCpu::new(Duration::from_micros(config.simulation.latency_us));
    let interrupts = Arc::new(MsgQueueInterrupts::new());
    Ok(Backend {
        transport: Box::new(cpu),
        interrupts: interrupts.clone(),
        injector: Some(interrupts),
    })
}

#[derive(Default)]
struct MsgqState {
    queues: Vec<QueueHandle>,
    enabled: Vec<(IoAddress, QueueHandle)>,
}

/// Interrupt controller backed by System V message queues.
#[derive(Default)]
pub struct MsgQueueInterrupts {
    state: Mutex<MsgqState>,
}

impl MsgQueueInterrupts {
    /// Create a controller with no queues.
    pub fn new() -> Self {
        Self::default()
    }

    /// Post raw bytes to a queue without encoding.
    ///
    /// # Errors
    /// `DriverError::InvalidArgument` for oversized messages or unknown
    /// queues, `DriverError::Transport` if `msgsnd` fails.
    pub fn inject_raw(&self, queue: QueueHandle, bytes: &[u8]) -> Result<(), DriverError> {
        if !self.state.lock().queues.contains(&queue) {
            return Err(DriverError::InvalidArgument(format!("unknown queue {queue}")));
        }
        send(queue, bytes)
    }
}

/// Post one message without blocking.
fn send(queue: QueueHandle, bytes: &[u8]) -> Result<(), DriverError> {
    if bytes.len() > MSG_TEXT_LEN {
        return Err(DriverError::InvalidArgument(format!(
            "event message of {} bytes exceeds {}",
            bytes.len(),
            MSG_TEXT_LEN
        )));
    }
    let mut msg = MsgBuf::new();
    msg.mtext[..bytes.len()].copy_from_slice(bytes);

    // SAFETY: msg is a valid msgbuf layout and outlives the call; the size
    // passed covers only the initialized text area.
    let rc = unsafe {
        libc::msgsnd(
            queue.0,
            &msg as *const MsgBuf as *const libc::c_void,
            bytes.len(),
            libc::IPC_NOWAIT,
        )
    };
    if rc < 0 {
        return Err(DriverError::Transport(format!(
            "msgsnd to {}: {}",
            queue,
            Errno::last()
        )));
    }
    Ok(())
}

/// Remove a queue from the kernel.
fn remove(queue: QueueHandle) -> Result<(), DriverError> {
    // SAFETY: IPC_RMID takes no buffer.
    let rc = unsafe { libc::msgctl(queue.0, libc::IPC_RMID, std::ptr::null_mut()) };
    if rc < 0 {
        return Err(DriverError::Transport(format!(
            "msgctl(IPC_RMID) on {}: {}",
            queue,
            Errno::last()
        )));
    }
    Ok(())
}

impl InterruptController for MsgQueueInterrupts {
    fn name(&self) -> &'static str {
        BACKEND_NAME
    }

    fn open_queue(&self) -> Result<(QueueHandle, Box<dyn EventQueue>), DriverError> {
        // SAFETY: plain syscall, no pointers involved.
        let id = unsafe { libc::msgget(libc::IPC_PRIVATE, libc::IPC_CREAT | 0o600) };
        if id < 0 {
            return Err(DriverError::InitFailed(format!("msgget: {}", Errno::last())));
        }
        let handle = QueueHandle(id);
        self.state.lock().queues.push(handle);
        debug!("Created message queue {}", handle);
        Ok((handle, Box::new(SysvEventQueue { id })))
    }

    fn enable(&self, address: IoAddress, queue: QueueHandle) -> Result<(), DriverError> {
        let mut state = self.state.lock();
        if !state.queues.contains(&queue) {
            return Err(DriverError::Transport(format!(
                "enable ({address}) on unknown queue {queue}"
            )));
        }
        if !state.enabled.contains(&(address, queue)) {
            state.enabled.push((address, queue));
        }
        info!("Interrupt ({}) enabled on message queue {}", address, queue);
        Ok(())
    }

    fn close_queue(&self, queue: QueueHandle) -> Result<(), DriverError> {
        let mut state = self.state.lock();
        let Some(pos) = state.queues.iter().position(|q| *q == queue) else {
            return Err(DriverError::InvalidArgument(format!("unknown queue {queue}")));
        };
        state.queues.swap_remove(pos);
        state.enabled.retain(|(_, q)| *q != queue);
        remove(queue)
    }
}

impl EventInjector for MsgQueueInterrupts {
    fn enabled(&self) -> Vec<IoAddress> {
        self.state.lock().enabled.iter().map(|(a, _)| *a).collect()
    }

    fn raise(&self, address: IoAddress) -> Result<usize, DriverError> {
        let targets: Vec<QueueHandle> = self
            .state
            .lock()
            .enabled
            .iter()
            .filter(|(a, _)| *a == address)
            .map(|(_, q)| *q)
            .collect();
        let message = IoEventMessage::encode(address);
        for queue in &targets {
            send(*queue, &message)?;
        }
        Ok(targets.len())
    }
}

impl Drop for MsgQueueInterrupts {
    fn drop(&mut self) {
        for queue in self.state.get_mut().queues.drain(..) {
            if let Err(e) = remove(queue) {
                warn!("Leaking message queue: {}", e);
            }
        }
    }
}

/// Blocking receive side of one kernel message queue.
struct SysvEventQueue {
    id: libc::c_int,
}

impl EventQueue for SysvEventQueue {
    fn receive(&mut self, buf: &mut [u8]) -> Result<usize, DriverError> {
        let mut msg = MsgBuf::new();
        loop {
            // SAFETY: msg is a valid msgbuf with MSG_TEXT_LEN bytes of text;
            // MSG_NOERROR truncates longer messages instead of failing.
            let n = unsafe {
                libc::msgrcv(
                    self.id,
                    &mut msg as *mut MsgBuf as *mut libc::c_void,
                    MSG_TEXT_LEN,
                    0,
                    libc::MSG_NOERROR,
                )
            };
            if n >= 0 {
                let len = (n as usize).min(buf.len());
                buf[..len].copy_from_slice(&msg.mtext[..len]);
                return Ok(len);
            }
            match Errno::last() {
                Errno::EINTR => continue,
                Errno::EIDRM | Errno::EINVAL => return Err(DriverError::QueueClosed),
                e => return Err(DriverError::Receive(format!("msgrcv on q{}: {}", self.id, e))),
            }
        }
    }
}
