//! Interrupt registration table.
//!
//! Registrations are grouped in buckets keyed by (unit, slot). Each bucket
//! is a bounded vector of channel entries and owns one event
//! queue served by one dispatcher thread. Both are created with the
//! bucket's first registration; the get-or-create runs under the registry
//! lock, and the entry list is guarded by a lock shared with the
//! dispatcher's fan-out.
//!
//! A channel occupies one entry no matter how many clients watch it:
//! later registrants on the same channel are coalesced into the existing
//! entry and woken together with the first one.

use super::dispatcher::InterruptDispatcher;
use super::listener::EventListener;
use heapless::Vec as BoundedVec;
use m3io_common::config::InterruptConfig;
use m3io_common::consts::IO_INTR_CAPACITY;
use m3io_common::error::DriverError;
use m3io_common::event::IoAddress;
use m3io_common::transport::{InterruptController, QueueHandle};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, error, info, warn};

/// One bucket entry: a channel number and the clients watching it.
#[derive(Clone)]
pub struct InterruptChannel {
    /// Channel number within the (unit, slot) module
    pub channel: u16,
    /// Clients woken on matching events, first registrant first
    pub listeners: Vec<Arc<dyn EventListener>>,
}

impl InterruptChannel {
    fn new(channel: u16, listener: Arc<dyn EventListener>) -> Self {
        Self {
            channel,
            listeners: vec![listener],
        }
    }
}

/// Registrations for one (unit, slot).
pub struct InterruptBucket {
    unit: u8,
    slot: u8,
    queue: QueueHandle,
    entries: Mutex<BoundedVec<InterruptChannel, IO_INTR_CAPACITY>>,
}

impl InterruptBucket {
    fn new(unit: u8, slot: u8, queue: QueueHandle) -> Self {
        Self {
            unit,
            slot,
            queue,
            entries: Mutex::new(BoundedVec::new()),
        }
    }

    /// Unit number.
    pub fn unit(&self) -> u8 {
        self.unit
    }

    /// Slot number.
    pub fn slot(&self) -> u8 {
        self.slot
    }

    /// Event queue bound to this bucket.
    pub fn queue(&self) -> QueueHandle {
        self.queue
    }

    /// Number of registrations.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// True when no registration exists yet.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Registered channel numbers in registration order.
    pub fn channels(&self) -> Vec<u16> {
        self.entries.lock().iter().map(|e| e.channel).collect()
    }

    /// Number of clients watching `channel`.
    pub fn listener_count(&self, channel: u16) -> usize {
        self.entries
            .lock()
            .iter()
            .filter(|e| e.channel == channel)
            .map(|e| e.listeners.len())
            .sum()
    }

    /// Listeners registered on `channel`, collected under the entry lock.
    fn listeners_for(&self, channel: u16) -> Vec<Arc<dyn EventListener>> {
        self.entries
            .lock()
            .iter()
            .filter(|e| e.channel == channel)
            .flat_map(|e| e.listeners.iter().cloned())
            .collect()
    }
}

/// Dispatch counters shared by all dispatcher threads.
#[derive(Debug, Default)]
pub(crate) struct DispatchCounters {
    pub(crate) events: AtomicU64,
    pub(crate) wakeups: AtomicU64,
    pub(crate) unmatched: AtomicU64,
    pub(crate) malformed: AtomicU64,
    pub(crate) receive_errors: AtomicU64,
}

/// Point-in-time copy of the dispatch counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    /// Well-formed events received
    pub events: u64,
    /// Listener wake-ups issued
    pub wakeups: u64,
    /// Events matching no registration
    pub unmatched: u64,
    /// Messages dropped as malformed
    pub malformed: u64,
    /// Failed receive calls
    pub receive_errors: u64,
}

/// Bucket lookup shared between the registry and its dispatchers.
#[derive(Default)]
pub(crate) struct BucketTable {
    buckets: RwLock<HashMap<(u8, u8), Arc<InterruptBucket>>>,
    pub(crate) counters: DispatchCounters,
}

impl BucketTable {
    pub(crate) fn get(&self, unit: u8, slot: u8) -> Option<Arc<InterruptBucket>> {
        self.buckets.read().get(&(unit, slot)).cloned()
    }

    fn insert(&self, bucket: Arc<InterruptBucket>) {
        self.buckets
            .write()
            .insert((bucket.unit, bucket.slot), bucket);
    }

    fn len(&self) -> usize {
        self.buckets.read().len()
    }

    /// Wake every listener registered on `address`. Returns the number of
    /// listeners woken.
    pub(crate) fn dispatch(&self, address: IoAddress) -> usize {
        self.counters.events.fetch_add(1, Ordering::Relaxed);

        let Some(bucket) = self.get(address.unit, address.slot) else {
            warn!("No registration table for interrupt ({})", address);
            self.counters.unmatched.fetch_add(1, Ordering::Relaxed);
            return 0;
        };

        let listeners = bucket.listeners_for(address.channel);
        if listeners.is_empty() {
            debug!("No listener for interrupt ({})", address);
            self.counters.unmatched.fetch_add(1, Ordering::Relaxed);
            return 0;
        }

        for listener in &listeners {
            listener.wake();
        }
        self.counters
            .wakeups
            .fetch_add(listeners.len() as u64, Ordering::Relaxed);
        listeners.len()
    }

    fn stats(&self) -> DispatchStats {
        let c = &self.counters;
        DispatchStats {
            events: c.events.load(Ordering::Relaxed),
            wakeups: c.wakeups.load(Ordering::Relaxed),
            unmatched: c.unmatched.load(Ordering::Relaxed),
            malformed: c.malformed.load(Ordering::Relaxed),
            receive_errors: c.receive_errors.load(Ordering::Relaxed),
        }
    }
}

/// Interrupt registration and dispatch table.
pub struct InterruptRegistry {
    controller: Arc<dyn InterruptController>,
    bounds: InterruptConfig,
    table: Arc<BucketTable>,
    /// Registration lock; also owns the dispatcher threads.
    dispatchers: Mutex<Vec<InterruptDispatcher>>,
}

impl InterruptRegistry {
    /// Create an empty registry. No queue or thread exists until the
    /// first registration.
    pub fn new(controller: Arc<dyn InterruptController>, bounds: InterruptConfig) -> Self {
        info!(
            "Interrupt registry on '{}' (units 0..{}, slots 1..={}, {} channels per slot)",
            controller.name(),
            bounds.max_unit,
            bounds.max_slot,
            IO_INTR_CAPACITY
        );
        Self {
            controller,
            bounds,
            table: Arc::new(BucketTable::default()),
            dispatchers: Mutex::new(Vec::new()),
        }
    }

    /// Register `listener` for interrupts on (unit, slot, channel).
    ///
    /// Registering a channel already present in the bucket adds no entry
    /// and issues no enable call; the new client joins the existing entry
    /// and is woken alongside earlier ones. Registering the same client
    /// twice is a no-op.
    ///
    /// # Errors
    /// - `InvalidArgument` if unit/slot are outside the configured bounds
    /// - `ResourceExhausted` if the bucket already holds `IO_INTR_CAPACITY` entries
    /// - `InitFailed` if the bucket's queue or dispatcher cannot be created
    /// - any error of the controller's `enable` call
    pub fn register(
        &self,
        listener: Arc<dyn EventListener>,
        unit: u8,
        slot: u8,
        channel: u16,
    ) -> Result<(), DriverError> {
        if !self.bounds.contains(unit, slot) {
            return Err(DriverError::InvalidArgument(format!(
                "U{} S{} outside units 0..{} / slots 1..={}",
                unit, slot, self.bounds.max_unit, self.bounds.max_slot
            )));
        }

        let mut dispatchers = self.dispatchers.lock();
        let bucket = match self.table.get(unit, slot) {
            Some(bucket) => bucket,
            None => {
                let bucket = self.create_bucket(unit, slot, &mut dispatchers)?;
                self.table.insert(Arc::clone(&bucket));
                bucket
            }
        };

        let address = IoAddress::new(unit, slot, channel);
        let mut entries = bucket.entries.lock();
        if let Some(entry) = entries.iter_mut().find(|e| e.channel == channel) {
            if entry.listeners.iter().any(|l| Arc::ptr_eq(l, &listener)) {
                debug!("Interrupt ({}) already registered for this client", address);
            } else {
                entry.listeners.push(listener);
                warn!(
                    "Interrupt ({}) already registered, coalescing client #{} into the entry",
                    address,
                    entry.listeners.len()
                );
            }
            return Ok(());
        }
        if entries.is_full() {
            error!("No interrupt slot left for ({})", address);
            return Err(DriverError::ResourceExhausted {
                unit,
                slot,
                capacity: IO_INTR_CAPACITY,
            });
        }

        self.controller.enable(address, bucket.queue).map_err(|e| {
            error!("Enabling interrupt ({}) failed: {}", address, e);
            e
        })?;

        if entries.push(InterruptChannel::new(channel, listener)).is_err() {
            return Err(DriverError::ResourceExhausted {
                unit,
                slot,
                capacity: IO_INTR_CAPACITY,
            });
        }
        info!(
            "Registered interrupt ({}) on {} [{}/{}]",
            address,
            bucket.queue,
            entries.len(),
            IO_INTR_CAPACITY
        );
        Ok(())
    }

    /// Open the bucket's event queue and spawn its dispatcher.
    fn create_bucket(
        &self,
        unit: u8,
        slot: u8,
        dispatchers: &mut Vec<InterruptDispatcher>,
    ) -> Result<Arc<InterruptBucket>, DriverError> {
        let (handle, queue) = self.controller.open_queue().map_err(|e| {
            error!("Opening event queue for U{} S{} failed: {}", unit, slot, e);
            e
        })?;

        let dispatcher =
            match InterruptDispatcher::spawn(unit, slot, handle, queue, Arc::clone(&self.table)) {
                Ok(dispatcher) => dispatcher,
                Err(e) => {
                    if let Err(close_err) = self.controller.close_queue(handle) {
                        warn!("Closing {} after failed spawn: {}", handle, close_err);
                    }
                    return Err(e);
                }
            };
        dispatchers.push(dispatcher);

        Ok(Arc::new(InterruptBucket::new(unit, slot, handle)))
    }

    /// Bucket for (unit, slot), if one was created.
    pub fn bucket(&self, unit: u8, slot: u8) -> Option<Arc<InterruptBucket>> {
        self.table.get(unit, slot)
    }

    /// Number of buckets created so far (one dispatcher thread each).
    pub fn bucket_count(&self) -> usize {
        self.table.len()
    }

    /// Dispatch counters across all buckets.
    pub fn stats(&self) -> DispatchStats {
        self.table.stats()
    }

    /// Close every event queue and join the dispatcher threads.
    pub fn shutdown(&self) {
        let mut dispatchers = std::mem::take(&mut *self.dispatchers.lock());
        for dispatcher in &mut dispatchers {
            if let Err(e) = self.controller.close_queue(dispatcher.queue()) {
                warn!("Closing {} failed: {}", dispatcher.queue(), e);
            }
            dispatcher.join();
        }
        if !dispatchers.is_empty() {
            info!("Stopped {} interrupt dispatchers", dispatchers.len());
        }
    }
}

impl Drop for InterruptRegistry {
    fn drop(&mut self) {
        self.shutdown();
    }
}
