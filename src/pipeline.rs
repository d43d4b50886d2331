//! Ingestion pipeline
//!
//! Decouples the driver callback (arrival path) from application dispatch.
//! Arrival validates, counts, translates and enqueues into a bounded FIFO; a
//! single worker thread drains the FIFO and invokes the registered callbacks
//! in arrival order. When the FIFO is full the newest message is dropped.

use crossbeam::channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, trace, warn};

use crate::backend::{Clock, InboundSink};
use crate::error::{MidiError, Result};
use crate::keys::{KeyEvent, KeyEventTranslator, VelocityCurve};
use crate::midi::{self, format_hex, DeviceId, WireMessage};
use crate::stats::{Statistics, StatisticsTracker};

/// Callback receiving every queued wire message
pub type MessageCallback = Arc<dyn Fn(WireMessage) + Send + Sync>;

/// Callback receiving every key event produced from a queued message
pub type KeyEventCallback = Arc<dyn Fn(KeyEvent) + Send + Sync>;

/// Outcome of a single arrival
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ingest {
    Queued,
    /// Failed validation; not counted as received
    Rejected,
    /// Queue full; counted as received and dropped
    Dropped,
}

/// Pipeline tuning, derived from the hub configuration
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub capacity: usize,
    pub wake_interval: Duration,
    pub target_latency_ms: f64,
    pub history_capacity: usize,
    pub velocity_curve: Option<VelocityCurve>,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            capacity: 1024,
            wake_interval: Duration::from_millis(1),
            target_latency_ms: 10.0,
            history_capacity: crate::keys::DEFAULT_HISTORY_CAPACITY,
            velocity_curve: None,
        }
    }
}

struct Delivery {
    message: WireMessage,
    key_event: Option<KeyEvent>,
}

/// State shared between the arrival path and the worker
struct Shared {
    tx: Sender<Delivery>,
    rx: Receiver<Delivery>,
    capacity: usize,
    wake_interval: Duration,
    clock: Clock,
    stats: StatisticsTracker,
    translator: KeyEventTranslator,
    velocity_curve: RwLock<Option<VelocityCurve>>,
    message_callback: RwLock<Option<MessageCallback>>,
    key_event_callback: RwLock<Option<KeyEventCallback>>,
    target_latency_ms: f64,
    latency_alarm: AtomicBool,
}

impl Shared {
    fn ingest(&self, mut message: WireMessage) -> Ingest {
        if !midi::validate(&message) {
            trace!("Rejected invalid message from {}: {:?}", message.source, message);
            return Ingest::Rejected;
        }

        self.stats.record_received();
        if message.timestamp > 0.0 {
            let latency_ms = (self.clock.now() - message.timestamp) * 1000.0;
            let average = self.stats.record_latency(latency_ms);
            self.check_latency(average);
        }

        // Release velocity passes through untouched
        if message.is_note_on() {
            if let Some(curve) = self.velocity_curve.read().as_ref() {
                message.data2 = curve.apply(message.data2);
            }
        }

        let key_event = self.translator.translate(&message);

        match self.tx.try_send(Delivery { message, key_event }) {
            Ok(()) => Ingest::Queued,
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {
                self.stats.record_dropped();
                trace!("Queue full, dropped {} from {}", message, message.source);
                Ingest::Dropped
            }
        }
    }

    /// Edge-triggered warning when the smoothed latency crosses the target
    fn check_latency(&self, average_ms: f64) {
        let over = average_ms > self.target_latency_ms;
        if over && !self.latency_alarm.swap(true, Ordering::Relaxed) {
            warn!(
                "MIDI input latency {:.2}ms exceeds target {:.2}ms",
                average_ms, self.target_latency_ms
            );
        } else if !over {
            self.latency_alarm.store(false, Ordering::Relaxed);
        }
    }

    fn dispatch(&self, delivery: Delivery) {
        // Callbacks are cloned out so no lock is held while they run
        let message_callback = self.message_callback.read().clone();
        if let Some(callback) = message_callback {
            callback(delivery.message);
        }

        if let Some(event) = delivery.key_event {
            let key_callback = self.key_event_callback.read().clone();
            if let Some(callback) = key_callback {
                callback(event);
            }
        }
    }

    fn run(&self, active: &AtomicBool) {
        debug!("Ingestion worker started");
        while active.load(Ordering::Acquire) {
            match self.rx.recv_timeout(self.wake_interval) {
                Ok(first) => {
                    let pending = self.rx.len();
                    self.dispatch(first);
                    for _ in 0..pending {
                        // A callback may have stopped the pipeline mid-batch;
                        // check before taking so nothing is dequeued and lost
                        if !active.load(Ordering::Acquire) {
                            break;
                        }
                        match self.rx.try_recv() {
                            Ok(delivery) => self.dispatch(delivery),
                            Err(_) => break,
                        }
                    }
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        debug!("Ingestion worker stopped");
    }
}

/// Cloneable handle onto the arrival path, safe to move into driver callbacks
#[derive(Clone)]
pub struct Arrival {
    shared: Arc<Shared>,
}

impl Arrival {
    pub fn ingest(&self, message: WireMessage) -> Ingest {
        self.shared.ingest(message)
    }

    pub fn ingest_bytes(&self, bytes: &[u8], timestamp: f64, source: DeviceId) -> Ingest {
        let outcome = self.shared.ingest(midi::decode(bytes, timestamp, source));
        if outcome == Ingest::Rejected {
            trace!("Malformed bytes from {}: {}", source, format_hex(bytes));
        }
        outcome
    }
}

struct Worker {
    active: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

/// Bounded queue plus its single background worker
pub struct IngestionPipeline {
    shared: Arc<Shared>,
    worker: Mutex<Option<Worker>>,
    /// Worker stopped from its own callback, joined by the next start
    detached: Mutex<Option<JoinHandle<()>>>,
}

impl IngestionPipeline {
    pub fn new(settings: PipelineSettings, clock: Clock) -> Self {
        let capacity = settings.capacity.max(1);
        let (tx, rx) = bounded(capacity);

        Self {
            shared: Arc::new(Shared {
                tx,
                rx,
                capacity,
                wake_interval: settings.wake_interval,
                clock,
                stats: StatisticsTracker::new(),
                translator: KeyEventTranslator::new(settings.history_capacity),
                velocity_curve: RwLock::new(settings.velocity_curve),
                message_callback: RwLock::new(None),
                key_event_callback: RwLock::new(None),
                target_latency_ms: settings.target_latency_ms,
                latency_alarm: AtomicBool::new(false),
            }),
            worker: Mutex::new(None),
            detached: Mutex::new(None),
        }
    }

    pub fn arrival(&self) -> Arrival {
        Arrival {
            shared: self.shared.clone(),
        }
    }

    /// Backend delivery sink feeding this pipeline
    pub fn sink(&self) -> InboundSink {
        let arrival = self.arrival();
        Arc::new(move |bytes: &[u8], timestamp: f64, source: DeviceId| {
            arrival.ingest_bytes(bytes, timestamp, source);
        })
    }

    pub fn ingest(&self, message: WireMessage) -> Ingest {
        self.shared.ingest(message)
    }

    /// Start the worker; no-op when already running
    pub fn start(&self) -> Result<()> {
        let mut worker = self.worker.lock();
        if worker.is_some() {
            return Ok(());
        }
        self.join_detached();

        let active = Arc::new(AtomicBool::new(true));
        let shared = self.shared.clone();
        let flag = active.clone();
        let handle = thread::Builder::new()
            .name("midi-ingest".to_string())
            .spawn(move || shared.run(&flag))
            .map_err(|e| MidiError::system(format!("failed to spawn ingestion worker: {}", e)))?;

        *worker = Some(Worker { active, handle });
        Ok(())
    }

    /// Stop the worker and wait for it to exit; no-op when already stopped
    ///
    /// Called from inside a callback, the worker is signalled but not joined.
    pub fn stop(&self) {
        let Some(worker) = self.worker.lock().take() else {
            return;
        };
        worker.active.store(false, Ordering::Release);

        if worker.handle.thread().id() == thread::current().id() {
            *self.detached.lock() = Some(worker.handle);
            return;
        }
        if worker.handle.join().is_err() {
            warn!("Ingestion worker panicked");
        }
    }

    /// Wait for a worker that stopped itself; a no-op from that worker's own thread
    fn join_detached(&self) {
        let mut detached = self.detached.lock();
        let is_current = detached
            .as_ref()
            .is_some_and(|handle| handle.thread().id() == thread::current().id());
        if is_current {
            // It exits as soon as the running callback returns
            detached.take();
            return;
        }
        if let Some(handle) = detached.take() {
            if handle.join().is_err() {
                warn!("Ingestion worker panicked");
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.worker.lock().is_some()
    }

    pub fn set_message_callback(&self, callback: Option<MessageCallback>) {
        *self.shared.message_callback.write() = callback;
    }

    pub fn set_key_event_callback(&self, callback: Option<KeyEventCallback>) {
        *self.shared.key_event_callback.write() = callback;
    }

    pub fn set_velocity_curve(&self, curve: Option<VelocityCurve>) {
        *self.shared.velocity_curve.write() = curve;
    }

    pub fn velocity_curve(&self) -> Option<VelocityCurve> {
        self.shared.velocity_curve.read().clone()
    }

    pub fn stats(&self) -> &StatisticsTracker {
        &self.shared.stats
    }

    pub fn statistics(&self) -> Statistics {
        self.shared.stats.snapshot()
    }

    pub fn reset_statistics(&self) {
        self.shared.stats.reset();
        self.shared.latency_alarm.store(false, Ordering::Relaxed);
    }

    pub fn translator(&self) -> &KeyEventTranslator {
        &self.shared.translator
    }

    /// Messages waiting for the worker
    pub fn queued(&self) -> usize {
        self.shared.rx.len()
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }
}

impl Drop for IngestionPipeline {
    fn drop(&mut self) {
        self.stop();
        self.join_detached();
    }
}
