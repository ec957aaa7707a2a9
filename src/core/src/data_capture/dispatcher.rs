//! Fan-out of captured records to independent consumers.
//!
//! Every registered [`PacketConsumer`] gets its own bounded queue and delivery
//! thread, so a slow consumer only ever fills its own queue. Publishing pushes
//! the record into each queue under a single shared deadline; a queue that is
//! still full when the deadline passes loses that record (reported as
//! [`DiagnosticEvent::RecordDropped`]). The capture loop therefore never waits
//! longer than the configured enqueue timeout per record.
//!
//! The consumer set is a copy-on-write snapshot: `publish` clones an `Arc` of
//! the current list and never holds a lock while delivering, and a consumer
//! removed by [`EventDispatcher::unregister`] is deactivated before its thread
//! is joined, so it never sees a record after removal returns.
//!
//! ```text
//!                        ┌── queue ──▶ [recorder thread] ──▶ Storage
//! capture ──publish──▶ ──┼── queue ──▶ [stats thread]    ──▶ StatisticsAggregator
//!                        └── queue ──▶ [feed thread]     ──▶ RecentPackets
//! ```

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, SendTimeoutError, Sender};
use log::{debug, info, trace, warn};

use super::diagnostics::Diagnostics;
use super::types::{DiagnosticEvent, PacketRecord};
use crate::configuration::config::DispatchConfig;
use crate::error_handling::types::ConsumerError;

/// A sink for captured records.
///
/// `on_record` runs on the consumer's own delivery thread. Errors and panics
/// are isolated: they are reported through [`Diagnostics`] and delivery of
/// later records continues.
pub trait PacketConsumer: Send + Sync {
    fn name(&self) -> &str;
    fn on_record(&self, record: &PacketRecord) -> Result<(), ConsumerError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConsumerId(u64);

struct Subscription {
    id: ConsumerId,
    name: String,
    tx: Sender<Arc<PacketRecord>>,
    active: Arc<AtomicBool>,
    /// Records enqueued but not yet delivered.
    pending: Arc<AtomicUsize>,
}

pub struct EventDispatcher {
    subscriptions: RwLock<Arc<Vec<Arc<Subscription>>>>,
    workers: Mutex<HashMap<ConsumerId, JoinHandle<()>>>,
    next_id: AtomicU64,
    queue_capacity: usize,
    enqueue_timeout: Duration,
    diagnostics: Arc<Diagnostics>,
}

impl EventDispatcher {
    pub fn new(config: &DispatchConfig, diagnostics: Arc<Diagnostics>) -> Self {
        Self {
            subscriptions: RwLock::new(Arc::new(Vec::new())),
            workers: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            queue_capacity: config.queue_capacity.max(1),
            enqueue_timeout: config.enqueue_timeout(),
            diagnostics,
        }
    }

    /// Adds a consumer and starts its delivery thread. The consumer receives
    /// every record published after this call returns.
    pub fn register(&self, consumer: Arc<dyn PacketConsumer>) -> Result<ConsumerId, ConsumerError> {
        let id = ConsumerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let name = consumer.name().to_string();
        let (tx, rx) = bounded(self.queue_capacity);
        let active = Arc::new(AtomicBool::new(true));
        let pending = Arc::new(AtomicUsize::new(0));

        let worker = {
            let active = Arc::clone(&active);
            let pending = Arc::clone(&pending);
            let diagnostics = Arc::clone(&self.diagnostics);
            thread::Builder::new()
                .name(format!("deliver-{}", name))
                .spawn(move || deliver_loop(consumer, rx, active, pending, diagnostics))
                .map_err(|e| ConsumerError::Failed(format!("unable to spawn delivery thread: {}", e)))?
        };

        let subscription = Arc::new(Subscription {
            id,
            name: name.clone(),
            tx,
            active,
            pending,
        });

        self.workers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id, worker);
        {
            let mut current = self.subscriptions.write().unwrap_or_else(|e| e.into_inner());
            let mut next: Vec<Arc<Subscription>> = current.iter().cloned().collect();
            next.push(subscription);
            *current = Arc::new(next);
        }

        info!("registered consumer '{}' ({:?})", name, id);
        Ok(id)
    }

    /// Removes a consumer and joins its delivery thread. Records still queued
    /// for it are discarded. Returns `false` for an unknown id.
    pub fn unregister(&self, id: ConsumerId) -> bool {
        let removed = {
            let mut current = self.subscriptions.write().unwrap_or_else(|e| e.into_inner());
            let Some(position) = current.iter().position(|s| s.id == id) else {
                return false;
            };
            let mut next: Vec<Arc<Subscription>> = current.iter().cloned().collect();
            let removed = next.remove(position);
            *current = Arc::new(next);
            removed
        };

        removed.active.store(false, Ordering::Release);
        let name = removed.name.clone();
        // last sender goes away with the subscription, which wakes the worker
        drop(removed);

        let worker = self
            .workers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&id);
        if let Some(worker) = worker {
            // a consumer may unregister itself from its own delivery thread
            if worker.thread().id() != thread::current().id() {
                let _ = worker.join();
            }
        }

        info!("unregistered consumer '{}' ({:?})", name, id);
        true
    }

    /// Enqueues `record` for every active consumer and returns how many
    /// accepted it.
    pub fn publish(&self, record: PacketRecord) -> usize {
        let record = Arc::new(record);
        let snapshot = self.snapshot();
        let deadline = Instant::now() + self.enqueue_timeout;
        let mut accepted = 0;

        for subscription in snapshot.iter() {
            if !subscription.active.load(Ordering::Acquire) {
                continue;
            }
            subscription.pending.fetch_add(1, Ordering::AcqRel);
            match subscription.tx.send_deadline(Arc::clone(&record), deadline) {
                Ok(()) => accepted += 1,
                Err(SendTimeoutError::Timeout(_)) => {
                    subscription.pending.fetch_sub(1, Ordering::AcqRel);
                    self.diagnostics.report(DiagnosticEvent::RecordDropped {
                        consumer: subscription.name.clone(),
                    });
                }
                Err(SendTimeoutError::Disconnected(_)) => {
                    subscription.pending.fetch_sub(1, Ordering::AcqRel);
                }
            }
        }

        trace!("published record to {}/{} consumer(s)", accepted, snapshot.len());
        accepted
    }

    pub fn consumer_count(&self) -> usize {
        self.snapshot().len()
    }

    pub fn consumer_names(&self) -> Vec<String> {
        self.snapshot().iter().map(|s| s.name.clone()).collect()
    }

    /// Blocks until every queued record has been delivered or `timeout`
    /// elapses. Returns `true` when all queues drained.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            let busy = self
                .snapshot()
                .iter()
                .any(|s| s.pending.load(Ordering::Acquire) > 0);
            if !busy {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(1));
        }
    }

    /// Unregisters every consumer and joins all delivery threads.
    pub fn shutdown(&self) {
        let ids: Vec<ConsumerId> = self.snapshot().iter().map(|s| s.id).collect();
        if ids.is_empty() {
            return;
        }
        debug!("shutting down dispatcher with {} consumer(s)", ids.len());
        for id in ids {
            self.unregister(id);
        }
    }

    fn snapshot(&self) -> Arc<Vec<Arc<Subscription>>> {
        Arc::clone(&self.subscriptions.read().unwrap_or_else(|e| e.into_inner()))
    }
}

impl Drop for EventDispatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn deliver_loop(
    consumer: Arc<dyn PacketConsumer>,
    rx: Receiver<Arc<PacketRecord>>,
    active: Arc<AtomicBool>,
    pending: Arc<AtomicUsize>,
    diagnostics: Arc<Diagnostics>,
) {
    trace!("delivery thread for '{}' started", consumer.name());
    while let Ok(record) = rx.recv() {
        if !active.load(Ordering::Acquire) {
            break;
        }

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| consumer.on_record(&record)));
        let failure = match outcome {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e),
            Err(payload) => Some(ConsumerError::Panicked(panic_message(payload.as_ref()))),
        };
        if let Some(e) = failure {
            diagnostics.report(DiagnosticEvent::ConsumerFailure {
                consumer: consumer.name().to_string(),
                message: e.to_string(),
            });
        }

        pending.fetch_sub(1, Ordering::AcqRel);
    }
    trace!("delivery thread for '{}' exiting", consumer.name());
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        warn!("consumer panicked with a non-string payload");
        "unknown panic".to_string()
    }
}
