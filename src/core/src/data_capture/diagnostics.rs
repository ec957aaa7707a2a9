//! Out-of-band reporting for the capture pipeline.
//!
//! Faults that must not interrupt the capture loop are counted here, logged,
//! and fanned out to any subscriber. Subscribers get an unbounded channel;
//! a subscriber that drops its receiver is forgotten on the next report.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use crossbeam_channel::{unbounded, Receiver, Sender};
use log::{debug, error, info, warn};

use super::types::{DiagnosticCounters, DiagnosticEvent};

#[derive(Default)]
pub struct Diagnostics {
    read_faults: AtomicU64,
    classification_skips: AtomicU64,
    consumer_failures: AtomicU64,
    dropped_records: AtomicU64,
    listeners: Mutex<Vec<Sender<DiagnosticEvent>>>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> Receiver<DiagnosticEvent> {
        let (tx, rx) = unbounded();
        self.listeners
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(tx);
        rx
    }

    /// Counted only, never logged above TRACE or broadcast.
    pub fn classification_skipped(&self) {
        self.classification_skips.fetch_add(1, Ordering::Relaxed);
    }

    pub fn report(&self, event: DiagnosticEvent) {
        match &event {
            DiagnosticEvent::SessionStarted { session_id, device } => {
                info!("[{}] capture session started on {}", session_id, device);
            }
            DiagnosticEvent::SessionStopped { session_id, error: None } => {
                info!("[{}] capture session stopped", session_id);
            }
            DiagnosticEvent::SessionStopped { session_id, error: Some(e) } => {
                error!("[{}] capture session aborted: {}", session_id, e);
            }
            DiagnosticEvent::ReadFault { session_id, error } => {
                self.read_faults.fetch_add(1, Ordering::Relaxed);
                warn!("[{}] {}", session_id, error);
            }
            DiagnosticEvent::ConsumerFailure { consumer, message } => {
                self.consumer_failures.fetch_add(1, Ordering::Relaxed);
                warn!("consumer '{}' failed: {}", consumer, message);
            }
            DiagnosticEvent::RecordDropped { consumer } => {
                self.dropped_records.fetch_add(1, Ordering::Relaxed);
                debug!("record dropped for consumer '{}' (queue full)", consumer);
            }
        }

        let mut listeners = self.listeners.lock().unwrap_or_else(|e| e.into_inner());
        listeners.retain(|tx| tx.send(event.clone()).is_ok());
    }

    pub fn counters(&self) -> DiagnosticCounters {
        DiagnosticCounters {
            read_faults: self.read_faults.load(Ordering::Relaxed),
            classification_skips: self.classification_skips.load(Ordering::Relaxed),
            consumer_failures: self.consumer_failures.load(Ordering::Relaxed),
            dropped_records: self.dropped_records.load(Ordering::Relaxed),
        }
    }
}
