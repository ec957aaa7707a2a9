//! Live capture sessions.
//!
//! [`CaptureEngine`] owns at most one [`CaptureSession`] at a time. Starting a
//! session opens a device through the configured [`CaptureBackend`] and moves
//! the resulting handle into a dedicated read thread, so the handle is closed
//! on every exit path of that thread. The thread classifies each frame and
//! publishes the resulting [`PacketRecord`] to the [`EventDispatcher`].
//!
//! Highlights
//! - `stop()` joins the read thread, so when it returns the device is released
//! - Sessions that end on their own (device gone, too many read faults) are
//!   reaped on the next `status()`/`start()` and their fault kept in
//!   `last_error()`
//! - Lifecycle and faults are reported through [`Diagnostics`]
//!
//! ```text
//!   Idle ──start()──▶ Running ──stop() / fatal fault──▶ Idle
//! ```

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use chrono::{DateTime, Utc};
use log::{debug, error, info, trace, warn};
use uuid::Uuid;

use super::backend::{CaptureBackend, DeviceInfo, OpenedSource, PacketSource, SourceError};
use super::diagnostics::Diagnostics;
use super::dispatcher::EventDispatcher;
use super::types::{CaptureState, DiagnosticEvent, PacketRecord};
use crate::configuration::config::CaptureConfig;
use crate::error_handling::types::CaptureError;
use crate::network::classifier::classify;
use crate::network::types::LinkLayer;

/// One start/stop cycle.
struct CaptureSession {
    session_id: Uuid,
    device: String,
    started_at: DateTime<Utc>,
    /// Cleared by `stop()` to ask the read thread to exit.
    running: Arc<AtomicBool>,
    /// Set by the read thread once the handle is closed.
    finished: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl CaptureSession {
    fn state(&self) -> CaptureState {
        CaptureState::Running {
            session_id: self.session_id,
            device: self.device.clone(),
            started_at: self.started_at,
        }
    }
}

pub struct CaptureEngine {
    backend: Arc<dyn CaptureBackend>,
    dispatcher: Arc<EventDispatcher>,
    diagnostics: Arc<Diagnostics>,
    config: Mutex<CaptureConfig>,
    session: Mutex<Option<CaptureSession>>,
    last_error: Arc<Mutex<Option<CaptureError>>>,
}

impl CaptureEngine {
    pub fn new(
        config: CaptureConfig,
        backend: Arc<dyn CaptureBackend>,
        dispatcher: Arc<EventDispatcher>,
        diagnostics: Arc<Diagnostics>,
    ) -> Self {
        Self {
            backend,
            dispatcher,
            diagnostics,
            config: Mutex::new(config),
            session: Mutex::new(None),
            last_error: Arc::new(Mutex::new(None)),
        }
    }

    /// Opens the capture device and starts the read thread.
    ///
    /// # Errors
    /// - [`CaptureError::AlreadyRunning`] if a session is active; that session
    ///   is left untouched.
    /// - [`CaptureError::DeviceUnavailable`] if no device could be opened; the
    ///   engine stays idle.
    pub fn start(&self) -> Result<CaptureState, CaptureError> {
        let mut guard = self.session.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(session) = guard.as_ref() {
            if !session.finished.load(Ordering::Acquire) {
                warn!("[{}] start requested while capture is running", session.session_id);
                return Err(CaptureError::AlreadyRunning);
            }
        }
        if let Some(finished) = guard.take() {
            self.reap(finished);
        }

        let config = self.config.lock().unwrap_or_else(|e| e.into_inner()).clone();
        let OpenedSource { device, link, source } = self.backend.open(&config)?;

        let session_id = Uuid::new_v4();
        let running = Arc::new(AtomicBool::new(true));
        let finished = Arc::new(AtomicBool::new(false));
        let worker = ReadLoop {
            session_id,
            link,
            max_consecutive_faults: config.max_consecutive_faults,
            running: Arc::clone(&running),
            finished: Arc::clone(&finished),
            dispatcher: Arc::clone(&self.dispatcher),
            diagnostics: Arc::clone(&self.diagnostics),
            last_error: Arc::clone(&self.last_error),
        };

        *self.last_error.lock().unwrap_or_else(|e| e.into_inner()) = None;
        self.diagnostics.report(DiagnosticEvent::SessionStarted {
            session_id,
            device: device.clone(),
        });

        let handle = thread::Builder::new()
            .name(format!("capture-{}", device))
            .spawn(move || worker.run(source))
            .map_err(|e| {
                error!("[{}] failed to spawn capture thread: {}", session_id, e);
                CaptureError::DeviceUnavailable(format!("unable to spawn capture thread: {}", e))
            })?;

        let session = CaptureSession {
            session_id,
            device,
            started_at: Utc::now(),
            running,
            finished,
            worker: Some(handle),
        };
        let state = session.state();
        *guard = Some(session);
        Ok(state)
    }

    /// Stops the active session and waits for the device to be released.
    /// Calling it while idle does nothing.
    pub fn stop(&self) {
        let mut guard = self.session.lock().unwrap_or_else(|e| e.into_inner());
        let Some(session) = guard.take() else {
            debug!("stop requested while idle");
            return;
        };
        info!("[{}] stopping capture on {}", session.session_id, session.device);
        session.running.store(false, Ordering::Release);
        self.reap(session);
    }

    pub fn status(&self) -> CaptureState {
        let mut guard = self.session.lock().unwrap_or_else(|e| e.into_inner());
        match guard.as_ref() {
            Some(session) if !session.finished.load(Ordering::Acquire) => session.state(),
            Some(_) => {
                if let Some(finished) = guard.take() {
                    self.reap(finished);
                }
                CaptureState::Idle
            }
            None => CaptureState::Idle,
        }
    }

    /// Fatal error that ended the most recent session, if any.
    pub fn last_error(&self) -> Option<CaptureError> {
        self.last_error.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn list_devices(&self) -> Result<Vec<DeviceInfo>, CaptureError> {
        self.backend.list_devices()
    }

    /// Interface used by the next `start()`. `None` selects the first
    /// available device.
    pub fn set_interface(&self, interface: Option<String>) {
        self.config.lock().unwrap_or_else(|e| e.into_inner()).interface = interface;
    }

    fn reap(&self, mut session: CaptureSession) {
        if let Some(worker) = session.worker.take() {
            if worker.join().is_err() {
                error!("[{}] capture thread panicked outside the read loop", session.session_id);
            }
        }
        trace!("[{}] session reaped", session.session_id);
    }
}

impl Drop for CaptureEngine {
    fn drop(&mut self) {
        self.stop();
    }
}

/// State moved into the read thread.
struct ReadLoop {
    session_id: Uuid,
    link: LinkLayer,
    max_consecutive_faults: u32,
    running: Arc<AtomicBool>,
    finished: Arc<AtomicBool>,
    dispatcher: Arc<EventDispatcher>,
    diagnostics: Arc<Diagnostics>,
    last_error: Arc<Mutex<Option<CaptureError>>>,
}

impl ReadLoop {
    fn run(self, source: Box<dyn PacketSource>) {
        // the source is dropped (handle closed) on return or unwind
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.drain(source)));
        let error = match outcome {
            Ok(error) => error,
            Err(_) => Some(CaptureError::WorkerPanicked),
        };

        if let Some(e) = &error {
            *self.last_error.lock().unwrap_or_else(|p| p.into_inner()) = Some(e.clone());
        }
        self.running.store(false, Ordering::Release);
        self.finished.store(true, Ordering::Release);
        self.diagnostics.report(DiagnosticEvent::SessionStopped {
            session_id: self.session_id,
            error,
        });
    }

    /// Returns the fatal error that ended the loop, or `None` when stopped.
    fn drain(&self, mut source: Box<dyn PacketSource>) -> Option<CaptureError> {
        debug!("[{}] read loop started ({:?})", self.session_id, self.link);
        let mut last_timestamp: Option<DateTime<Utc>> = None;
        let mut consecutive_faults: u32 = 0;
        let mut published: u64 = 0;

        while self.running.load(Ordering::Acquire) {
            let raw = match source.next_packet() {
                Ok(Some(raw)) => {
                    consecutive_faults = 0;
                    raw
                }
                Ok(None) => {
                    consecutive_faults = 0;
                    continue;
                }
                Err(SourceError::Transient(message)) => {
                    consecutive_faults += 1;
                    self.diagnostics.report(DiagnosticEvent::ReadFault {
                        session_id: self.session_id,
                        error: CaptureError::ReadFault(message.clone()),
                    });
                    if consecutive_faults > self.max_consecutive_faults {
                        return Some(CaptureError::HandleInvalid(format!(
                            "{} consecutive read faults, last: {}",
                            consecutive_faults, message
                        )));
                    }
                    continue;
                }
                Err(SourceError::Closed(message)) => {
                    return Some(CaptureError::HandleInvalid(message));
                }
            };

            let timestamp = match last_timestamp {
                Some(previous) if raw.captured_at < previous => previous,
                _ => raw.captured_at,
            };
            last_timestamp = Some(timestamp);

            match classify(&raw.data, self.link) {
                Ok(classification) => {
                    let record =
                        PacketRecord::from_classification(timestamp, &classification, raw.wire_len);
                    self.dispatcher.publish(record);
                    published += 1;
                }
                Err(skip) => {
                    trace!("[{}] frame skipped: {}", self.session_id, skip);
                    self.diagnostics.classification_skipped();
                }
            }
        }

        debug!("[{}] read loop finished after {} record(s)", self.session_id, published);
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::configuration::config::DispatchConfig;
    use crate::data_capture::backend::scripted::{ScriptedBackend, Step};
    use crate::data_capture::dispatcher::PacketConsumer;
    use crate::error_handling::types::ConsumerError;
    use crate::network::classifier::test_frames;
    use chrono::Duration as ChronoDuration;
    use std::time::{Duration, Instant};

    struct Sink(Mutex<Vec<PacketRecord>>);

    impl PacketConsumer for Sink {
        fn name(&self) -> &str {
            "sink"
        }

        fn on_record(&self, record: &PacketRecord) -> Result<(), ConsumerError> {
            self.0.lock().unwrap().push(record.clone());
            Ok(())
        }
    }

    fn engine_with(backend: Arc<ScriptedBackend>) -> (CaptureEngine, Arc<Sink>, Arc<Diagnostics>) {
        let diagnostics = Arc::new(Diagnostics::new());
        let dispatcher = Arc::new(EventDispatcher::new(
            &DispatchConfig::default(),
            Arc::clone(&diagnostics),
        ));
        let sink = Arc::new(Sink(Mutex::new(Vec::new())));
        dispatcher.register(sink.clone()).unwrap();
        let config = CaptureConfig {
            max_consecutive_faults: 2,
            ..CaptureConfig::default()
        };
        let engine = CaptureEngine::new(config, backend, dispatcher, Arc::clone(&diagnostics));
        (engine, sink, diagnostics)
    }

    fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(2));
        }
        false
    }

    #[test]
    fn start_then_stop_releases_the_handle() {
        let _ = env_logger::builder().is_test(true).try_init();
        let backend = Arc::new(ScriptedBackend::new(Vec::new()));
        let (engine, _, _) = engine_with(Arc::clone(&backend));

        let state = engine.start().unwrap();
        assert!(state.is_running());
        assert!(engine.status().is_running());
        assert_eq!(backend.handles_open(), 1);

        engine.stop();
        assert_eq!(engine.status(), CaptureState::Idle);
        assert_eq!(backend.handles_open(), 0);
        assert_eq!(engine.last_error(), None);
    }

    #[test]
    fn second_start_is_rejected() {
        let backend = Arc::new(ScriptedBackend::new(Vec::new()));
        let (engine, _, _) = engine_with(Arc::clone(&backend));

        let first = engine.start().unwrap();
        assert_eq!(engine.start(), Err(CaptureError::AlreadyRunning));
        assert_eq!(engine.status(), first);
        assert_eq!(backend.opens.load(Ordering::SeqCst), 1);
        engine.stop();
    }

    #[test]
    fn unavailable_device_leaves_engine_idle() {
        let (engine, _, _) = engine_with(Arc::new(ScriptedBackend::failing()));
        assert!(matches!(engine.start(), Err(CaptureError::DeviceUnavailable(_))));
        assert_eq!(engine.status(), CaptureState::Idle);
    }

    #[test]
    fn timestamps_never_go_backwards() {
        let now = Utc::now();
        let frame = test_frames::udp_frame("10.0.0.1", "10.0.0.2");
        let backend = Arc::new(ScriptedBackend::new(vec![
            Step::Frame(frame.clone(), now),
            Step::Frame(frame.clone(), now - ChronoDuration::seconds(3)),
            Step::Frame(frame, now + ChronoDuration::seconds(1)),
        ]));
        let (engine, sink, _) = engine_with(backend);

        engine.start().unwrap();
        assert!(wait_until(|| sink.0.lock().unwrap().len() == 3));
        engine.stop();

        let stamps: Vec<_> = sink.0.lock().unwrap().iter().map(|r| r.timestamp).collect();
        assert_eq!(stamps, vec![now, now, now + ChronoDuration::seconds(1)]);
    }

    #[test]
    fn transient_faults_are_reported_and_survived() {
        let frame = test_frames::tcp_frame("10.0.0.1", "10.0.0.2", 40000, 22, b"");
        let backend = Arc::new(ScriptedBackend::new(vec![
            Step::Transient("glitch"),
            Step::Timeout,
            Step::Transient("glitch"),
            Step::Frame(frame, Utc::now()),
        ]));
        let (engine, sink, diagnostics) = engine_with(backend);
        let events = diagnostics.subscribe();

        engine.start().unwrap();
        assert!(wait_until(|| sink.0.lock().unwrap().len() == 1));
        assert!(engine.status().is_running());
        assert_eq!(diagnostics.counters().read_faults, 2);
        engine.stop();

        let faults: Vec<CaptureError> = events
            .try_iter()
            .filter_map(|e| match e {
                DiagnosticEvent::ReadFault { error, .. } => Some(error),
                _ => None,
            })
            .collect();
        assert_eq!(faults, vec![CaptureError::ReadFault("glitch".into()); 2]);
    }

    #[test]
    fn repeated_faults_end_the_session() {
        let backend = Arc::new(ScriptedBackend::new(vec![
            Step::Transient("a"),
            Step::Transient("b"),
            Step::Transient("c"),
        ]));
        let (engine, _, diagnostics) = engine_with(Arc::clone(&backend));
        let events = diagnostics.subscribe();

        engine.start().unwrap();
        assert!(wait_until(|| !engine.status().is_running()));
        assert!(matches!(engine.last_error(), Some(CaptureError::HandleInvalid(_))));
        assert_eq!(backend.handles_open(), 0);

        let stopped = events
            .iter()
            .find(|e| matches!(e, DiagnosticEvent::SessionStopped { .. }))
            .unwrap();
        assert!(matches!(
            stopped,
            DiagnosticEvent::SessionStopped {
                error: Some(CaptureError::HandleInvalid(_)),
                ..
            }
        ));
    }

    #[test]
    fn engine_can_restart_after_stop() {
        let backend = Arc::new(ScriptedBackend::new(Vec::new()));
        let (engine, _, _) = engine_with(Arc::clone(&backend));

        let first = engine.start().unwrap();
        engine.stop();
        let second = engine.start().unwrap();
        engine.stop();

        let id = |s: &CaptureState| match s {
            CaptureState::Running { session_id, .. } => *session_id,
            CaptureState::Idle => panic!("expected running state"),
        };
        assert_ne!(id(&first), id(&second));
        assert_eq!(backend.opens.load(Ordering::SeqCst), 2);
        assert_eq!(backend.handles_open(), 0);
    }

    #[test]
    fn stop_from_another_thread() {
        let backend = Arc::new(ScriptedBackend::new(Vec::new()));
        let (engine, _, diagnostics) = engine_with(Arc::clone(&backend));
        let events = diagnostics.subscribe();

        engine.start().unwrap();
        thread::scope(|scope| {
            let stoppers: Vec<_> = (0..3).map(|_| scope.spawn(|| engine.stop())).collect();
            for stopper in stoppers {
                stopper.join().unwrap();
            }
        });

        assert_eq!(engine.status(), CaptureState::Idle);
        assert_eq!(backend.handles_open(), 0);
        assert_eq!(engine.last_error(), None);
        let stops = events
            .try_iter()
            .filter(|e| matches!(e, DiagnosticEvent::SessionStopped { error: None, .. }))
            .count();
        assert_eq!(stops, 1);
    }

    #[test]
    fn set_interface_applies_to_next_start() {
        let backend = Arc::new(ScriptedBackend::new(Vec::new()));
        let (engine, _, _) = engine_with(backend);

        engine.set_interface(Some("lab0".into()));
        match engine.start().unwrap() {
            CaptureState::Running { device, .. } => assert_eq!(device, "lab0"),
            CaptureState::Idle => panic!("expected running state"),
        }
        engine.stop();
    }
}
