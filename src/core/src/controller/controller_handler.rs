//! Application wiring.
//!
//! The controller owns one instance of every subsystem and connects them:
//! storage, the diagnostics hub, the dispatcher with its three consumers
//! (recorder, statistics, recent feed) and the capture engine. The web API
//! and `main` only talk to the controller.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use log::{debug, error, info, warn};

use crate::configuration::config::{Config, StorageConfig};
use crate::configuration::types::StorageBackend;
use crate::data_capture::backend::{default_backend, CaptureBackend, DeviceInfo};
use crate::data_capture::capture_engine::CaptureEngine;
use crate::data_capture::diagnostics::Diagnostics;
use crate::data_capture::dispatcher::EventDispatcher;
use crate::data_capture::recorder::PacketRecorder;
use crate::data_capture::types::CaptureState;
use crate::error_handling::types::*;
use crate::statistics::aggregator::StatisticsAggregator;
use crate::statistics::recent_packets::RecentPackets;
use crate::storage::database_storage::DatabaseStorage;
use crate::storage::file_storage::FileStorage;
use crate::storage::memory_storage::MemoryStorage;
use crate::storage::storage_trait::Storage;
use crate::web_interface::web_server::WebServer;

const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

pub struct Controller {
    pub config: Config,
    storage: Arc<dyn Storage>,
    diagnostics: Arc<Diagnostics>,
    dispatcher: Arc<EventDispatcher>,
    statistics: Arc<StatisticsAggregator>,
    recent: Arc<RecentPackets>,
    engine: CaptureEngine,
    // held from the running check until the engine has started
    start_lock: Mutex<()>,
}

impl Controller {
    /// Builds the application from `config` with the storage backend it
    /// names and the platform capture backend.
    pub fn new(config: Config) -> Result<Self, ControllerError> {
        let storage = open_storage(&config.storage)?;
        Self::with_parts(config, storage, default_backend())
    }

    pub fn with_parts(
        config: Config,
        storage: Arc<dyn Storage>,
        backend: Arc<dyn CaptureBackend>,
    ) -> Result<Self, ControllerError> {
        config.validate()?;

        if let Some(hours) = config.storage.retention_hours {
            let cutoff = Utc::now() - chrono::Duration::hours(hours.min(i64::MAX as u64) as i64);
            match storage.cleanup_old_packets(cutoff) {
                Ok(n) => debug!("retention removed {} packet(s)", n),
                Err(e) => warn!("retention cleanup failed: {}", e),
            }
        }

        let diagnostics = Arc::new(Diagnostics::new());
        let dispatcher = Arc::new(EventDispatcher::new(&config.dispatch, Arc::clone(&diagnostics)));
        let statistics = Arc::new(StatisticsAggregator::new());
        let recent = Arc::new(RecentPackets::new(config.stats.recent_capacity));

        let register_failed =
            |e: ConsumerError| ControllerError::InitializationFailed(e.to_string());
        dispatcher
            .register(Arc::new(PacketRecorder::new(Arc::clone(&storage))))
            .map_err(register_failed)?;
        dispatcher
            .register(statistics.clone())
            .map_err(register_failed)?;
        dispatcher.register(recent.clone()).map_err(register_failed)?;

        let engine = CaptureEngine::new(
            config.capture.clone(),
            backend,
            Arc::clone(&dispatcher),
            Arc::clone(&diagnostics),
        );

        info!(
            "controller ready (storage: {}, consumers: {})",
            config.storage.backend,
            dispatcher.consumer_names().join(", ")
        );
        Ok(Self {
            config,
            storage,
            diagnostics,
            dispatcher,
            statistics,
            recent,
            engine,
            start_lock: Mutex::new(()),
        })
    }

    /// Resets the live views and starts a new capture session.
    pub fn start_capture(&self) -> Result<CaptureState, CaptureError> {
        self.start_capture_on(None)
    }

    /// Same as [`Controller::start_capture`], switching to `interface` first
    /// when one is given. The switch sticks for later sessions.
    pub fn start_capture_on(&self, interface: Option<String>) -> Result<CaptureState, CaptureError> {
        let _guard = self.start_lock.lock().unwrap_or_else(|e| e.into_inner());
        if self.engine.status().is_running() {
            return Err(CaptureError::AlreadyRunning);
        }
        if let Some(interface) = interface {
            info!("capture interface set to {}", interface);
            self.engine.set_interface(Some(interface));
        }
        self.statistics.reset();
        self.recent.clear();
        self.engine.start()
    }

    /// Stops capturing and waits until every captured record reached its consumers.
    pub fn stop_capture(&self) -> CaptureState {
        self.engine.stop();
        if !self.dispatcher.wait_idle(DRAIN_TIMEOUT) {
            warn!("consumers did not drain within {:?}", DRAIN_TIMEOUT);
        }
        self.engine.status()
    }

    pub fn capture_status(&self) -> CaptureState {
        self.engine.status()
    }

    pub fn last_capture_error(&self) -> Option<CaptureError> {
        self.engine.last_error()
    }

    pub fn list_devices(&self) -> Result<Vec<DeviceInfo>, CaptureError> {
        self.engine.list_devices()
    }

    pub fn storage(&self) -> Arc<dyn Storage> {
        Arc::clone(&self.storage)
    }

    pub fn statistics(&self) -> &StatisticsAggregator {
        &self.statistics
    }

    pub fn recent(&self) -> &RecentPackets {
        &self.recent
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    pub fn dispatcher(&self) -> &EventDispatcher {
        &self.dispatcher
    }

    /// Starts capture (when configured), serves the web API and blocks until
    /// Ctrl-C.
    pub async fn run(self: Arc<Self>) -> Result<(), ControllerError> {
        info!("called `run()` on Controller");

        if self.config.capture.autostart {
            let controller = Arc::clone(&self);
            match tokio::task::spawn_blocking(move || controller.start_capture()).await {
                Ok(Ok(state)) => debug!("capture autostarted: {:?}", state),
                Ok(Err(e)) => error!("Unable to start capture: {}", e),
                Err(e) => error!("Capture start task failed: {}", e),
            }
        }

        let web = if self.config.web.enabled {
            let addr = self.config.web_socket_addr()?;
            Some(WebServer::new(Arc::clone(&self)).start(addr)?)
        } else {
            None
        };

        tokio::signal::ctrl_c()
            .await
            .map_err(|e| ControllerError::InitializationFailed(format!("signal handler: {}", e)))?;
        info!("Interrupt received, shutting down");

        if let Some(web) = web {
            web.abort();
        }
        let controller = Arc::clone(&self);
        tokio::task::spawn_blocking(move || controller.shutdown())
            .await
            .map_err(|e| ControllerError::InitializationFailed(format!("shutdown task: {}", e)))?;
        Ok(())
    }

    /// Stops capture, drains and joins every consumer.
    pub fn shutdown(&self) {
        info!("called `shutdown()` on Controller");
        self.stop_capture();
        self.dispatcher.shutdown();
    }
}

/// Opens the storage backend named in the configuration.
pub fn open_storage(config: &StorageConfig) -> Result<Arc<dyn Storage>, StorageError> {
    let storage: Arc<dyn Storage> = match config.backend {
        StorageBackend::Memory => Arc::new(MemoryStorage::new()),
        StorageBackend::File => match &config.path {
            Some(path) => Arc::new(FileStorage::new(path)?),
            None => Arc::new(FileStorage::new_default()?),
        },
        StorageBackend::Database => match &config.path {
            Some(path) => Arc::new(DatabaseStorage::new_file(path)?),
            None => Arc::new(DatabaseStorage::new()?),
        },
    };
    Ok(storage)
}
