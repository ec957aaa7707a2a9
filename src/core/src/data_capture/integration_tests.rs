//! End-to-end pipeline tests: scripted source → engine → dispatcher →
//! statistics, recent feed and storage.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use chrono::Utc;

use super::backend::scripted::{ScriptedBackend, Step};
use super::capture_engine::CaptureEngine;
use super::diagnostics::Diagnostics;
use super::dispatcher::EventDispatcher;
use super::recorder::PacketRecorder;
use super::types::{CaptureState, DiagnosticEvent};
use crate::configuration::config::{CaptureConfig, DispatchConfig};
use crate::error_handling::types::CaptureError;
use crate::network::classifier::test_frames;
use crate::network::types::{LinkLayer, Protocol};
use crate::statistics::aggregator::StatisticsAggregator;
use crate::statistics::recent_packets::RecentPackets;
use crate::storage::memory_storage::MemoryStorage;
use crate::storage::packet_filter::PacketFilter;
use crate::storage::storage_trait::Storage;

struct Pipeline {
    engine: CaptureEngine,
    dispatcher: Arc<EventDispatcher>,
    diagnostics: Arc<Diagnostics>,
    stats: Arc<StatisticsAggregator>,
    recent: Arc<RecentPackets>,
    storage: Arc<MemoryStorage>,
    backend: Arc<ScriptedBackend>,
}

impl Pipeline {
    fn new(backend: ScriptedBackend) -> Self {
        let _ = env_logger::builder().is_test(true).try_init();
        let backend = Arc::new(backend);
        let diagnostics = Arc::new(Diagnostics::new());
        let dispatcher = Arc::new(EventDispatcher::new(
            &DispatchConfig::default(),
            Arc::clone(&diagnostics),
        ));
        let stats = Arc::new(StatisticsAggregator::new());
        let recent = Arc::new(RecentPackets::new(10));
        let storage = Arc::new(MemoryStorage::new());

        dispatcher.register(stats.clone()).unwrap();
        dispatcher.register(recent.clone()).unwrap();
        dispatcher
            .register(Arc::new(PacketRecorder::new(storage.clone())))
            .unwrap();

        let engine = CaptureEngine::new(
            CaptureConfig {
                max_consecutive_faults: 3,
                ..CaptureConfig::default()
            },
            backend.clone(),
            Arc::clone(&dispatcher),
            Arc::clone(&diagnostics),
        );
        Self {
            engine,
            dispatcher,
            diagnostics,
            stats,
            recent,
            storage,
            backend,
        }
    }

    /// Runs until `frames` frames were read (records or skips), then stops.
    fn run_frames(&self, frames: u64) {
        self.engine.start().unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            let counters = self.diagnostics.counters();
            if self.stats.total() + counters.classification_skips >= frames
                || Instant::now() > deadline
            {
                break;
            }
            thread::sleep(Duration::from_millis(2));
        }
        self.engine.stop();
        assert!(self.dispatcher.wait_idle(Duration::from_secs(5)));
    }
}

#[test]
fn non_ipv4_frames_produce_no_records() {
    let pipeline = Pipeline::new(ScriptedBackend::frames(vec![
        test_frames::arp_frame(),
        test_frames::ethernet(0x86DD, &[0x60; 40]),
        test_frames::arp_frame(),
    ]));

    pipeline.run_frames(3);

    assert_eq!(pipeline.stats.total(), 0);
    assert!(pipeline.recent.is_empty());
    assert_eq!(pipeline.storage.count_packets().unwrap(), 0);
    assert_eq!(pipeline.diagnostics.counters().classification_skips, 3);
}

#[test]
fn tcp_udp_tcp_tally() {
    let pipeline = Pipeline::new(ScriptedBackend::frames(vec![
        test_frames::tcp_frame("10.0.0.1", "10.0.0.2", 40000, 5432, b""),
        test_frames::udp_frame("10.0.0.1", "10.0.0.53"),
        test_frames::tcp_frame("10.0.0.2", "10.0.0.1", 5432, 40000, b""),
    ]));

    pipeline.run_frames(3);

    let snapshot = pipeline.stats.snapshot();
    assert_eq!(snapshot.total_packets, 3);
    assert_eq!(snapshot.tally.get(Protocol::TCP), 2);
    assert_eq!(snapshot.tally.get(Protocol::UDP), 1);
    for p in [Protocol::ICMP, Protocol::HTTP, Protocol::HTTPS, Protocol::OTHER] {
        assert_eq!(snapshot.tally.get(p), 0);
    }
    assert_eq!(snapshot.tally.total(), snapshot.total_packets);

    // every consumer saw the same records in capture order
    let stored = pipeline.storage.query_packets(&PacketFilter::all()).unwrap();
    assert_eq!(stored, pipeline.recent.snapshot());
    let protocols: Vec<Protocol> = stored.iter().map(|r| r.protocol).collect();
    assert_eq!(protocols, vec![Protocol::TCP, Protocol::UDP, Protocol::TCP]);
}

#[test]
fn records_carry_addresses_and_wire_size() {
    let frame = test_frames::tcp_frame("192.168.1.10", "93.184.216.34", 51000, 80, b"GET / HTTP/1.1\r\n");
    let size = frame.len() as u32;
    let pipeline = Pipeline::new(ScriptedBackend::frames(vec![frame]));

    pipeline.run_frames(1);

    let stored = pipeline.storage.query_packets(&PacketFilter::all()).unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].source_address, "192.168.1.10");
    assert_eq!(stored[0].destination_address, "93.184.216.34");
    assert_eq!(stored[0].protocol, Protocol::HTTP);
    assert_eq!(stored[0].size_bytes, size);
}

#[test]
fn raw_ip_link_layer_is_classified() {
    let mut backend = ScriptedBackend::new(vec![Step::Frame(
        test_frames::ipv4(1, "10.1.0.1".parse().unwrap(), "10.1.0.2".parse().unwrap(), &[8, 0, 0, 0]),
        Utc::now(),
    )]);
    backend.link = LinkLayer::RawIp;
    let pipeline = Pipeline::new(backend);

    pipeline.run_frames(1);

    assert_eq!(pipeline.stats.tally().get(Protocol::ICMP), 1);
}

#[test]
fn stop_twice_is_the_same_as_once() {
    let pipeline = Pipeline::new(ScriptedBackend::new(Vec::new()));
    pipeline.engine.start().unwrap();

    pipeline.engine.stop();
    let after_first = (pipeline.engine.status(), pipeline.backend.handles_open());
    pipeline.engine.stop();
    let after_second = (pipeline.engine.status(), pipeline.backend.handles_open());

    assert_eq!(after_first, (CaptureState::Idle, 0));
    assert_eq!(after_first, after_second);
    assert_eq!(pipeline.engine.last_error(), None);
}

#[test]
fn closed_source_ends_session_with_error() {
    let events_backend = ScriptedBackend::new(vec![
        Step::Frame(test_frames::udp_frame("10.0.0.1", "10.0.0.2"), Utc::now()),
        Step::Closed("interface went down"),
    ]);
    let pipeline = Pipeline::new(events_backend);
    let events = pipeline.diagnostics.subscribe();

    pipeline.engine.start().unwrap();
    let deadline = Instant::now() + Duration::from_secs(5);
    while pipeline.engine.status().is_running() && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(2));
    }

    assert_eq!(pipeline.engine.status(), CaptureState::Idle);
    assert_eq!(pipeline.backend.handles_open(), 0);
    assert_eq!(
        pipeline.engine.last_error(),
        Some(CaptureError::HandleInvalid("interface went down".into()))
    );
    assert!(pipeline.dispatcher.wait_idle(Duration::from_secs(5)));
    assert_eq!(pipeline.storage.count_packets().unwrap(), 1);

    let collected: Vec<DiagnosticEvent> = events.try_iter().collect();
    assert!(matches!(collected.first(), Some(DiagnosticEvent::SessionStarted { .. })));
    assert!(matches!(
        collected.last(),
        Some(DiagnosticEvent::SessionStopped { error: Some(_), .. })
    ));

    // a new session can be started after the fault
    pipeline.engine.start().unwrap();
    pipeline.engine.stop();
}
