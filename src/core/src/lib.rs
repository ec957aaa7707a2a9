pub mod configuration;
pub mod controller;
pub mod data_capture;
pub mod error_handling;
pub mod network;
pub mod statistics;
pub mod storage;
pub mod web_interface;

pub use controller::Controller;
pub use data_capture::{CaptureEngine, EventDispatcher, PacketConsumer, PacketRecord};
pub use network::{classify, Protocol, ProtocolFilter};
pub use statistics::StatisticsAggregator;
pub use storage::{PacketFilter, Storage};
