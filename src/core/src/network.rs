//! Packet-level network knowledge: protocol labels and the classifier that
//! assigns them to raw frames.

pub mod classifier;
pub mod types;

pub use classifier::classify;
pub use types::{Classification, LinkLayer, Protocol, ProtocolFilter};
