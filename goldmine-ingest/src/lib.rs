//! Fill ingestion: network listener, bounded queue and the single
//! persistence writer.
//!
//! Peers connect over TCP and send length-delimited frames, each holding one
//! JSON `{"trade": {...}}` envelope. Every connection decodes independently and
//! pushes onto a shared bounded queue; a single writer drains that queue into a
//! [`goldmine_store::FillStore`].

pub mod listener;
pub mod metrics;
pub mod queue;
pub mod shutdown;
pub mod wire;
pub mod writer;

pub use listener::{FillListener, ListenerConfig};
pub use metrics::IngestMetrics;
pub use queue::{fill_queue, FillReceiver, FillSender, QueueClosed};
pub use shutdown::ShutdownSignal;
pub use wire::{
    decode_fill, encode_message, format_execution_time, parse_execution_time, DecodeError,
    TradeEnvelope, TradeMessage, EXECUTION_TIME_FORMAT,
};
pub use writer::PersistenceWriter;
