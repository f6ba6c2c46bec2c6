//! Goldmine aggregate crate that re-exports the main components for downstream users.

pub use goldmine_config as config;
pub use goldmine_core as core;
pub use goldmine_ingest as ingest;
pub use goldmine_netting as netting;
pub use goldmine_reporting as reporting;
pub use goldmine_store as store;

/// Convenience prelude to pull commonly used items into scope.
pub mod prelude {
    pub use goldmine_config::{load_config, AppConfig};
    pub use goldmine_core::*;
    pub use goldmine_ingest::{
        decode_fill, fill_queue, FillListener, IngestMetrics, ListenerConfig, PersistenceWriter,
        ShutdownSignal, TradeMessage,
    };
    pub use goldmine_netting::{net_fills, BalanceOutcome, NettingEngine, PositionBook};
    pub use goldmine_reporting::{PerformanceSummary, ProfitPoint, Reporter};
    pub use goldmine_store::{FillStore, SqliteFillStore, StoreError};
}
