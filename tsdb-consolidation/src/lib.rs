// TSDB Consolidation
// Folds raw telemetry into typed graph summaries, links them, and compacts storage over time

pub mod clock;
pub mod compressor;
pub mod config;
pub mod consolidation;
pub mod edges;
pub mod error;
pub mod graph;
pub mod period;
pub mod retention;
pub mod rollup;
pub mod scheduler;
pub mod service;
pub mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use compressor::{CompressionReport, SummaryCompressor};
pub use config::ConsolidationConfig;
pub use consolidation::PeriodConsolidator;
pub use edges::EdgeBuilder;
pub use error::{ConfigError, ConsolidationError, StoreError};
pub use retention::{RetentionManager, RetentionReport};
pub use rollup::DailyRollup;
pub use scheduler::{RunReport, Scheduler, SchedulerState};
pub use service::ConsolidationService;
pub use store::{GraphStore, InMemoryGraphStore, SqliteGraphStore};
