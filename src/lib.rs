pub mod backoff;
pub mod claims;
pub mod classifier;
pub mod cli;
pub mod config;
pub mod control;
pub mod frontier;
pub mod fs_atomic;
pub mod gate;
pub mod logging;
pub mod models;
pub mod network;
pub mod orchestration;
pub mod page_engine;
pub mod reports;
pub mod sitemap_seeder;
pub mod telemetry;
pub mod text_norm;
pub mod url_norm;
pub mod worker;

// Re-export main types for library usage
pub use claims::{ClaimLedger, ClaimOutcome, ClaimTicket};
pub use classifier::{ClassifiedInput, ColumnRole, InputShape};
pub use config::{CrawlConfig, Tuning, WorkerMode};
pub use frontier::{Frontier, FrontierSnapshot};
pub use gate::{GateError, GateResult};
pub use models::{
    AppliedConfig, EdgeRecord, ExistenceRecord, ExpectedRow, LinkCandidate, LinkKind, OutputKind,
    PageRecord, RunMode,
};
pub use orchestration::{QuiescenceDetector, RunOutcome};
pub use page_engine::{HttpPageEngine, PageEngine, PageHandle, PageMeta};
pub use telemetry::{HubUpdate, TelemetryHub};
