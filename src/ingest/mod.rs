//! Block-range ingestion.
//!
//! - [`tracker`]: cursors, range computation and the contract registry
//! - [`ingestor`]: the polling loop that feeds the event queue

pub mod ingestor;
pub mod tracker;

pub use ingestor::{EventIngestor, IngestSettings, TickReport};
pub use tracker::{BlockRangeTracker, ContractRegistry, ContractStatus, MonitoredContract};
