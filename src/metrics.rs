//! Metrics subsystem
//!
//! - `types`: sample records, reports and latency summaries.
//! - `collector`: `finalize` and the `MetricsCollector` shared by the sessions of a run.

pub mod collector;
pub mod types;

pub use collector::{finalize, MetricsCollector};
pub use types::{LatencySummary, Report, SampleRecord};
