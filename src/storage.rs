//! Storage subsystem
//!
//! Persists the reports of a run when an output directory is configured.
//!
//! Components:
//! - `storage_trait`: the `ReportStorage` trait defining a uniform API.
//! - `file_storage`: filesystem-backed implementation writing JSON files.

pub mod file_storage;
pub mod storage_trait;

pub use file_storage::FileStorage;
pub use storage_trait::ReportStorage;
