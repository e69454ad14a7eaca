pub mod configuration;
pub mod controller;
pub mod error_handling;
pub mod metrics;
pub mod network;
pub mod session_management;
pub mod storage;
pub mod workload;

pub use controller::{Controller, RunResult};
pub use error_handling::types::BenchError;
