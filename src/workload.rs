//! Workload subsystem
//!
//! - `engine`: runs a workload over one established stream and emits samples.
//! - `sampler`: coalesces per-operation counts into interval samples.
//! - `source`: payload data of the sending side, replayed cyclically.
//! - `filter`: read methods applied to the source or to received bytes.
//! - `cache`: bounded store of the most recently received bytes.
//! - `generator`: random digit data files for the sending side.

pub mod cache;
pub mod engine;
pub mod filter;
pub mod generator;
pub mod sampler;
pub mod source;

pub use engine::{RunOutcome, SampleStream, Workload, WorkloadEngine};
pub use filter::{MethodSpec, ReadMethod};
pub use source::{DataSource, PayloadStore};
