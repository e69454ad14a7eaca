//! Run orchestration: wires configuration, cancellation, connections, workloads, metrics and
//! report storage for one `client` or `server` run.

pub mod controller_handler;

pub use controller_handler::{Controller, RunMode, RunResult};
