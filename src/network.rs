//! Networking layer
//!
//! - `connection_manager`: listening sockets on the server, connect with retry on the client.
//! - `protocol`: preamble, frames and acknowledgements exchanged over a session.
//! - `types`: the `Connection` handed to the workload engine and connect options.

pub mod connection_manager;
pub mod protocol;
pub mod types;

pub use connection_manager::{ConnectionManager, Listener};
pub use types::{ConnectOptions, Connection};
