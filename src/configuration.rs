pub mod config;
pub mod size;
pub mod types;

pub use config::{Cli, ClientArgs, Command, FileConfig, GenDataArgs, ServerArgs};
pub use types::{
    ClientConfig, GenerateConfig, PayloadMode, ServerConfig, SourceSpec, Termination, WorkloadSpec,
};
