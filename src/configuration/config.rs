use super::size::parse_size;
use super::types::*;
use crate::error_handling::types::ConfigError;
use crate::network::types::ConnectOptions;
use crate::session_management::Role;
use crate::workload::filter::MethodSpec;
use clap::{Args, Parser, Subcommand};
use log::info;
use serde::Deserialize;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Command line of the `sockbench` binary.
///
/// Every option of the `client` and `server` subcommands may also come from the matching
/// `[client]` / `[server]` table of a TOML file given with `--config`. Flags on the command
/// line take precedence over the file, which takes precedence over built-in defaults.
///
/// # Examples
///
/// ```text
/// sockbench server --size 1GB --bufsize 64K
/// sockbench client --addresses 10.0.0.2 10.0.0.3 --size 2GB --parallel 4
/// sockbench --config bench.toml --json client
/// sockbench gen-data 256M --filename digits.txt
/// ```
#[derive(Parser, Debug, Clone)]
#[command(name = "sockbench")]
#[command(version)]
#[command(about = "Simple network socket benchmark with customized workload support")]
#[command(subcommand_required = true, arg_required_else_help = true)]
pub struct Cli {
    /// TOML configuration file with optional `[server]` and `[client]` tables
    ///
    /// # Command Line
    /// Use `--config <FILE>` or the `SOCKBENCH_CONFIG` environment variable
    #[arg(long, env = "SOCKBENCH_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Print the run summary as JSON on stdout
    #[arg(long, global = true, action = clap::ArgAction::SetTrue)]
    pub json: bool,

    /// Directory where every session report and the run summary are written as JSON
    #[arg(long, global = true)]
    pub output_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Listen for clients and stream the workload to them
    Server(ServerArgs),
    /// Connect to one or more servers and consume their workload
    Client(ClientArgs),
    /// Write a file of random decimal digits, for use as a server data file
    GenData(GenDataArgs),
}

/// Options of `sockbench server`.
///
/// All fields are optional so that values missing on the command line can be filled from the
/// configuration file before defaults apply.
#[derive(Args, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct ServerArgs {
    /// Bind to host, one of this machine's interfaces (default: 0.0.0.0)
    #[arg(short, long)]
    pub bind: Option<String>,

    /// The port for the server to listen on (default: 8881)
    #[arg(short, long)]
    pub port: Option<u16>,

    /// The total size of data to send to each client ([BKMG])
    #[arg(short, long, conflicts_with = "time")]
    pub size: Option<String>,

    /// Send for this many seconds instead of a fixed size
    #[arg(short, long)]
    pub time: Option<u64>,

    /// The maximum amount of data sent at once (default: 4K) ([BKMG])
    #[arg(short = 'l', long)]
    pub bufsize: Option<String>,

    /// Draw every block size uniformly between bufsize and this value ([BKMG])
    #[arg(long)]
    pub max_bufsize: Option<String>,

    /// Pace sending to this many bytes per second ([BKMG])
    #[arg(short, long)]
    pub rate: Option<String>,

    /// Read from this file and write to the network, instead of generating a temporary file
    /// with random data
    #[arg(short, long)]
    pub filename: Option<PathBuf>,

    /// Upper bound of the generated random data file (default: 64MB) ([BKMG])
    #[arg(long)]
    pub source_limit: Option<String>,

    /// The read method applied to the data file (default: raw). Use semicolons to separate
    /// method parameters, e.g. `linspace;step=4`
    #[arg(short, long)]
    pub method: Option<String>,

    /// Ask clients to acknowledge every block and report round-trip latency percentiles
    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub latency: bool,

    /// Number of clients to serve before exiting; 0 serves until interrupted (default: 1)
    #[arg(long)]
    pub max_clients: Option<usize>,

    /// Length of one sample interval in milliseconds (default: 100)
    #[arg(long)]
    pub interval_ms: Option<u64>,
}

/// Options of `sockbench client`.
#[derive(Args, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct ClientArgs {
    /// The host names or IP addresses the servers are running on (separated by space)
    #[arg(short, long, num_args = 1.., value_name = "ADDRS")]
    pub addresses: Option<Vec<String>>,

    /// The port the servers are listening on (default: 8881)
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Stop after receiving this many bytes in total, split across all connections ([BKMG])
    #[arg(short, long)]
    pub size: Option<String>,

    /// Local address to bind before connecting, rather than letting the kernel pick one
    #[arg(short, long)]
    pub bind: Option<String>,

    /// The maximum amount of data received at once (default: 4K) ([BKMG])
    #[arg(short = 'l', long)]
    pub bufsize: Option<String>,

    /// Size of the cache keeping the most recently received data (default: 512MB) ([BKMG])
    #[arg(short, long)]
    pub cache: Option<String>,

    /// The read method applied to received data (default: raw)
    #[arg(short, long)]
    pub method: Option<String>,

    /// Parallel connections per server (default: 1)
    #[arg(short = 'P', long)]
    pub parallel: Option<usize>,

    /// Connection attempts after the first one fails (default: 3)
    #[arg(long)]
    pub retries: Option<u32>,

    /// Pause between connection attempts in milliseconds (default: 1000)
    #[arg(long)]
    pub retry_backoff_ms: Option<u64>,

    /// Timeout of a single connection attempt in milliseconds (default: 5000)
    #[arg(long)]
    pub connect_timeout_ms: Option<u64>,

    /// Length of one sample interval in milliseconds (default: 100)
    #[arg(long)]
    pub interval_ms: Option<u64>,
}

/// Options of `sockbench gen-data`. Command line only.
#[derive(Args, Debug, Clone, Default, PartialEq)]
pub struct GenDataArgs {
    /// Output count of random digits ([BKMG])
    pub count: String,

    /// Write the digits to this file (default: data_file)
    #[arg(short, long)]
    pub filename: Option<PathBuf>,

    /// Number of parts generated in parallel (default: one per available CPU)
    #[arg(short, long)]
    pub processes: Option<usize>,
}

/// Contents of a `--config` TOML file.
#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub server: Option<ServerArgs>,
    pub client: Option<ClientArgs>,
    pub output_dir: Option<PathBuf>,
    pub json: Option<bool>,
}

impl FileConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_toml(&content)?;
        info!("Loaded configuration file {}", path.display());
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::TomlError(e.to_string()))
    }
}

fn parse_opt_size(value: Option<&String>) -> Result<Option<u64>, ConfigError> {
    value.map(|s| parse_size(s)).transpose()
}

fn block_size(value: u64, what: &str) -> Result<u32, ConfigError> {
    u32::try_from(value)
        .map_err(|_| ConfigError::InvalidWorkload(format!("{} of {} bytes is too large", what, value)))
}

fn parse_method(value: Option<&String>) -> Result<MethodSpec, ConfigError> {
    value.map_or(Ok(MethodSpec::Raw), |s| s.parse())
}

fn sample_interval(ms: Option<u64>) -> Duration {
    ms.map_or(DEFAULT_SAMPLE_INTERVAL, Duration::from_millis)
}

impl GenDataArgs {
    pub fn resolve(&self) -> Result<GenerateConfig, ConfigError> {
        let processes = match self.processes {
            Some(0) => {
                return Err(ConfigError::InvalidWorkload(
                    "processes must be greater than zero".into(),
                ))
            }
            Some(n) => n,
            None => std::thread::available_parallelism().map_or(1, |n| n.get()),
        };
        Ok(GenerateConfig {
            count: parse_size(&self.count)?,
            filename: self
                .filename
                .clone()
                .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_FILE)),
            processes,
        })
    }
}

impl ServerArgs {
    /// Fills the options missing here from `file`. Size and time are one choice: if either is
    /// set on the command line, the file's termination is ignored.
    pub fn merge(self, file: ServerArgs) -> ServerArgs {
        let (size, time) = if self.size.is_some() || self.time.is_some() {
            (self.size, self.time)
        } else {
            (file.size, file.time)
        };
        ServerArgs {
            bind: self.bind.or(file.bind),
            port: self.port.or(file.port),
            size,
            time,
            bufsize: self.bufsize.or(file.bufsize),
            max_bufsize: self.max_bufsize.or(file.max_bufsize),
            rate: self.rate.or(file.rate),
            filename: self.filename.or(file.filename),
            source_limit: self.source_limit.or(file.source_limit),
            method: self.method.or(file.method),
            latency: self.latency || file.latency,
            max_clients: self.max_clients.or(file.max_clients),
            interval_ms: self.interval_ms.or(file.interval_ms),
        }
    }

    pub fn resolve(&self) -> Result<ServerConfig, ConfigError> {
        let termination = match (&self.size, self.time) {
            (Some(_), Some(_)) => {
                return Err(ConfigError::InvalidWorkload(
                    "size and time are mutually exclusive".into(),
                ))
            }
            (Some(size), None) => Termination::Bytes(parse_size(size)?),
            (None, Some(secs)) => Termination::Duration(Duration::from_secs(secs)),
            (None, None) => Termination::UntilPeerEnds,
        };

        let bufsize = block_size(
            parse_opt_size(self.bufsize.as_ref())?.unwrap_or(DEFAULT_BUFSIZE),
            "bufsize",
        )?;
        let payload = match parse_opt_size(self.max_bufsize.as_ref())? {
            Some(max) => PayloadMode::Uniform {
                min: bufsize,
                max: block_size(max, "max-bufsize")?,
            },
            None => PayloadMode::Fixed { size: bufsize },
        };

        let workload = WorkloadSpec {
            payload,
            termination,
            rate: parse_opt_size(self.rate.as_ref())?,
            concurrency: 1,
            latency: self.latency,
            sample_interval: sample_interval(self.interval_ms),
            method: parse_method(self.method.as_ref())?,
        };
        workload.validate(Role::Server)?;

        let source = match &self.filename {
            Some(path) => SourceSpec::File(path.clone()),
            None => {
                let limit =
                    parse_opt_size(self.source_limit.as_ref())?.unwrap_or(DEFAULT_SOURCE_LIMIT);
                if limit == 0 {
                    return Err(ConfigError::InvalidWorkload(
                        "source limit must be greater than zero".into(),
                    ));
                }
                let size = match termination {
                    Termination::Bytes(total) => total.min(limit),
                    _ => limit,
                };
                SourceSpec::Random { size }
            }
        };

        Ok(ServerConfig {
            bind: self.bind.clone().unwrap_or_else(|| "0.0.0.0".to_string()),
            port: self.port.unwrap_or(DEFAULT_PORT),
            max_clients: self.max_clients.unwrap_or(1),
            source,
            workload,
        })
    }
}

impl ClientArgs {
    pub fn merge(self, file: ClientArgs) -> ClientArgs {
        ClientArgs {
            addresses: self.addresses.or(file.addresses),
            port: self.port.or(file.port),
            size: self.size.or(file.size),
            bind: self.bind.or(file.bind),
            bufsize: self.bufsize.or(file.bufsize),
            cache: self.cache.or(file.cache),
            method: self.method.or(file.method),
            parallel: self.parallel.or(file.parallel),
            retries: self.retries.or(file.retries),
            retry_backoff_ms: self.retry_backoff_ms.or(file.retry_backoff_ms),
            connect_timeout_ms: self.connect_timeout_ms.or(file.connect_timeout_ms),
            interval_ms: self.interval_ms.or(file.interval_ms),
        }
    }

    pub fn resolve(&self) -> Result<ClientConfig, ConfigError> {
        let addresses = match &self.addresses {
            Some(list) if !list.is_empty() => list.clone(),
            _ => {
                return Err(ConfigError::MissingValue(
                    "at least one server address is required".into(),
                ))
            }
        };

        let bind = self
            .bind
            .as_ref()
            .map(|b| {
                b.parse::<IpAddr>().map_err(|_| {
                    ConfigError::InvalidWorkload(format!("bind address {:?} is not an IP", b))
                })
            })
            .transpose()?;

        let termination = match parse_opt_size(self.size.as_ref())? {
            Some(total) => Termination::Bytes(total),
            None => Termination::UntilPeerEnds,
        };

        let bufsize = block_size(
            parse_opt_size(self.bufsize.as_ref())?.unwrap_or(DEFAULT_BUFSIZE),
            "bufsize",
        )?;

        let workload = WorkloadSpec {
            payload: PayloadMode::Fixed { size: bufsize },
            termination,
            rate: None,
            concurrency: self.parallel.unwrap_or(1),
            latency: false,
            sample_interval: sample_interval(self.interval_ms),
            method: parse_method(self.method.as_ref())?,
        };
        workload.validate(Role::Client)?;

        let defaults = ConnectOptions::default();
        let connect = ConnectOptions {
            bind,
            retries: self.retries.unwrap_or(defaults.retries),
            retry_backoff: self
                .retry_backoff_ms
                .map_or(defaults.retry_backoff, Duration::from_millis),
            connect_timeout: self
                .connect_timeout_ms
                .map_or(defaults.connect_timeout, Duration::from_millis),
        };
        if connect.connect_timeout.is_zero() {
            return Err(ConfigError::InvalidWorkload(
                "connect timeout must be greater than zero".into(),
            ));
        }

        Ok(ClientConfig {
            addresses,
            port: self.port.unwrap_or(DEFAULT_PORT),
            bind,
            cache: parse_opt_size(self.cache.as_ref())?.unwrap_or(DEFAULT_CACHE),
            connect,
            workload,
        })
    }
}
