use crate::error_handling::types::ConfigError;
use crate::network::protocol::MAX_FRAME_LEN;
use crate::network::types::ConnectOptions;
use crate::session_management::Role;
use crate::workload::filter::MethodSpec;
use rand::Rng;
use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_PORT: u16 = 8881;
pub const DEFAULT_BUFSIZE: u64 = 4 * 1024;
pub const DEFAULT_CACHE: u64 = 512 * 1024 * 1024;
pub const DEFAULT_SOURCE_LIMIT: u64 = 64 * 1024 * 1024;
pub const DEFAULT_SAMPLE_INTERVAL: Duration = Duration::from_millis(100);
pub const DEFAULT_DATA_FILE: &str = "data_file";

/// Size of the blocks a sender frames onto the wire, or the read size of a receiver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadMode {
    Fixed { size: u32 },
    /// Every block gets a size drawn uniformly from `[min, max]`.
    Uniform { min: u32, max: u32 },
}

impl PayloadMode {
    pub fn max_block(&self) -> u32 {
        match *self {
            PayloadMode::Fixed { size } => size,
            PayloadMode::Uniform { max, .. } => max,
        }
    }

    pub fn next_block<R: Rng + ?Sized>(&self, rng: &mut R) -> u32 {
        match *self {
            PayloadMode::Fixed { size } => size,
            PayloadMode::Uniform { min, max } => rng.gen_range(min..=max),
        }
    }
}

/// When a workload stops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    Bytes(u64),
    Duration(Duration),
    /// Receivers only: run until the sender's end frame.
    UntilPeerEnds,
}

/// Shape of the traffic one session generates or consumes. Shared read-only between the
/// sessions of a run once they start.
#[derive(Debug, Clone)]
pub struct WorkloadSpec {
    pub payload: PayloadMode,
    pub termination: Termination,
    /// Pacing target in payload bytes per second.
    pub rate: Option<u64>,
    /// Parallel connections per server address (client side).
    pub concurrency: usize,
    /// Ask the receiver to acknowledge every block so the sender can time round trips.
    pub latency: bool,
    pub sample_interval: Duration,
    pub method: MethodSpec,
}

impl Default for WorkloadSpec {
    fn default() -> Self {
        Self {
            payload: PayloadMode::Fixed {
                size: DEFAULT_BUFSIZE as u32,
            },
            termination: Termination::UntilPeerEnds,
            rate: None,
            concurrency: 1,
            latency: false,
            sample_interval: DEFAULT_SAMPLE_INTERVAL,
            method: MethodSpec::Raw,
        }
    }
}

impl WorkloadSpec {
    /// Rejects specs that can't run, before any socket is opened.
    pub fn validate(&self, role: Role) -> Result<(), ConfigError> {
        match self.payload {
            PayloadMode::Fixed { size } if size == 0 => {
                return Err(ConfigError::InvalidWorkload(
                    "block size must be greater than zero".into(),
                ))
            }
            PayloadMode::Uniform { min, max } if min == 0 || min > max => {
                return Err(ConfigError::InvalidWorkload(format!(
                    "invalid block size range {}..={}",
                    min, max
                )))
            }
            _ => {}
        }
        if self.payload.max_block() > MAX_FRAME_LEN {
            return Err(ConfigError::InvalidWorkload(format!(
                "block size {} exceeds the maximum of {} bytes",
                self.payload.max_block(),
                MAX_FRAME_LEN
            )));
        }

        match (self.termination, role) {
            (Termination::Bytes(0), _) => {
                return Err(ConfigError::InvalidWorkload(
                    "size must be greater than zero".into(),
                ))
            }
            (Termination::Duration(d), _) if d.is_zero() => {
                return Err(ConfigError::InvalidWorkload(
                    "duration must be greater than zero".into(),
                ))
            }
            (Termination::UntilPeerEnds, Role::Server) => {
                return Err(ConfigError::MissingValue(
                    "the server needs either a size or a duration".into(),
                ))
            }
            _ => {}
        }

        if self.rate == Some(0) {
            return Err(ConfigError::InvalidWorkload(
                "rate must be greater than zero".into(),
            ));
        }
        if self.concurrency == 0 {
            return Err(ConfigError::InvalidWorkload(
                "concurrency must be at least 1".into(),
            ));
        }
        if self.sample_interval.is_zero() {
            return Err(ConfigError::InvalidWorkload(
                "sample interval must be greater than zero".into(),
            ));
        }

        // Compiling the method surfaces bad regexes and parameters here.
        self.method.build().map(|_| ())
    }
}

/// Where the server's payload comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceSpec {
    File(PathBuf),
    /// Temporary file of this many random bytes, replayed cyclically.
    Random { size: u64 },
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
    /// Sessions to accept before the server stops listening; 0 keeps accepting until interrupted.
    pub max_clients: usize,
    pub source: SourceSpec,
    pub workload: WorkloadSpec,
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub addresses: Vec<String>,
    pub port: u16,
    pub bind: Option<IpAddr>,
    /// Bytes of recently received data kept in memory, split across connections.
    pub cache: u64,
    pub connect: ConnectOptions,
    pub workload: WorkloadSpec,
}

impl ClientConfig {
    pub fn connection_count(&self) -> usize {
        self.addresses.len() * self.workload.concurrency
    }
}

/// Resolved `gen-data` run: `count` random digits written to `filename` in `processes` parts.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerateConfig {
    pub count: u64,
    pub filename: PathBuf,
    pub processes: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server_spec(termination: Termination) -> WorkloadSpec {
        WorkloadSpec {
            termination,
            ..Default::default()
        }
    }

    #[test]
    fn test_valid_specs_pass() {
        server_spec(Termination::Bytes(1024))
            .validate(Role::Server)
            .unwrap();
        server_spec(Termination::Duration(Duration::from_secs(1)))
            .validate(Role::Server)
            .unwrap();
        WorkloadSpec::default().validate(Role::Client).unwrap();
    }

    #[test]
    fn test_zero_and_missing_targets_are_rejected() {
        assert!(server_spec(Termination::Bytes(0))
            .validate(Role::Server)
            .is_err());
        assert!(server_spec(Termination::Duration(Duration::ZERO))
            .validate(Role::Server)
            .is_err());
        assert!(matches!(
            server_spec(Termination::UntilPeerEnds).validate(Role::Server),
            Err(ConfigError::MissingValue(_))
        ));
    }

    #[test]
    fn test_payload_bounds_are_checked() {
        let mut spec = server_spec(Termination::Bytes(10));
        spec.payload = PayloadMode::Uniform { min: 10, max: 5 };
        assert!(spec.validate(Role::Server).is_err());

        spec.payload = PayloadMode::Fixed { size: 0 };
        assert!(spec.validate(Role::Server).is_err());

        spec.payload = PayloadMode::Fixed {
            size: MAX_FRAME_LEN + 1,
        };
        assert!(spec.validate(Role::Server).is_err());
    }

    #[test]
    fn test_uniform_blocks_stay_in_range() {
        let mode = PayloadMode::Uniform { min: 100, max: 200 };
        let mut rng = rand::thread_rng();
        for _ in 0..1000 {
            let n = mode.next_block(&mut rng);
            assert!((100..=200).contains(&n));
        }
        assert_eq!(mode.max_block(), 200);
    }

    #[test]
    fn test_zero_rate_and_concurrency_are_rejected() {
        let mut spec = server_spec(Termination::Bytes(10));
        spec.rate = Some(0);
        assert!(spec.validate(Role::Server).is_err());

        let mut spec = WorkloadSpec::default();
        spec.concurrency = 0;
        assert!(spec.validate(Role::Client).is_err());
    }
}
