use crate::configuration::config::{Cli, Command, FileConfig};
use crate::configuration::size::allot_size;
use crate::configuration::types::{ClientConfig, GenerateConfig, ServerConfig, Termination};
use crate::error_handling::types::*;
use crate::metrics::collector::MetricsCollector;
use crate::metrics::types::{format_rate, Report};
use crate::network::connection_manager::ConnectionManager;
use crate::network::types::Connection;
use crate::storage::file_storage::FileStorage;
use crate::storage::storage_trait::ReportStorage;
use crate::workload::engine::{cancelled, RunOutcome, Workload, WorkloadEngine};
use crate::workload::generator::generate;
use crate::workload::source::PayloadStore;
use log::{error, info, warn};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::{JoinError, JoinSet};

/// What the controller was asked to run, fully resolved.
#[derive(Debug, Clone)]
pub enum RunMode {
    Server(ServerConfig),
    Client(ClientConfig),
    Generate(GenerateConfig),
}

/// Outcome of a `client` or `server` run.
#[derive(Debug, Clone)]
pub struct RunResult {
    pub summary: Report,
    pub reports: Vec<Report>,
    /// Sessions that failed to connect or broke on a protocol error.
    pub failures: usize,
    pub interrupted: bool,
}

type SessionResult = Result<(Report, RunOutcome), BenchError>;

pub struct Controller {
    pub mode: RunMode,
    pub json: bool,
    pub output_dir: Option<PathBuf>,
    collector: MetricsCollector,
}

impl Controller {
    /// Resolves the command line, merged over the optional configuration file, into a run.
    /// Every configuration problem surfaces here, before any socket is opened.
    pub fn new(cli: Cli) -> Result<Self, BenchError> {
        info!("[+] Loading configuration");
        let file = match &cli.config {
            Some(path) => FileConfig::from_file(path).map_err(|e| {
                error!("[!] Unable to import configuration from {}: {}", path.display(), e);
                e
            })?,
            None => FileConfig::default(),
        };

        let mode = match cli.command {
            Command::Server(args) => {
                RunMode::Server(args.merge(file.server.unwrap_or_default()).resolve()?)
            }
            Command::Client(args) => {
                RunMode::Client(args.merge(file.client.unwrap_or_default()).resolve()?)
            }
            Command::GenData(args) => RunMode::Generate(args.resolve()?),
        };

        Ok(Self {
            mode,
            json: cli.json || file.json.unwrap_or(false),
            output_dir: cli.output_dir.or(file.output_dir),
            collector: MetricsCollector::new(),
        })
    }

    pub async fn run(&self, shutdown: watch::Receiver<bool>) -> Result<RunResult, BenchError> {
        let storage = match &self.output_dir {
            Some(dir) => Some(FileStorage::new(dir)?),
            None => None,
        };

        let (failures, first_error) = match &self.mode {
            RunMode::Server(config) => self.run_server(config, shutdown.clone()).await?,
            RunMode::Client(config) => self.run_client(config, shutdown.clone()).await,
            RunMode::Generate(config) => {
                return run_generate(config, shutdown.clone(), storage.as_ref()).await
            }
        };
        let interrupted = *shutdown.borrow();

        let reports = self.collector.reports();
        if reports.is_empty() {
            if let Some(e) = first_error {
                return Err(e);
            }
        } else if let Some(e) = first_error {
            warn!("[!] Some sessions did not run: {}", e);
        }

        let summary = self.collector.summary();
        log_summary(&summary, reports.len(), failures);

        if let Some(storage) = &storage {
            for report in &reports {
                storage.save_report(report)?;
            }
            storage.save_summary(&summary)?;
            info!("[+] Reports stored under {}", storage.base_path().display());
        }

        Ok(RunResult {
            summary,
            reports,
            failures,
            interrupted,
        })
    }

    async fn run_server(
        &self,
        config: &ServerConfig,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(usize, Option<BenchError>), BenchError> {
        let store = PayloadStore::prepare(&config.source).await?;
        info!(
            "[+] Serving {} bytes of data from {}",
            store.len(),
            store.path().display()
        );
        let mut listener =
            ConnectionManager::listen(&config.bind, config.port, config.max_clients).await?;
        let spec = Arc::new(config.workload.clone());

        let mut sessions = JoinSet::new();
        let mut failures = 0;
        let mut first_error = None;

        enum Event {
            Accepted(Result<Option<Connection>, ConnectionError>),
            Finished(Result<SessionResult, JoinError>),
        }

        loop {
            let event = tokio::select! {
                res = listener.accept(&mut shutdown) => Event::Accepted(res),
                Some(done) = sessions.join_next() => Event::Finished(done),
            };

            match event {
                Event::Accepted(Ok(Some(connection))) => {
                    let source = match store.open().await {
                        Ok(source) => source,
                        Err(e) => {
                            error!("[{}] Unable to open the data source: {}", connection.session.id, e);
                            failures += 1;
                            continue;
                        }
                    };
                    sessions.spawn(drive_session(
                        self.collector.clone(),
                        WorkloadEngine::new(Arc::clone(&spec)),
                        connection,
                        Workload::Send { source },
                        shutdown.clone(),
                    ));
                }
                Event::Accepted(Ok(None)) => break,
                Event::Accepted(Err(e)) => {
                    error!("[!] Stopped accepting: {}", e);
                    first_error = Some(e.into());
                    break;
                }
                Event::Finished(done) => failures += tally(done, &mut first_error),
            }
        }

        info!(
            "Accepted {} client(s), waiting for running sessions",
            listener.accepted()
        );
        drop(listener);
        while let Some(done) = sessions.join_next().await {
            failures += tally(done, &mut first_error);
        }
        Ok((failures, first_error))
    }

    async fn run_client(
        &self,
        config: &ClientConfig,
        shutdown: watch::Receiver<bool>,
    ) -> (usize, Option<BenchError>) {
        let count = config.connection_count();
        let shares: Vec<Option<u64>> = match config.workload.termination {
            Termination::Bytes(total) => allot_size(total, count).into_iter().map(Some).collect(),
            _ => vec![None; count],
        };
        let cache_share = usize::try_from(config.cache / count as u64).unwrap_or(usize::MAX);
        let spec = Arc::new(config.workload.clone());

        info!(
            "[+] Starting {} connection(s) to {:?} on port {}",
            count, config.addresses, config.port
        );

        let targets = config
            .addresses
            .iter()
            .flat_map(|address| std::iter::repeat(address).take(config.workload.concurrency));

        let mut sessions: JoinSet<SessionResult> = JoinSet::new();
        for (address, limit) in targets.zip(shares) {
            let address = address.clone();
            let port = config.port;
            let options = config.connect.clone();
            let collector = self.collector.clone();
            let engine = WorkloadEngine::new(Arc::clone(&spec));
            let mut shutdown = shutdown.clone();

            sessions.spawn(async move {
                let connection = tokio::select! {
                    res = ConnectionManager::connect(&address, port, &options) => res?,
                    _ = cancelled(&mut shutdown) => return Err(BenchError::Interrupted),
                };
                drive_session(
                    collector,
                    engine,
                    connection,
                    Workload::Receive {
                        limit,
                        cache_bytes: cache_share,
                    },
                    shutdown,
                )
                .await
            });
        }

        let mut failures = 0;
        let mut first_error = None;
        while let Some(done) = sessions.join_next().await {
            failures += tally(done, &mut first_error);
        }
        (failures, first_error)
    }
}

async fn run_generate(
    config: &GenerateConfig,
    shutdown: watch::Receiver<bool>,
    storage: Option<&FileStorage>,
) -> Result<RunResult, BenchError> {
    let summary = generate(config, shutdown).await?;
    if let Some(storage) = storage {
        storage.save_summary(&summary)?;
    }
    Ok(RunResult {
        summary,
        reports: Vec::new(),
        failures: 0,
        interrupted: false,
    })
}

/// Runs one established session to its end and turns its samples into a report.
async fn drive_session(
    collector: MetricsCollector,
    engine: WorkloadEngine,
    connection: Connection,
    workload: Workload,
    shutdown: watch::Receiver<bool>,
) -> SessionResult {
    collector.open(&connection.session)?;
    let mut samples = engine.run(connection, workload, shutdown)?;
    while let Some(sample) = samples.next().await {
        if let Err(e) = collector.record(sample) {
            warn!("[!] Dropping sample: {}", e);
        }
    }
    let (session, outcome) = samples.finish().await?;
    let report = collector.complete(&session)?;
    Ok((report, outcome))
}

/// Counts a finished session task as a failure or not, keeping the first error.
fn tally(done: Result<SessionResult, JoinError>, first_error: &mut Option<BenchError>) -> usize {
    let err = match done {
        Ok(Ok((_, RunOutcome::Failed(e)))) => {
            warn!("[!] Session failed: {}", e);
            return 1;
        }
        Ok(Ok(_)) => return 0,
        Ok(Err(BenchError::Interrupted)) => return 0,
        Ok(Err(e)) => e,
        Err(e) => BenchError::Protocol(ProtocolError::Io(std::io::Error::new(
            std::io::ErrorKind::Other,
            e,
        ))),
    };
    error!("[!] {}", err);
    first_error.get_or_insert(err);
    1
}

fn log_summary(summary: &Report, sessions: usize, failures: usize) {
    info!(
        "[SUMMARY] {} session(s), {} failed{}",
        sessions,
        failures,
        if summary.partial { ", partial" } else { "" }
    );
    info!(
        "[SUMMARY] {} bytes{} in {:.3}s: {}, {:.0} bit/s",
        summary.total_bytes,
        kept_share(summary),
        summary.duration_secs,
        format_rate(summary.throughput_bps),
        summary.bitrate_bps
    );
    if let Some(latency) = &summary.latency {
        info!(
            "[SUMMARY] latency over {} blocks (us): min {} mean {:.1} p50 {} p95 {} p99 {} max {}",
            latency.count,
            latency.min_us,
            latency.mean_us,
            latency.p50_us,
            latency.p95_us,
            latency.p99_us,
            latency.max_us
        );
    }
}

/// ` (25.000% of 40960 raw bytes)`, or nothing before any raw byte.
fn kept_share(summary: &Report) -> String {
    summary
        .kept_percent()
        .map(|pct| format!(" ({:.3}% of {} raw bytes)", pct, summary.raw_bytes))
        .unwrap_or_default()
}
