//! # Workload Engine
//!
//! Drives one established duplex stream and reports what moved over it as a lazy sequence of
//! [`SampleRecord`]s.
//!
//! ```text
//!  sender (server)                          receiver (client)
//!  ───────────────                          ─────────────────
//!  preamble ─────────────────────────────▶  validate preamble
//!  loop:                                    loop:
//!    DataSource::fill (read method)           read frame header
//!    frame ──────────────────────────────▶    read payload, read method, cache
//!    [ack ◀──────────────────────────────     ack if requested]
//!    pace to rate                             stop at own byte share
//!  end frame ────────────────────────────▶  end frame: done
//! ```
//!
//! Each run is its own tokio task. Samples go out through a bounded channel while the task
//! runs; [`SampleStream::finish`] hands back the closed [`Session`] and how the run ended.

use super::cache::RecentBytes;
use super::filter::ReadMethod;
use super::sampler::Sampler;
use super::source::DataSource;
use crate::configuration::types::{Termination, WorkloadSpec};
use crate::error_handling::types::{ConfigError, ProtocolError};
use crate::metrics::types::SampleRecord;
use crate::network::protocol::{self, Preamble};
use crate::network::types::Connection;
use crate::session_management::Session;
use log::{debug, info, trace, warn};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};

const SAMPLE_CHANNEL_CAPACITY: usize = 1024;
const RECV_CHUNK: usize = 64 * 1024;
const PREVIEW_LEN: usize = 50;

/// What one session does with its stream.
pub enum Workload {
    /// Frame blocks of `source` onto the stream.
    Send { source: DataSource },
    /// Consume frames, stopping after `limit` wire bytes if set. Each read takes at most
    /// `max_block` bytes of the receiving spec's payload mode.
    Receive {
        limit: Option<u64>,
        cache_bytes: usize,
    },
}

/// How a run ended.
#[derive(Debug)]
pub enum RunOutcome {
    Completed,
    /// The peer closed the stream before the end of the workload.
    PeerClosed,
    Cancelled,
    Failed(ProtocolError),
}

impl RunOutcome {
    /// Anything but a clean end yields a partial report.
    pub fn is_partial(&self) -> bool {
        !matches!(self, RunOutcome::Completed)
    }
}

/// Samples of a running workload, plus the task producing them.
pub struct SampleStream {
    rx: mpsc::Receiver<SampleRecord>,
    handle: JoinHandle<(Session, RunOutcome)>,
}

impl SampleStream {
    /// Next sample, `None` once the run is over and every sample was taken.
    pub async fn next(&mut self) -> Option<SampleRecord> {
        self.rx.recv().await
    }

    /// Waits for the run to end. Samples not taken with [`next`](Self::next) are dropped.
    pub async fn finish(mut self) -> Result<(Session, RunOutcome), ProtocolError> {
        self.rx.close();
        let mut dropped = 0;
        while self.rx.recv().await.is_some() {
            dropped += 1;
        }
        if dropped > 0 {
            debug!("{} sample(s) dropped at finish", dropped);
        }
        self.handle
            .await
            .map_err(|e| ProtocolError::Io(io::Error::new(io::ErrorKind::Other, e)))
    }
}

pub struct WorkloadEngine {
    spec: Arc<WorkloadSpec>,
}

impl WorkloadEngine {
    pub fn new(spec: Arc<WorkloadSpec>) -> Self {
        Self { spec }
    }

    /// Starts `workload` on `connection` in a new task.
    ///
    /// # Errors
    ///
    /// Only building the read method can fail here. Everything that goes wrong on the stream
    /// is reported through [`RunOutcome`].
    pub fn run<S>(
        &self,
        connection: Connection<S>,
        workload: Workload,
        shutdown: watch::Receiver<bool>,
    ) -> Result<SampleStream, ConfigError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let method = self.spec.method.build()?;
        let spec = Arc::clone(&self.spec);
        let (tx, rx) = mpsc::channel(SAMPLE_CHANNEL_CAPACITY);

        let handle = tokio::spawn(async move {
            let Connection {
                mut session,
                mut stream,
            } = connection;
            let mut shutdown = shutdown;
            let mut method = method;
            let started = Instant::now();
            let mut sampler = Sampler::new(session.id, started, spec.sample_interval, tx);

            let result = match workload {
                Workload::Send { source } => {
                    info!(
                        "[{}] Sending workload to {} ({:?}, method {})",
                        session.id,
                        session.endpoint,
                        spec.termination,
                        method.name()
                    );
                    let mut sender = Sender {
                        spec: &spec,
                        session_id: session.id,
                        source,
                        method: method.as_mut(),
                        started,
                    };
                    sender.run(&mut stream, &mut sampler, &mut shutdown).await
                }
                Workload::Receive { limit, cache_bytes } => {
                    info!(
                        "[{}] Receiving workload from {} (method {})",
                        session.id,
                        session.endpoint,
                        method.name()
                    );
                    let mut receiver = Receiver {
                        session_id: session.id,
                        limit,
                        read_size: (spec.payload.max_block() as usize).max(1),
                        cache: RecentBytes::new(cache_bytes),
                        method: method.as_mut(),
                    };
                    receiver.run(&mut stream, &mut sampler, &mut shutdown).await
                }
            };

            let outcome = outcome_of(result);
            sampler.finish(outcome.is_partial()).await;
            drop(stream);

            let closed = match &outcome {
                RunOutcome::Failed(e) => {
                    warn!("[{}] Workload failed: {}", session.id, e);
                    session.fail()
                }
                other => {
                    info!("[{}] Workload ended: {:?}", session.id, other);
                    session.close()
                }
            };
            if let Err(e) = closed {
                warn!("[{}] {}", session.id, e);
            }
            (session, outcome)
        });

        Ok(SampleStream { rx, handle })
    }
}

/// Resolves once the shutdown flag is set. A dropped sender never cancels.
pub async fn cancelled(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

fn outcome_of(result: Result<RunOutcome, ProtocolError>) -> RunOutcome {
    match result {
        Ok(outcome) => outcome,
        Err(ProtocolError::UnexpectedEof(_)) => RunOutcome::PeerClosed,
        Err(ProtocolError::Io(e)) if is_peer_gone(&e) => RunOutcome::PeerClosed,
        Err(e) => RunOutcome::Failed(e),
    }
}

fn is_peer_gone(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionReset
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::UnexpectedEof
            | io::ErrorKind::ConnectionAborted
    )
}

fn preview(data: &[u8]) -> String {
    let shown = &data[..data.len().min(PREVIEW_LEN)];
    format!(
        "{}{}",
        String::from_utf8_lossy(shown),
        if data.len() > PREVIEW_LEN { " ..." } else { "" }
    )
}

struct Sender<'a> {
    spec: &'a WorkloadSpec,
    session_id: uuid::Uuid,
    source: DataSource,
    method: &'a mut dyn ReadMethod,
    started: Instant,
}

impl Sender<'_> {
    async fn run<S>(
        &mut self,
        stream: &mut S,
        sampler: &mut Sampler,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<RunOutcome, ProtocolError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let preamble = Preamble::for_spec(self.spec);
        preamble.write_to(stream).await?;
        debug!("[{}] preamble sent: {:?}", self.session_id, preamble);

        let mut rng = StdRng::from_entropy();
        let mut block = Vec::with_capacity(self.spec.payload.max_block() as usize);
        let mut sent = 0u64;

        loop {
            if *shutdown.borrow() {
                return Ok(RunOutcome::Cancelled);
            }
            let next = self.spec.payload.next_block(&mut rng) as u64;
            let want = match self.spec.termination {
                Termination::Bytes(total) if sent >= total => break,
                Termination::Bytes(total) => next.min(total - sent),
                Termination::Duration(d) if self.started.elapsed() >= d => break,
                _ => next,
            };

            let raw = self
                .source
                .fill(&mut block, want as usize, &mut *self.method)
                .await?;
            let len = block.len() as u32;

            let op_start = Instant::now();
            tokio::select! {
                res = protocol::write_frame(stream, &block) => res?,
                _ = cancelled(shutdown) => return Ok(RunOutcome::Cancelled),
            }
            let latency = if self.spec.latency {
                tokio::select! {
                    res = protocol::read_ack(stream, len) => res?,
                    _ = cancelled(shutdown) => return Ok(RunOutcome::Cancelled),
                }
                Some(op_start.elapsed())
            } else {
                None
            };

            sent += len as u64;
            trace!(
                "[{}] sent {} bytes: {}",
                self.session_id,
                len,
                preview(&block)
            );
            sampler.add(len as u64, raw, latency).await;

            if let Some(rate) = self.spec.rate {
                let due = Duration::from_secs_f64(sent as f64 / rate as f64);
                let elapsed = self.started.elapsed();
                if due > elapsed {
                    tokio::select! {
                        _ = sleep(due - elapsed) => {}
                        _ = cancelled(shutdown) => return Ok(RunOutcome::Cancelled),
                    }
                }
            }
        }

        protocol::write_end(stream).await?;
        stream.shutdown().await?;
        info!("[{}] Sent {} bytes", self.session_id, sent);
        Ok(RunOutcome::Completed)
    }
}

struct Receiver<'a> {
    session_id: uuid::Uuid,
    limit: Option<u64>,
    read_size: usize,
    cache: RecentBytes,
    method: &'a mut dyn ReadMethod,
}

impl Receiver<'_> {
    async fn run<S>(
        &mut self,
        stream: &mut S,
        sampler: &mut Sampler,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<RunOutcome, ProtocolError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let preamble = tokio::select! {
            res = Preamble::read_from(stream) => res?,
            _ = cancelled(shutdown) => return Ok(RunOutcome::Cancelled),
        };
        info!(
            "[{}] Server workload: {:?}, blocks up to {} bytes{}",
            self.session_id,
            preamble.termination,
            preamble.max_block,
            if preamble.latency_acks {
                ", acknowledged"
            } else {
                ""
            }
        );

        let read_size = (preamble.max_block as usize)
            .min(RECV_CHUNK)
            .min(self.read_size);
        let mut buf = vec![0u8; read_size];
        let mut filtered = Vec::with_capacity(buf.len());
        let mut received = 0u64;

        loop {
            if self.limit.map_or(false, |limit| received >= limit) {
                info!(
                    "[{}] Byte share of {} reached",
                    self.session_id, received
                );
                break;
            }

            let len = tokio::select! {
                res = protocol::read_frame_len(stream, preamble.max_block) => res?,
                _ = cancelled(shutdown) => return Ok(RunOutcome::Cancelled),
            };
            if len == 0 {
                debug!("[{}] end frame", self.session_id);
                break;
            }

            let mut remaining = len as usize;
            while remaining > 0 {
                let mut want = remaining.min(buf.len());
                if let Some(limit) = self.limit {
                    want = want.min(limit.saturating_sub(received) as usize);
                    if want == 0 {
                        break;
                    }
                }
                let n = tokio::select! {
                    res = stream.read(&mut buf[..want]) => res?,
                    _ = cancelled(shutdown) => return Ok(RunOutcome::Cancelled),
                };
                if n == 0 {
                    return Err(ProtocolError::UnexpectedEof("frame payload"));
                }
                received += n as u64;
                remaining -= n;

                filtered.clear();
                self.method.apply(&buf[..n], &mut filtered);
                self.cache.push(&filtered);
                trace!(
                    "[{}] received {} bytes: {}",
                    self.session_id,
                    n,
                    preview(&buf[..n])
                );
                sampler.add(filtered.len() as u64, n as u64, None).await;
            }

            if remaining == 0 && preamble.latency_acks {
                protocol::write_ack(stream, len).await?;
            }
        }

        // The server may already be gone once our share is in.
        if let Err(e) = stream.shutdown().await {
            debug!("[{}] shutdown: {}", self.session_id, e);
        }
        info!(
            "[{}] Received {} bytes ({} after method), {} kept in cache",
            self.session_id,
            received,
            self.cache.seen(),
            self.cache.len()
        );
        Ok(RunOutcome::Completed)
    }
}
