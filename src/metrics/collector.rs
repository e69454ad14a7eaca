//! Turns sample streams into reports.
//!
//! [`finalize`] is the pure reduction of one sample sequence. [`MetricsCollector`] is the sink
//! the session tasks of a run share: it accepts samples only for sessions opened while
//! `Established`, finalizes each of them on completion and aggregates the run summary.

use super::types::{LatencySummary, Report, SampleRecord};
use crate::error_handling::types::SessionError;
use crate::session_management::Session;
use chrono::Utc;
use log::{debug, info};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use uuid::Uuid;

/// Reduces a sample sequence to a report. An empty sequence gives a zero report.
pub fn finalize<I>(samples: I) -> Report
where
    I: IntoIterator<Item = SampleRecord>,
{
    let mut report = Report::default();
    let mut first_start: Option<Duration> = None;
    let mut last_end = Duration::ZERO;
    let mut latencies = Vec::new();

    for sample in samples {
        report.session_id.get_or_insert(sample.session_id);
        report.total_bytes += sample.bytes;
        report.raw_bytes += sample.raw_bytes;
        report.ops += sample.ops;
        report.samples += 1;
        report.partial = sample.partial;

        first_start = Some(first_start.map_or(sample.start, |s| s.min(sample.start)));
        last_end = last_end.max(sample.end());
        latencies.extend(sample.latencies);
    }

    report.duration_secs = first_start
        .map(|start| last_end.saturating_sub(start).as_secs_f64())
        .unwrap_or(0.0);
    report.set_rates();
    report.latency = LatencySummary::from_observations(&latencies);
    report
}

#[derive(Default)]
struct CollectorState {
    open: HashMap<Uuid, Vec<SampleRecord>>,
    reports: Vec<Report>,
    /// Latency observations of every completed session, for the summary percentiles.
    latencies: Vec<Duration>,
}

/// Shared sink for the samples of concurrent sessions.
#[derive(Clone, Default)]
pub struct MetricsCollector {
    inner: Arc<Mutex<CollectorState>>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, CollectorState> {
        // A panicking session task must not take the other sessions' numbers down with it.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Starts accepting samples for `session`, which must be `Established`.
    pub fn open(&self, session: &Session) -> Result<(), SessionError> {
        if !session.is_established() {
            return Err(SessionError::NotEstablished(session.state()));
        }
        self.state().open.entry(session.id).or_default();
        debug!("[{}] metrics opened", session.id);
        Ok(())
    }

    pub fn record(&self, sample: SampleRecord) -> Result<(), SessionError> {
        let mut state = self.state();
        let samples = state
            .open
            .get_mut(&sample.session_id)
            .ok_or(SessionError::NotFound)?;
        samples.push(sample);
        Ok(())
    }

    /// Finalizes the samples of `session` into its report.
    pub fn complete(&self, session: &Session) -> Result<Report, SessionError> {
        let mut state = self.state();
        let samples = state
            .open
            .remove(&session.id)
            .ok_or(SessionError::NotFound)?;

        state
            .latencies
            .extend(samples.iter().flat_map(|s| s.latencies.iter().copied()));
        let mut report = finalize(samples);
        report.session_id = Some(session.id);
        report.role = Some(session.role);
        report.started_at = Some(session.established_at.unwrap_or(session.start_time));
        report.ended_at = Some(session.end_time.unwrap_or_else(Utc::now));

        info!(
            "[{}] report: {} bytes in {:.3}s{}",
            session.id,
            report.total_bytes,
            report.duration_secs,
            if report.partial { " (partial)" } else { "" }
        );
        state.reports.push(report.clone());
        Ok(report)
    }

    pub fn reports(&self) -> Vec<Report> {
        self.state().reports.clone()
    }

    /// Aggregate of every completed session. Its duration spans the earliest establishment to
    /// the latest session end, so time spent connecting is not counted.
    pub fn summary(&self) -> Report {
        let state = self.state();
        let mut summary = Report::default();

        for report in &state.reports {
            summary.role = summary.role.or(report.role);
            summary.total_bytes += report.total_bytes;
            summary.raw_bytes += report.raw_bytes;
            summary.ops += report.ops;
            summary.samples += report.samples;
            summary.partial |= report.partial;
            summary.started_at = match (summary.started_at, report.started_at) {
                (Some(a), Some(b)) => Some(a.min(b)),
                (a, b) => a.or(b),
            };
            summary.ended_at = match (summary.ended_at, report.ended_at) {
                (Some(a), Some(b)) => Some(a.max(b)),
                (a, b) => a.or(b),
            };
        }

        summary.duration_secs = match (summary.started_at, summary.ended_at) {
            (Some(start), Some(end)) => (end - start)
                .to_std()
                .map(|d| d.as_secs_f64())
                .unwrap_or(0.0),
            _ => 0.0,
        };
        summary.set_rates();
        summary.latency = LatencySummary::from_observations(&state.latencies);
        summary
    }
}
