use crate::session_management::Role;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// One measurement window of a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleRecord {
    pub session_id: Uuid,
    pub seq: u64,
    /// Offset of the window from the start of the session's workload.
    pub start: Duration,
    pub elapsed: Duration,
    /// Payload bytes, after the read method.
    pub bytes: u64,
    /// Bytes read from the wire or the data source, before the read method.
    pub raw_bytes: u64,
    pub ops: u64,
    pub latencies: Vec<Duration>,
    /// Set on the last window of a session that did not finish cleanly.
    pub partial: bool,
}

impl SampleRecord {
    pub fn end(&self) -> Duration {
        self.start + self.elapsed
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatencySummary {
    pub count: usize,
    pub min_us: u64,
    pub mean_us: f64,
    pub p50_us: u64,
    pub p95_us: u64,
    pub p99_us: u64,
    pub max_us: u64,
}

impl LatencySummary {
    /// `None` without observations.
    pub fn from_observations(observations: &[Duration]) -> Option<Self> {
        if observations.is_empty() {
            return None;
        }
        let mut sorted = observations.to_vec();
        sorted.sort_unstable();

        let total: Duration = sorted.iter().sum();
        let mean = total.as_secs_f64() * 1e6 / sorted.len() as f64;
        Some(Self {
            count: sorted.len(),
            min_us: micros(sorted[0]),
            mean_us: mean,
            p50_us: micros(percentile(&sorted, 50.0)),
            p95_us: micros(percentile(&sorted, 95.0)),
            p99_us: micros(percentile(&sorted, 99.0)),
            max_us: micros(sorted[sorted.len() - 1]),
        })
    }
}

/// Rounded-rank percentile of an ascending, non-empty slice: the element at index
/// `round(p / 100 * (n - 1))`.
pub fn percentile(sorted: &[Duration], p: f64) -> Duration {
    let rank = ((p / 100.0) * (sorted.len() - 1) as f64).round() as usize;
    sorted[rank.min(sorted.len() - 1)]
}

fn micros(d: Duration) -> u64 {
    d.as_micros() as u64
}

/// Finalized metrics of one session, or of a whole run when `session_id` is `None`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub session_id: Option<Uuid>,
    pub role: Option<Role>,
    pub total_bytes: u64,
    pub raw_bytes: u64,
    pub ops: u64,
    pub samples: u64,
    pub duration_secs: f64,
    /// Bytes per second.
    pub throughput_bps: f64,
    /// Bits per second.
    pub bitrate_bps: f64,
    pub latency: Option<LatencySummary>,
    pub partial: bool,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl Report {
    pub(crate) fn set_rates(&mut self) {
        self.throughput_bps = if self.duration_secs > 0.0 {
            self.total_bytes as f64 / self.duration_secs
        } else {
            0.0
        };
        self.bitrate_bps = self.throughput_bps * 8.0;
    }

    /// Share of the raw bytes the read method kept, in percent. `None` before any raw byte.
    pub fn kept_percent(&self) -> Option<f64> {
        (self.raw_bytes > 0).then(|| self.total_bytes as f64 * 100.0 / self.raw_bytes as f64)
    }
}

/// Human readable byte rate, e.g. `12.50 MB/s`.
pub fn format_rate(bytes_per_sec: f64) -> String {
    const UNITS: [&str; 4] = ["B/s", "KB/s", "MB/s", "GB/s"];
    let mut value = bytes_per_sec;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{:.2} {}", value, UNITS[unit])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    #[test]
    fn test_rounded_rank_percentiles() {
        let sorted: Vec<Duration> = (1..=100).map(ms).collect();
        assert_eq!(percentile(&sorted, 0.0), ms(1));
        assert_eq!(percentile(&sorted, 50.0), ms(51));
        assert_eq!(percentile(&sorted, 99.0), ms(99));
        assert_eq!(percentile(&sorted, 100.0), ms(100));
        assert_eq!(percentile(&[ms(7)], 95.0), ms(7));
    }

    #[test]
    fn test_latency_summary() {
        assert!(LatencySummary::from_observations(&[]).is_none());

        let summary = LatencySummary::from_observations(&[ms(3), ms(1), ms(2)]).unwrap();
        assert_eq!(summary.count, 3);
        assert_eq!(summary.min_us, 1000);
        assert_eq!(summary.max_us, 3000);
        assert_eq!(summary.p50_us, 2000);
        assert!((summary.mean_us - 2000.0).abs() < 1e-6);
    }

    #[test]
    fn test_kept_percent() {
        let mut report = Report::default();
        assert_eq!(report.kept_percent(), None);

        report.raw_bytes = 40_960;
        report.total_bytes = 10_240;
        assert_eq!(report.kept_percent(), Some(25.0));
        report.total_bytes = 40_960;
        assert_eq!(report.kept_percent(), Some(100.0));
    }

    #[test]
    fn test_format_rate() {
        assert_eq!(format_rate(0.0), "0.00 B/s");
        assert_eq!(format_rate(2048.0), "2.00 KB/s");
        assert_eq!(format_rate(1.5 * 1024.0 * 1024.0), "1.50 MB/s");
    }
}
