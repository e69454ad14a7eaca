use crate::metrics::types::SampleRecord;
use log::trace;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use uuid::Uuid;

/// Coalesces per-operation counts into one [`SampleRecord`] per interval and pushes them to
/// the session's sample channel.
pub struct Sampler {
    session_id: Uuid,
    origin: Instant,
    interval: Duration,
    tx: mpsc::Sender<SampleRecord>,
    seq: u64,
    window_start: Instant,
    bytes: u64,
    raw_bytes: u64,
    ops: u64,
    latencies: Vec<Duration>,
}

impl Sampler {
    pub fn new(
        session_id: Uuid,
        origin: Instant,
        interval: Duration,
        tx: mpsc::Sender<SampleRecord>,
    ) -> Self {
        Self {
            session_id,
            origin,
            interval,
            tx,
            seq: 0,
            window_start: origin,
            bytes: 0,
            raw_bytes: 0,
            ops: 0,
            latencies: Vec::new(),
        }
    }

    /// Accounts one I/O operation.
    pub async fn add(&mut self, bytes: u64, raw_bytes: u64, latency: Option<Duration>) {
        self.bytes += bytes;
        self.raw_bytes += raw_bytes;
        self.ops += 1;
        self.latencies.extend(latency);

        if self.window_start.elapsed() >= self.interval {
            self.flush(false).await;
        }
    }

    /// Flushes the last window, even an empty one.
    pub async fn finish(mut self, partial: bool) {
        self.flush(partial).await;
    }

    async fn flush(&mut self, partial: bool) {
        let now = Instant::now();
        let sample = SampleRecord {
            session_id: self.session_id,
            seq: self.seq,
            start: self.window_start - self.origin,
            elapsed: now - self.window_start,
            bytes: self.bytes,
            raw_bytes: self.raw_bytes,
            ops: self.ops,
            latencies: std::mem::take(&mut self.latencies),
            partial,
        };
        trace!(
            "[{}] sample #{}: {} bytes in {} ops",
            self.session_id,
            sample.seq,
            sample.bytes,
            sample.ops
        );

        self.seq += 1;
        self.window_start = now;
        self.bytes = 0;
        self.raw_bytes = 0;
        self.ops = 0;

        // Nobody listening any more is not an error of the workload.
        let _ = self.tx.send(sample).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn collect(mut rx: mpsc::Receiver<SampleRecord>) -> Vec<SampleRecord> {
        let mut samples = Vec::new();
        while let Some(sample) = rx.recv().await {
            samples.push(sample);
        }
        samples
    }

    #[tokio::test]
    async fn test_long_interval_gives_one_sample() {
        let (tx, rx) = mpsc::channel(16);
        let id = Uuid::new_v4();
        let mut sampler = Sampler::new(id, Instant::now(), Duration::from_secs(3600), tx);
        sampler.add(10, 20, None).await;
        sampler.add(5, 5, Some(Duration::from_micros(70))).await;
        sampler.finish(true).await;

        let samples = collect(rx).await;
        assert_eq!(samples.len(), 1);
        let only = &samples[0];
        assert_eq!(only.session_id, id);
        assert_eq!((only.bytes, only.raw_bytes, only.ops), (15, 25, 2));
        assert_eq!(only.latencies, vec![Duration::from_micros(70)]);
        assert!(only.partial);
    }

    #[tokio::test(start_paused = true)]
    async fn test_windows_are_contiguous() {
        let (tx, rx) = mpsc::channel(16);
        let origin = Instant::now();
        let mut sampler = Sampler::new(Uuid::new_v4(), origin, Duration::from_millis(100), tx);
        for _ in 0..5 {
            tokio::time::advance(Duration::from_millis(60)).await;
            sampler.add(1, 1, None).await;
        }
        sampler.finish(false).await;

        let samples = collect(rx).await;
        assert_eq!(samples.iter().map(|s| s.bytes).sum::<u64>(), 5);
        assert_eq!(samples.len(), 3);
        for pair in samples.windows(2) {
            assert_eq!(pair[0].end(), pair[1].start);
            assert_eq!(pair[1].seq, pair[0].seq + 1);
        }
        assert!(!samples.last().unwrap().partial);
    }
}
