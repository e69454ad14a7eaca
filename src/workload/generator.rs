//! Files of random decimal digits, the usual data file of `server --filename` and of the
//! `match` read method.
//!
//! The digit count is split over parts with [`allot_size`]. Each part is written to its own
//! `<file>.part<N>` on a blocking thread and appended to the target as soon as it is done.

use crate::configuration::size::allot_size;
use crate::configuration::types::GenerateConfig;
use crate::error_handling::types::{BenchError, StorageError};
use crate::metrics::types::{format_rate, Report};
use chrono::Utc;
use log::{debug, info, warn};
use rand::distributions::Uniform;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::ffi::OsString;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::Instant;

const DIGIT_CHUNK: usize = 64 * 1024;

/// Writes `config.count` random digits to `config.filename`, replacing any existing file.
///
/// Returns a report whose byte counts are the digits written. On error or interruption the
/// target and every part file are removed.
pub async fn generate(
    config: &GenerateConfig,
    shutdown: watch::Receiver<bool>,
) -> Result<Report, BenchError> {
    let target = config.filename.as_path();
    info!("[result file: {}]", target.display());
    if fs::metadata(target).await.is_ok() {
        warn!("Replacing obsolete {}", target.display());
    }
    let mut out = File::create(target)
        .await
        .map_err(|e| write_failed(target, e))?;

    let started = Instant::now();
    let started_at = Utc::now();
    let shares: Vec<u64> = allot_size(config.count, config.processes)
        .into_iter()
        .filter(|&n| n > 0)
        .collect();
    let part_paths: Vec<PathBuf> = (0..shares.len()).map(|i| part_path(target, i)).collect();

    let mut parts = JoinSet::new();
    for (path, count) in part_paths.iter().cloned().zip(shares.iter().copied()) {
        let shutdown = shutdown.clone();
        parts.spawn_blocking(move || {
            let done = write_part(&path, count, &shutdown);
            (path, done)
        });
    }

    let mut failure: Option<BenchError> = None;
    while let Some(done) = parts.join_next().await {
        let (path, written) = match done {
            Ok(done) => done,
            Err(e) => {
                let e = StorageError::WriteFailed(format!("part task: {}", e));
                failure.get_or_insert(e.into());
                continue;
            }
        };
        match written {
            Ok(true) if failure.is_none() => {
                debug!("Merging {} into {}", path.display(), target.display());
                if let Err(e) = append(&mut out, &path).await {
                    failure.get_or_insert(write_failed(target, e).into());
                }
            }
            Ok(true) => {}
            Ok(false) => {
                failure.get_or_insert(BenchError::Interrupted);
            }
            Err(e) => {
                failure.get_or_insert(write_failed(&path, e).into());
            }
        }
    }

    for path in &part_paths {
        if let Err(e) = fs::remove_file(path).await {
            if e.kind() != io::ErrorKind::NotFound {
                warn!("[!] Unable to remove {}: {}", path.display(), e);
            }
        }
    }

    let flushed = out.flush().await;
    drop(out);
    if let Some(e) = failure {
        let _ = fs::remove_file(target).await;
        return Err(e);
    }
    flushed.map_err(|e| write_failed(target, e))?;

    let mut report = Report {
        total_bytes: config.count,
        raw_bytes: config.count,
        ops: shares.len() as u64,
        duration_secs: started.elapsed().as_secs_f64(),
        started_at: Some(started_at),
        ended_at: Some(Utc::now()),
        ..Default::default()
    };
    report.set_rates();
    info!(
        "Wrote {} digits in {} part(s), total time consumption: {:.3} seconds ({})",
        config.count,
        shares.len(),
        report.duration_secs,
        format_rate(report.throughput_bps)
    );
    Ok(report)
}

fn part_path(target: &Path, index: usize) -> PathBuf {
    let mut name = OsString::from(target.as_os_str());
    name.push(format!(".part{}", index));
    PathBuf::from(name)
}

fn write_failed(path: &Path, e: impl std::fmt::Display) -> StorageError {
    StorageError::WriteFailed(format!("{}: {}", path.display(), e))
}

/// Writes `count` digits to `path`. `Ok(false)` when interrupted before the end.
fn write_part(path: &Path, count: u64, shutdown: &watch::Receiver<bool>) -> io::Result<bool> {
    let mut file = std::fs::File::create(path)?;
    let mut rng = StdRng::from_entropy();
    let digits = Uniform::new_inclusive(b'0', b'9');
    let mut chunk = vec![0u8; DIGIT_CHUNK];
    let mut left = count;
    while left > 0 {
        if *shutdown.borrow() {
            return Ok(false);
        }
        let n = left.min(DIGIT_CHUNK as u64) as usize;
        for byte in &mut chunk[..n] {
            *byte = rng.sample(&digits);
        }
        file.write_all(&chunk[..n])?;
        left -= n as u64;
    }
    file.flush()?;
    debug!("Wrote {} digits to {}", count, path.display());
    Ok(true)
}

async fn append(out: &mut File, part: &Path) -> io::Result<u64> {
    let mut input = File::open(part).await?;
    tokio::io::copy(&mut input, out).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn config(dir: &TempDir, count: u64, processes: usize) -> GenerateConfig {
        GenerateConfig {
            count,
            filename: dir.path().join("data_file"),
            processes,
        }
    }

    fn entries(dir: &TempDir) -> usize {
        std::fs::read_dir(dir.path()).unwrap().count()
    }

    #[tokio::test]
    async fn test_writes_exactly_count_digits() {
        let dir = TempDir::new().unwrap();
        let (_tx, shutdown) = watch::channel(false);
        let config = config(&dir, 100_003, 4);

        let report = generate(&config, shutdown).await.unwrap();
        let data = std::fs::read(&config.filename).unwrap();
        assert_eq!(data.len(), 100_003);
        assert!(data.iter().all(u8::is_ascii_digit));
        for digit in b'0'..=b'9' {
            assert!(data.contains(&digit));
        }
        assert_eq!(report.total_bytes, 100_003);
        assert_eq!(report.ops, 4);
        assert!(!report.partial);
        // Part files are merged away.
        assert_eq!(entries(&dir), 1);
    }

    #[tokio::test]
    async fn test_replaces_file_and_skips_empty_parts() {
        let dir = TempDir::new().unwrap();
        let (_tx, shutdown) = watch::channel(false);
        let config = config(&dir, 3, 8);
        std::fs::write(&config.filename, b"obsolete contents").unwrap();

        let report = generate(&config, shutdown).await.unwrap();
        let data = std::fs::read(&config.filename).unwrap();
        assert_eq!(data.len(), 3);
        assert!(data.iter().all(u8::is_ascii_digit));
        assert_eq!(report.ops, 3);
        assert_eq!(entries(&dir), 1);
    }

    #[tokio::test]
    async fn test_zero_count_gives_empty_file() {
        let dir = TempDir::new().unwrap();
        let (_tx, shutdown) = watch::channel(false);
        let config = config(&dir, 0, 2);

        let report = generate(&config, shutdown).await.unwrap();
        assert_eq!(std::fs::metadata(&config.filename).unwrap().len(), 0);
        assert_eq!(report.total_bytes, 0);
        assert_eq!(report.throughput_bps, 0.0);
    }

    #[tokio::test]
    async fn test_interrupt_removes_output() {
        let dir = TempDir::new().unwrap();
        let (_tx, shutdown) = watch::channel(true);
        let config = config(&dir, 1_000_000, 2);

        let err = generate(&config, shutdown).await.unwrap_err();
        assert!(matches!(err, BenchError::Interrupted));
        assert!(!config.filename.exists());
        assert_eq!(entries(&dir), 0);
    }

    #[tokio::test]
    async fn test_missing_directory_is_a_storage_error() {
        let dir = TempDir::new().unwrap();
        let (_tx, shutdown) = watch::channel(false);
        let config = GenerateConfig {
            count: 10,
            filename: dir.path().join("missing").join("data_file"),
            processes: 1,
        };

        let err = generate(&config, shutdown).await.unwrap_err();
        assert!(matches!(err, BenchError::Storage(StorageError::WriteFailed(_))));
        assert_eq!(err.exit_code(), 1);
    }
}
