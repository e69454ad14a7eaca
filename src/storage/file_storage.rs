use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use log::{debug, error, info};
use uuid::Uuid;

use crate::error_handling::types::StorageError;
use crate::metrics::types::Report;
use crate::storage::storage_trait::ReportStorage;

/// Writes reports as pretty JSON files:
///
/// ```text
/// <base>/
/// ├── reports/<session id>.json
/// └── summary.json
/// ```
pub struct FileStorage {
    base_path: PathBuf,
}

impl FileStorage {
    pub fn new<P: AsRef<Path>>(base_path: P) -> Result<Self, StorageError> {
        let base_path = base_path.as_ref().to_path_buf();
        let reports_dir = base_path.join("reports");
        fs::create_dir_all(&reports_dir).map_err(|e| {
            error!(
                "Failed to create reports dir {}: {}",
                reports_dir.display(),
                e
            );
            StorageError::WriteFailed(format!("{}: {}", reports_dir.display(), e))
        })?;
        info!("FileStorage initialized at {}", base_path.display());
        Ok(Self { base_path })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn report_path(&self, id: Uuid) -> PathBuf {
        self.base_path.join("reports").join(format!("{}.json", id))
    }

    fn summary_path(&self) -> PathBuf {
        self.base_path.join("summary.json")
    }

    fn write_json(&self, path: &Path, report: &Report) -> Result<(), StorageError> {
        let fail = |e: &dyn std::fmt::Display| {
            error!("Failed to write report file {}: {}", path.display(), e);
            StorageError::WriteFailed(format!("{}: {}", path.display(), e))
        };
        let file = File::create(path).map_err(|e| fail(&e))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, report).map_err(|e| fail(&e))?;
        writer.write_all(b"\n").map_err(|e| fail(&e))?;
        writer.flush().map_err(|e| fail(&e))?;
        debug!("Wrote {}", path.display());
        Ok(())
    }
}

impl ReportStorage for FileStorage {
    fn save_report(&self, report: &Report) -> Result<PathBuf, StorageError> {
        let id = report.session_id.ok_or_else(|| {
            StorageError::WriteFailed("session report without a session id".into())
        })?;
        let path = self.report_path(id);
        self.write_json(&path, report)?;
        info!("Saved report of session {} to {}", id, path.display());
        Ok(path)
    }

    fn save_summary(&self, summary: &Report) -> Result<PathBuf, StorageError> {
        let path = self.summary_path();
        self.write_json(&path, summary)?;
        info!("Saved run summary to {}", path.display());
        Ok(path)
    }

    fn load_report(&self, session_id: Uuid) -> Result<Report, StorageError> {
        let path = self.report_path(session_id);
        let file = File::open(&path).map_err(|e| {
            error!("Failed to open report file {}: {}", path.display(), e);
            StorageError::ReadFailed(format!("{}: {}", path.display(), e))
        })?;
        serde_json::from_reader(BufReader::new(file)).map_err(|e| {
            error!("Invalid report file {}: {}", path.display(), e);
            StorageError::ReadFailed(format!("{}: {}", path.display(), e))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session_management::Role;
    use chrono::Utc;
    use tempfile::TempDir;

    fn report(id: Option<Uuid>) -> Report {
        let mut report = Report {
            session_id: id,
            role: Some(Role::Server),
            total_bytes: 1_048_576,
            raw_bytes: 1_048_576,
            ops: 256,
            samples: 3,
            duration_secs: 0.25,
            partial: false,
            started_at: Some(Utc::now()),
            ended_at: Some(Utc::now()),
            ..Default::default()
        };
        report.set_rates();
        report
    }

    #[test]
    fn test_save_and_load_report() {
        let dir = TempDir::new().unwrap();
        let storage = FileStorage::new(dir.path()).unwrap();
        let id = Uuid::new_v4();
        let original = report(Some(id));

        let path = storage.save_report(&original).unwrap();
        assert_eq!(path, dir.path().join("reports").join(format!("{}.json", id)));
        assert_eq!(storage.load_report(id).unwrap(), original);
    }

    #[test]
    fn test_summary_file() {
        let dir = TempDir::new().unwrap();
        let storage = FileStorage::new(dir.path()).unwrap();
        let path = storage.save_summary(&report(None)).unwrap();

        let json: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(json["total_bytes"], 1_048_576);
        assert_eq!(json["session_id"], serde_json::Value::Null);
        assert!(json["latency"].is_null());
    }

    #[test]
    fn test_missing_id_and_missing_file() {
        let dir = TempDir::new().unwrap();
        let storage = FileStorage::new(dir.path()).unwrap();
        assert!(matches!(
            storage.save_report(&report(None)),
            Err(StorageError::WriteFailed(_))
        ));
        assert!(matches!(
            storage.load_report(Uuid::new_v4()),
            Err(StorageError::ReadFailed(_))
        ));
    }
}
