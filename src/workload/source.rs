//! Payload data sources of the sending side.
//!
//! A [`PayloadStore`] is prepared once per run, either from the user's file or from a
//! temporary file of random bytes. Every session opens its own [`DataSource`] cursor on it and
//! reads it cyclically through the session's read method.

use super::filter::ReadMethod;
use crate::configuration::types::SourceSpec;
use crate::error_handling::types::{ConfigError, ProtocolError};
use log::{debug, info};
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use std::io::{self, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::NamedTempFile;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

const RANDOM_CHUNK: usize = 1024 * 1024;
const READ_CHUNK: usize = 64 * 1024;

#[derive(Debug, Clone)]
pub struct PayloadStore {
    path: PathBuf,
    len: u64,
    /// Keeps a generated file alive until the last session is done with it.
    _temp: Option<Arc<NamedTempFile>>,
}

impl PayloadStore {
    pub async fn prepare(spec: &SourceSpec) -> Result<Self, ConfigError> {
        match spec {
            SourceSpec::File(path) => {
                let len = tokio::fs::metadata(path)
                    .await
                    .map_err(|e| {
                        ConfigError::IoError(io::Error::new(
                            e.kind(),
                            format!("{}: {}", path.display(), e),
                        ))
                    })?
                    .len();
                if len == 0 {
                    return Err(ConfigError::EmptySource(path.display().to_string()));
                }
                info!("[source: file {} ({} bytes)]", path.display(), len);
                Ok(Self {
                    path: path.clone(),
                    len,
                    _temp: None,
                })
            }
            SourceSpec::Random { size } => {
                if *size == 0 {
                    return Err(ConfigError::EmptySource("random data of 0 bytes".into()));
                }
                let size = *size;
                let temp = tokio::task::spawn_blocking(move || random_file(size))
                    .await
                    .map_err(|e| ConfigError::IoError(io::Error::new(io::ErrorKind::Other, e)))??;
                info!(
                    "[source: {} random bytes in {}]",
                    size,
                    temp.path().display()
                );
                Ok(Self {
                    path: temp.path().to_path_buf(),
                    len: size,
                    _temp: Some(Arc::new(temp)),
                })
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    /// Opens a fresh cursor at the start of the data.
    pub async fn open(&self) -> Result<DataSource, ProtocolError> {
        let file = File::open(&self.path).await?;
        Ok(DataSource {
            file,
            len: self.len,
            chunk: vec![0u8; READ_CHUNK],
        })
    }
}

fn random_file(size: u64) -> io::Result<NamedTempFile> {
    let mut temp = NamedTempFile::new()?;
    let mut rng = StdRng::from_entropy();
    let mut chunk = vec![0u8; RANDOM_CHUNK];
    let mut left = size;
    while left > 0 {
        let n = left.min(RANDOM_CHUNK as u64) as usize;
        rng.fill_bytes(&mut chunk[..n]);
        temp.write_all(&chunk[..n])?;
        left -= n as u64;
    }
    temp.flush()?;
    Ok(temp)
}

/// Cyclic reader over a payload store.
pub struct DataSource {
    file: File,
    len: u64,
    chunk: Vec<u8>,
}

impl DataSource {
    /// Replaces the contents of `out` with `want` filtered bytes and returns how many source
    /// bytes were read to produce them.
    ///
    /// # Errors
    ///
    /// [`ProtocolError::SourceExhausted`] when a full pass over the source yields no output,
    /// or when the file shrank to nothing after it was opened.
    pub async fn fill(
        &mut self,
        out: &mut Vec<u8>,
        want: usize,
        method: &mut dyn ReadMethod,
    ) -> Result<u64, ProtocolError> {
        out.clear();
        let mut raw = 0u64;
        let mut idle = 0u64;
        let mut rewound = false;

        while out.len() < want {
            let chunk = (want - out.len()).min(self.chunk.len());
            let n = self.file.read(&mut self.chunk[..chunk]).await?;
            if n == 0 {
                if rewound {
                    return Err(ProtocolError::SourceExhausted);
                }
                debug!("data source at EOF, rewinding");
                self.file.seek(SeekFrom::Start(0)).await?;
                rewound = true;
                continue;
            }
            rewound = false;
            raw += n as u64;

            let before = out.len();
            method.apply(&self.chunk[..n], out);
            if out.len() > before {
                idle = 0;
            } else {
                idle += n as u64;
                if idle >= self.len {
                    return Err(ProtocolError::SourceExhausted);
                }
            }
        }
        Ok(raw)
    }
}
