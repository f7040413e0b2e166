use crate::buffer::Batch;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DeadLetterError {
    #[error("dead-letter io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("dead-letter encoding error: {0}")]
    Json(#[from] serde_json::Error),
}

/// One quarantined batch, as stored on disk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetterEntry {
    pub quarantined_at: DateTime<Utc>,
    pub reason: String,
    pub batch: Batch,
}

/// Append-only JSONL file of batches the endpoint rejected for good.
pub struct DeadLetterFile {
    path: PathBuf,
    file: Mutex<File>,
}

impl DeadLetterFile {
    pub fn open(path: &Path) -> Result<Self, DeadLetterError> {
        let io_err = |source| DeadLetterError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(io_err)?;

        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Durably append a batch. Only returns once the line is synced.
    pub fn quarantine(&self, batch: &Batch, reason: &str) -> Result<(), DeadLetterError> {
        let entry = DeadLetterEntry {
            quarantined_at: Utc::now(),
            reason: reason.to_string(),
            batch: batch.clone(),
        };
        let mut line = serde_json::to_vec(&entry)?;
        line.push(b'\n');

        let mut file = self.file.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        file.write_all(&line)
            .and_then(|_| file.sync_data())
            .map_err(|source| DeadLetterError::Io {
                path: self.path.clone(),
                source,
            })
    }

    /// Every entry in a dead-letter file
    pub fn read_all(path: &Path) -> Result<Vec<DeadLetterEntry>, DeadLetterError> {
        let io_err = |source| DeadLetterError::Io {
            path: path.to_path_buf(),
            source,
        };
        let reader = BufReader::new(File::open(path).map_err(io_err)?);
        let mut entries = Vec::new();
        for line in reader.lines() {
            let line = line.map_err(io_err)?;
            if !line.trim().is_empty() {
                entries.push(serde_json::from_str(&line)?);
            }
        }
        Ok(entries)
    }
}
