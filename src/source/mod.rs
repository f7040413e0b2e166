pub mod reader;
pub mod socket;

use crate::config::types::{SourceConfig, SourceType};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use thiserror::Error;

pub use reader::FileReader;
pub use socket::SocketReader;

#[derive(Debug, Error)]
pub enum ReaderError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("source '{source_id}' unavailable after {attempts} attempts: {reason}")]
    SourceUnavailable {
        source_id: String,
        attempts: u32,
        reason: String,
    },

    #[error("invalid glob pattern '{pattern}': {message}")]
    Glob { pattern: String, message: String },

    #[error("source id '{0}' is produced by more than one source")]
    DuplicateSource(String),
}

/// One line read from a source, before parsing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRecord {
    pub source_id: String,
    /// Offset of the first byte of the record
    pub byte_offset: u64,
    /// Offset just past the record and its terminator
    pub next_offset: u64,
    /// Inode of the file the record came from (0 for sockets)
    pub inode: u64,
    pub payload: Vec<u8>,
    pub ingest_time: DateTime<Utc>,
}

/// Where a source resumes after a restart.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResumePoint {
    pub offset: u64,
    pub inode: u64,
}

/// A lazily read sequence of raw records.
#[async_trait]
pub trait RecordSource: Send {
    fn source_id(&self) -> &str;

    /// Next record, or `None` at end of stream
    async fn next_record(&mut self) -> Result<Option<RawRecord>, ReaderError>;

    /// Whether records can be re-read from the source after a restart
    fn replayable(&self) -> bool;
}

/// A configured source resolved to a concrete input.
#[derive(Debug, Clone)]
pub struct SourceSpec {
    pub source_id: String,
    pub name: String,
    pub path: Option<PathBuf>,
    pub config: SourceConfig,
}

impl SourceSpec {
    pub fn replayable(&self) -> bool {
        self.config.source_type == SourceType::File
    }
}

/// Expand configured sources into concrete inputs. A file path containing
/// glob metacharacters yields one source per matching file, named
/// `<name>:<path>`; anything else keeps its configured name.
pub fn expand_sources(
    sources: &HashMap<String, SourceConfig>,
) -> Result<Vec<SourceSpec>, ReaderError> {
    let mut names: Vec<&String> = sources.keys().collect();
    names.sort();

    let mut specs = Vec::new();
    for name in names {
        let config = &sources[name];
        match (config.source_type, &config.path) {
            (SourceType::File, Some(path)) if is_glob(path) => {
                let pattern = path.to_string_lossy().to_string();
                let matches = glob::glob(&pattern).map_err(|e| ReaderError::Glob {
                    pattern: pattern.clone(),
                    message: e.to_string(),
                })?;

                let mut found = 0;
                for entry in matches {
                    let file = entry.map_err(|e| ReaderError::Glob {
                        pattern: pattern.clone(),
                        message: e.to_string(),
                    })?;
                    if !file.is_file() {
                        continue;
                    }
                    found += 1;
                    specs.push(SourceSpec {
                        source_id: format!("{}:{}", name, file.display()),
                        name: name.clone(),
                        path: Some(file),
                        config: config.clone(),
                    });
                }

                if found == 0 {
                    tracing::warn!(source = %name, pattern = %pattern, "Glob matched no files");
                }
            }
            _ => specs.push(SourceSpec {
                source_id: name.clone(),
                name: name.clone(),
                path: config.path.clone(),
                config: config.clone(),
            }),
        }
    }

    let duplicate = {
        let mut seen = HashSet::new();
        specs
            .iter()
            .find(|s| !seen.insert(s.source_id.as_str()))
            .map(|s| s.source_id.clone())
    };
    if let Some(id) = duplicate {
        return Err(ReaderError::DuplicateSource(id));
    }

    Ok(specs)
}

fn is_glob(path: &std::path::Path) -> bool {
    path.to_string_lossy()
        .chars()
        .any(|c| matches!(c, '*' | '?' | '['))
}
