use super::{RawRecord, ReaderError, RecordSource, ResumePoint};
use crate::config::types::{ReadConfig, ReadStart};
use crate::retry::Backoff;
use async_trait::async_trait;
use chrono::Utc;
use std::fs::{File, Metadata};
use std::io::{BufRead, BufReader, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// Tails a single file, tracking the byte offset of every record.
pub struct FileReader {
    source_id: String,
    path: PathBuf,
    read_config: ReadConfig,
    resume: Option<ResumePoint>,

    file: Option<BufReader<File>>,
    file_inode: Option<u64>,
    // Offset of the first byte of the current line
    offset: u64,
    // Start of the current line, at most `max_line_bytes + 1` bytes
    pending: Vec<u8>,
    // Bytes of the current line consumed so far, kept or not
    pending_len: u64,
}

impl FileReader {
    pub fn new(
        source_id: String,
        path: PathBuf,
        read_config: ReadConfig,
        resume: Option<ResumePoint>,
    ) -> Self {
        Self {
            source_id,
            path,
            read_config,
            resume,
            file: None,
            file_inode: None,
            offset: 0,
            pending: Vec::new(),
            pending_len: 0,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Offset of the next unread record
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Open the file and seek to the resume point (first open) or to the
    /// beginning (reopen after rotation).
    pub fn open(&mut self) -> std::io::Result<()> {
        let file = File::open(&self.path)?;
        let metadata = file.metadata()?;
        let inode = get_inode(&metadata);
        let len = metadata.len();
        let mut buf_reader = BufReader::new(file);

        let start = match self.resume.take() {
            Some(resume) if resume.inode != 0 && resume.inode != inode => {
                warn!(
                    source_id = %self.source_id,
                    stored_inode = resume.inode,
                    current_inode = inode,
                    "File replaced since last checkpoint, reading from the beginning"
                );
                0
            }
            Some(resume) if resume.offset > len => {
                warn!(
                    source_id = %self.source_id,
                    stored_offset = resume.offset,
                    file_len = len,
                    "File shorter than checkpoint, reading from the beginning"
                );
                0
            }
            Some(resume) => resume.offset,
            None if self.file_inode.is_some() => 0,
            None => match self.read_config.start {
                ReadStart::Beginning => 0,
                ReadStart::End => len,
            },
        };

        buf_reader.seek(SeekFrom::Start(start))?;
        debug!(source_id = %self.source_id, offset = start, inode, "Opened source file");

        self.file = Some(buf_reader);
        self.file_inode = Some(inode);
        self.offset = start;
        self.pending.clear();
        self.pending_len = 0;
        Ok(())
    }

    /// Open with capped exponential backoff, surfacing `SourceUnavailable`
    /// once the attempt budget is spent.
    async fn open_with_retry(&mut self) -> Result<(), ReaderError> {
        let mut backoff = Backoff::new(&self.read_config.retry);
        loop {
            match self.open() {
                Ok(()) => return Ok(()),
                Err(e) => match backoff.next_delay() {
                    Some(delay) => {
                        warn!(
                            source_id = %self.source_id,
                            path = %self.path.display(),
                            error = %e,
                            retry_in_ms = delay.as_millis() as u64,
                            "Source unavailable, retrying"
                        );
                        sleep(delay).await;
                    }
                    None => {
                        return Err(ReaderError::SourceUnavailable {
                            source_id: self.source_id.clone(),
                            attempts: backoff.attempts(),
                            reason: e.to_string(),
                        })
                    }
                },
            }
        }
    }

    fn take_pending(&mut self, terminated: bool) -> RawRecord {
        let mut payload = std::mem::take(&mut self.pending);
        let line_len = std::mem::take(&mut self.pending_len);
        let byte_offset = self.offset;
        let next_offset = byte_offset + line_len;
        self.offset = next_offset;

        let kept = payload.len() as u64 + u64::from(terminated);
        if terminated && payload.last() == Some(&b'\r') {
            payload.pop();
        }
        if kept < line_len || payload.len() > self.read_config.max_line_bytes {
            warn!(
                source_id = %self.source_id,
                offset = byte_offset,
                length = line_len,
                "Truncating oversized line"
            );
            payload.truncate(self.read_config.max_line_bytes);
        }

        RawRecord {
            source_id: self.source_id.clone(),
            byte_offset,
            next_offset,
            inode: self.file_inode.unwrap_or(0),
            payload,
            ingest_time: Utc::now(),
        }
    }

    /// What happened to the path since we opened it
    fn check_path(&self) -> std::io::Result<PathState> {
        match std::fs::metadata(&self.path) {
            Ok(metadata) => {
                let inode = get_inode(&metadata);
                if Some(inode) != self.file_inode {
                    Ok(PathState::Rotated)
                } else if metadata.len() < self.offset + self.pending_len {
                    Ok(PathState::Truncated)
                } else {
                    Ok(PathState::Same)
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(PathState::Missing),
            Err(e) => Err(e),
        }
    }

    /// Close the current handle so the next read reopens the path from 0.
    fn reset_for_reopen(&mut self) {
        self.file = None;
        self.offset = 0;
        self.pending.clear();
        self.pending_len = 0;
    }
}

enum PathState {
    Same,
    Rotated,
    Truncated,
    Missing,
}

#[async_trait]
impl RecordSource for FileReader {
    fn source_id(&self) -> &str {
        &self.source_id
    }

    async fn next_record(&mut self) -> Result<Option<RawRecord>, ReaderError> {
        loop {
            if self.file.is_none() {
                self.open_with_retry().await?;
            }

            // Room for a trailing '\r' on top of the payload limit
            let keep = self.read_config.max_line_bytes.saturating_add(1);
            let (consumed, terminated) = match self.file.as_mut() {
                Some(file) => read_line_capped(file, &mut self.pending, keep)?,
                None => (0, false),
            };
            self.pending_len += consumed as u64;

            if terminated {
                return Ok(Some(self.take_pending(true)));
            }

            // EOF, possibly with an unterminated line pending
            if !self.read_config.follow {
                if self.pending_len == 0 {
                    return Ok(None);
                }
                return Ok(Some(self.take_pending(false)));
            }

            match self.check_path()? {
                PathState::Same => {
                    sleep(self.read_config.poll_interval).await;
                }
                PathState::Rotated | PathState::Missing => {
                    // The old handle is fully drained; its unterminated tail
                    // will never complete.
                    info!(source_id = %self.source_id, path = %self.path.display(), "File rotated");
                    if self.pending_len > 0 {
                        let record = self.take_pending(false);
                        self.reset_for_reopen();
                        return Ok(Some(record));
                    }
                    self.reset_for_reopen();
                }
                PathState::Truncated => {
                    warn!(source_id = %self.source_id, "File truncated, reading from the beginning");
                    self.reset_for_reopen();
                }
            }
        }
    }

    fn replayable(&self) -> bool {
        true
    }
}

/// Consume bytes up to and including the next newline, appending at most
/// `keep` of them (terminator excluded) to `line`. Returns the number of
/// bytes consumed and whether the newline was reached before EOF.
fn read_line_capped<R: BufRead>(
    reader: &mut R,
    line: &mut Vec<u8>,
    keep: usize,
) -> std::io::Result<(usize, bool)> {
    let mut consumed = 0;
    loop {
        let available = match reader.fill_buf() {
            Ok(available) => available,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        if available.is_empty() {
            return Ok((consumed, false));
        }

        let newline = available.iter().position(|&b| b == b'\n');
        let content = &available[..newline.unwrap_or(available.len())];
        let room = keep.saturating_sub(line.len());
        line.extend_from_slice(&content[..content.len().min(room)]);

        let used = newline.map_or(available.len(), |i| i + 1);
        reader.consume(used);
        consumed += used;
        if newline.is_some() {
            return Ok((consumed, true));
        }
    }
}

#[cfg(unix)]
fn get_inode(metadata: &Metadata) -> u64 {
    use std::os::unix::fs::MetadataExt;
    metadata.ino()
}

#[cfg(not(unix))]
fn get_inode(metadata: &Metadata) -> u64 {
    // Creation time stands in for an inode
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    if let Ok(created) = metadata.created() {
        created.hash(&mut hasher);
    }
    hasher.finish()
}
