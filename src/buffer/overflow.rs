use super::batch::fits_batch;
use super::BufferError;
use crate::parser::LogEvent;
use sha2::{Digest, Sha256};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// On-disk tail of one source's lane: JSON lines read front to back.
///
/// Everything before `read_offset` has been handed out. The file is
/// truncated once fully read, and rewritten when events must go back in
/// front of the unread remainder.
#[derive(Debug)]
pub struct OverflowFile {
    path: PathBuf,
    read_offset: u64,
    unread: usize,
}

impl OverflowFile {
    pub fn path_for(dir: &Path, source_id: &str) -> PathBuf {
        let digest = Sha256::digest(source_id.as_bytes());
        let name: String = digest.iter().take(16).map(|b| format!("{:02x}", b)).collect();
        dir.join(format!("{}.jsonl", name))
    }

    /// A fresh, empty overflow file for a source. Replaces any leftover file.
    pub fn create(dir: &Path, source_id: &str) -> Result<Self, BufferError> {
        fs::create_dir_all(dir).map_err(|e| BufferError::io(dir, e))?;
        let path = Self::path_for(dir, source_id);
        File::create(&path).map_err(|e| BufferError::io(&path, e))?;
        Ok(Self {
            path,
            read_offset: 0,
            unread: 0,
        })
    }

    /// Reload events persisted by an earlier run, keeping those with a
    /// sequence number above `after_sequence`. Torn or unreadable lines
    /// are skipped with a warning. Returns `None` if no file exists.
    pub fn recover(
        dir: &Path,
        source_id: &str,
        after_sequence: Option<u64>,
    ) -> Result<Option<(Self, Vec<LogEvent>)>, BufferError> {
        let path = Self::path_for(dir, source_id);
        let file = match File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(BufferError::io(&path, e)),
        };

        let mut events = Vec::new();
        for (index, line) in BufReader::new(file).lines().enumerate() {
            let line = line.map_err(|e| BufferError::io(&path, e))?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<LogEvent>(&line) {
                Ok(event) if after_sequence.map_or(true, |seq| event.sequence_no > seq) => {
                    events.push(event)
                }
                Ok(_) => {}
                Err(e) => tracing::warn!(
                    source_id,
                    path = %path.display(),
                    line = index + 1,
                    error = %e,
                    "Skipping unreadable overflow line"
                ),
            }
        }

        let mut overflow = Self {
            path,
            read_offset: 0,
            unread: 0,
        };
        overflow.rewrite(&events, &[])?;
        Ok(Some((overflow, events)))
    }

    /// Remove a leftover overflow file, if any
    pub fn discard(dir: &Path, source_id: &str) -> Result<bool, BufferError> {
        let path = Self::path_for(dir, source_id);
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(BufferError::io(&path, e)),
        }
    }

    pub fn unread(&self) -> usize {
        self.unread
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append events behind the unread remainder
    pub fn append(&mut self, events: &[LogEvent]) -> Result<(), BufferError> {
        if events.is_empty() {
            return Ok(());
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| BufferError::io(&self.path, e))?;
        let body = encode_lines(events)?;
        file.write_all(&body)
            .and_then(|_| file.sync_data())
            .map_err(|e| BufferError::io(&self.path, e))?;
        self.unread += events.len();
        Ok(())
    }

    /// Put events back ahead of everything unread
    pub fn prepend(&mut self, events: &[LogEvent]) -> Result<(), BufferError> {
        let remainder = self.peek_remaining()?;
        self.rewrite(events, &remainder)
    }

    /// Hand out up to `max_events` unread events whose lines fit in
    /// `max_bytes` (a single oversized event is still handed out alone).
    pub fn take(&mut self, max_events: usize, max_bytes: usize) -> Result<Vec<LogEvent>, BufferError> {
        let mut events = Vec::new();
        if self.unread == 0 {
            return Ok(events);
        }

        let mut reader = self.reader_at_cursor()?;
        let mut bytes = 0;
        let mut line = String::new();
        while events.len() < max_events && self.unread > 0 {
            line.clear();
            let read = self.read_event_line(&mut reader, &mut line)?;
            if !fits_batch(bytes, read, max_bytes) {
                break;
            }
            let event = self.decode(&line)?;

            self.read_offset += read as u64;
            self.unread -= 1;
            bytes += read;
            events.push(event);
        }

        if self.unread == 0 {
            self.truncate()?;
        }
        Ok(events)
    }

    fn reader_at_cursor(&self) -> Result<BufReader<File>, BufferError> {
        let mut file = File::open(&self.path).map_err(|e| BufferError::io(&self.path, e))?;
        file.seek(SeekFrom::Start(self.read_offset))
            .map_err(|e| BufferError::io(&self.path, e))?;
        Ok(BufReader::new(file))
    }

    fn read_event_line(
        &self,
        reader: &mut BufReader<File>,
        line: &mut String,
    ) -> Result<usize, BufferError> {
        let read = reader
            .read_line(line)
            .map_err(|e| BufferError::io(&self.path, e))?;
        if read == 0 {
            return Err(BufferError::Corrupt {
                path: self.path.clone(),
                message: format!("expected {} more events", self.unread),
            });
        }
        Ok(read)
    }

    fn decode(&self, line: &str) -> Result<LogEvent, BufferError> {
        serde_json::from_str(line.trim_end()).map_err(|e| BufferError::Corrupt {
            path: self.path.clone(),
            message: e.to_string(),
        })
    }

    /// The unread events, leaving the file and cursor untouched
    fn peek_remaining(&self) -> Result<Vec<LogEvent>, BufferError> {
        let mut events = Vec::with_capacity(self.unread);
        if self.unread == 0 {
            return Ok(events);
        }
        let mut reader = self.reader_at_cursor()?;
        let mut line = String::new();
        while events.len() < self.unread {
            line.clear();
            self.read_event_line(&mut reader, &mut line)?;
            events.push(self.decode(&line)?);
        }
        Ok(events)
    }

    fn truncate(&mut self) -> Result<(), BufferError> {
        File::create(&self.path).map_err(|e| BufferError::io(&self.path, e))?;
        self.read_offset = 0;
        self.unread = 0;
        Ok(())
    }

    /// Replace the file with `front` followed by `back`, via a synced temp file
    fn rewrite(&mut self, front: &[LogEvent], back: &[LogEvent]) -> Result<(), BufferError> {
        let tmp = self.path.with_extension("jsonl.tmp");
        let mut body = encode_lines(front)?;
        body.extend(encode_lines(back)?);

        let mut file = File::create(&tmp).map_err(|e| BufferError::io(&tmp, e))?;
        file.write_all(&body)
            .and_then(|_| file.sync_all())
            .map_err(|e| BufferError::io(&tmp, e))?;
        drop(file);
        fs::rename(&tmp, &self.path).map_err(|e| BufferError::io(&self.path, e))?;

        self.read_offset = 0;
        self.unread = front.len() + back.len();
        Ok(())
    }
}

fn encode_lines(events: &[LogEvent]) -> Result<Vec<u8>, BufferError> {
    let mut body = Vec::new();
    for event in events {
        serde_json::to_writer(&mut body, event).map_err(|e| BufferError::Encode(e.to_string()))?;
        body.push(b'\n');
    }
    Ok(body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::{Level, SourcePosition};
    use chrono::Utc;
    use std::collections::BTreeMap;

    fn event(seq: u64) -> LogEvent {
        LogEvent {
            source_id: "sock".to_string(),
            sequence_no: seq,
            timestamp: Utc::now(),
            level: Level::Info,
            message: format!("event {}", seq),
            attributes: BTreeMap::new(),
            position: SourcePosition {
                offset: seq * 10,
                next_offset: seq * 10 + 10,
                inode: 0,
            },
        }
    }

    fn seqs(events: &[LogEvent]) -> Vec<u64> {
        events.iter().map(|e| e.sequence_no).collect()
    }

    #[test]
    fn test_append_take_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let mut overflow = OverflowFile::create(dir.path(), "sock").unwrap();
        overflow.append(&(0..5).map(event).collect::<Vec<_>>()).unwrap();
        overflow.append(&[event(5)]).unwrap();
        assert_eq!(overflow.unread(), 6);

        assert_eq!(seqs(&overflow.take(4, usize::MAX).unwrap()), vec![0, 1, 2, 3]);
        assert_eq!(seqs(&overflow.take(4, usize::MAX).unwrap()), vec![4, 5]);
        assert_eq!(overflow.unread(), 0);
        // Drained files are truncated
        assert_eq!(fs::metadata(overflow.path()).unwrap().len(), 0);
    }

    #[test]
    fn test_take_respects_byte_limit() {
        let dir = tempfile::tempdir().unwrap();
        let mut overflow = OverflowFile::create(dir.path(), "sock").unwrap();
        let events: Vec<LogEvent> = (0..4).map(event).collect();
        overflow.append(&events).unwrap();
        let limit = events[0].encoded_size() + events[1].encoded_size() + 1;

        // Two lines plus array framing fit; a third would not
        let taken = overflow.take(10, limit).unwrap();
        assert_eq!(seqs(&taken), vec![0, 1]);

        // An event larger than the limit still goes out on its own
        assert_eq!(seqs(&overflow.take(10, 1).unwrap()), vec![2]);
        assert_eq!(overflow.unread(), 1);
    }

    #[test]
    fn test_prepend_goes_ahead_of_unread() {
        let dir = tempfile::tempdir().unwrap();
        let mut overflow = OverflowFile::create(dir.path(), "sock").unwrap();
        overflow.append(&(0..6).map(event).collect::<Vec<_>>()).unwrap();

        let taken = overflow.take(3, usize::MAX).unwrap();
        overflow.prepend(&taken).unwrap();
        assert_eq!(overflow.unread(), 6);
        assert_eq!(
            seqs(&overflow.take(10, usize::MAX).unwrap()),
            vec![0, 1, 2, 3, 4, 5]
        );
    }

    #[test]
    fn test_failed_prepend_keeps_unread_events() {
        let dir = tempfile::tempdir().unwrap();
        let mut overflow = OverflowFile::create(dir.path(), "sock").unwrap();
        overflow.append(&(0..6).map(event).collect::<Vec<_>>()).unwrap();
        let taken = overflow.take(3, usize::MAX).unwrap();

        // A directory in the way makes the rewrite fail
        let tmp = overflow.path().with_extension("jsonl.tmp");
        fs::create_dir(&tmp).unwrap();
        assert!(overflow.prepend(&taken).is_err());
        assert_eq!(overflow.unread(), 3);

        fs::remove_dir(&tmp).unwrap();
        overflow.prepend(&taken).unwrap();
        assert_eq!(
            seqs(&overflow.take(10, usize::MAX).unwrap()),
            vec![0, 1, 2, 3, 4, 5]
        );
    }

    #[test]
    fn test_recover_filters_committed_and_torn_lines() {
        let dir = tempfile::tempdir().unwrap();
        let mut overflow = OverflowFile::create(dir.path(), "sock").unwrap();
        overflow.append(&(0..5).map(event).collect::<Vec<_>>()).unwrap();
        let mut file = OpenOptions::new().append(true).open(overflow.path()).unwrap();
        file.write_all(b"{\"source_id\":\"so").unwrap();
        drop(overflow);

        let (mut recovered, events) = OverflowFile::recover(dir.path(), "sock", Some(1))
            .unwrap()
            .unwrap();
        assert_eq!(seqs(&events), vec![2, 3, 4]);
        assert_eq!(recovered.unread(), 3);
        assert_eq!(seqs(&recovered.take(10, usize::MAX).unwrap()), vec![2, 3, 4]);
    }

    #[test]
    fn test_recover_missing_and_discard() {
        let dir = tempfile::tempdir().unwrap();
        assert!(OverflowFile::recover(dir.path(), "x", None).unwrap().is_none());
        OverflowFile::create(dir.path(), "x").unwrap();
        assert!(OverflowFile::discard(dir.path(), "x").unwrap());
        assert!(!OverflowFile::discard(dir.path(), "x").unwrap());
    }
}
