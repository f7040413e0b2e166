use super::{RawRecord, ReaderError, RecordSource};
use crate::config::types::ReadConfig;
use crate::retry::Backoff;
use async_trait::async_trait;
use chrono::Utc;
use std::net::SocketAddr;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

type LineResult = Result<Line, ReaderError>;

/// A line received on a connection
struct Line {
    /// Leading bytes, terminator excluded, at most `max_line_bytes + 1`
    kept: Vec<u8>,
    /// Bytes the line took on the wire
    len: u64,
    terminated: bool,
}

/// Accepts TCP connections and funnels their lines into one record stream.
///
/// Offsets are a running byte count across all connections, continuing from
/// the offset this reader was started at. Records cannot be re-read.
pub struct SocketReader {
    source_id: String,
    local_addr: SocketAddr,
    offset: u64,
    max_line_bytes: usize,
    lines: mpsc::Receiver<LineResult>,
    accept_task: JoinHandle<()>,
}

impl SocketReader {
    /// Bind the listener, retrying with backoff while the address is unavailable.
    pub async fn bind(
        source_id: String,
        listen: &str,
        read_config: &ReadConfig,
        start_offset: u64,
        channel_capacity: usize,
    ) -> Result<Self, ReaderError> {
        let mut backoff = Backoff::new(&read_config.retry);
        let listener = loop {
            match TcpListener::bind(listen).await {
                Ok(listener) => break listener,
                Err(e) => match backoff.next_delay() {
                    Some(delay) => {
                        warn!(source_id = %source_id, listen, error = %e, "Bind failed, retrying");
                        tokio::time::sleep(delay).await;
                    }
                    None => {
                        return Err(ReaderError::SourceUnavailable {
                            source_id,
                            attempts: backoff.attempts(),
                            reason: e.to_string(),
                        })
                    }
                },
            }
        };

        let local_addr = listener.local_addr()?;
        info!(source_id = %source_id, addr = %local_addr, "Listening for log lines");

        let (tx, rx) = mpsc::channel(channel_capacity);
        let accept_task = tokio::spawn(accept_loop(
            source_id.clone(),
            listener,
            tx,
            read_config.clone(),
        ));

        Ok(Self {
            source_id,
            local_addr,
            offset: start_offset,
            max_line_bytes: read_config.max_line_bytes,
            lines: rx,
            accept_task,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

impl Drop for SocketReader {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

#[async_trait]
impl RecordSource for SocketReader {
    fn source_id(&self) -> &str {
        &self.source_id
    }

    async fn next_record(&mut self) -> Result<Option<RawRecord>, ReaderError> {
        let line = match self.lines.recv().await {
            Some(line) => line?,
            None => return Ok(None),
        };

        let byte_offset = self.offset;
        let next_offset = byte_offset + line.len;
        self.offset = next_offset;

        let kept = line.kept.len() as u64 + u64::from(line.terminated);
        let mut payload = line.kept;
        if line.terminated && payload.last() == Some(&b'\r') {
            payload.pop();
        }
        if kept < line.len || payload.len() > self.max_line_bytes {
            warn!(
                source_id = %self.source_id,
                offset = byte_offset,
                length = line.len,
                "Truncating oversized line"
            );
            payload.truncate(self.max_line_bytes);
        }

        Ok(Some(RawRecord {
            source_id: self.source_id.clone(),
            byte_offset,
            next_offset,
            inode: 0,
            payload,
            ingest_time: Utc::now(),
        }))
    }

    fn replayable(&self) -> bool {
        false
    }
}

async fn accept_loop(
    source_id: String,
    listener: TcpListener,
    tx: mpsc::Sender<LineResult>,
    read_config: ReadConfig,
) {
    let mut backoff = Backoff::new(&read_config.retry);
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                backoff.reset(&read_config.retry);
                debug!(source_id = %source_id, peer = %peer, "Accepted connection");
                tokio::spawn(read_connection(
                    source_id.clone(),
                    stream,
                    peer,
                    read_config.max_line_bytes.saturating_add(1),
                    tx.clone(),
                ));
            }
            Err(e) => match backoff.next_delay() {
                Some(delay) => {
                    warn!(source_id = %source_id, error = %e, "Accept failed, retrying");
                    tokio::time::sleep(delay).await;
                }
                None => {
                    let _ = tx
                        .send(Err(ReaderError::SourceUnavailable {
                            source_id: source_id.clone(),
                            attempts: backoff.attempts(),
                            reason: e.to_string(),
                        }))
                        .await;
                    return;
                }
            },
        }
    }
}

async fn read_connection(
    source_id: String,
    stream: TcpStream,
    peer: SocketAddr,
    keep: usize,
    tx: mpsc::Sender<LineResult>,
) {
    let mut reader = BufReader::new(stream);
    loop {
        match read_line_capped(&mut reader, keep).await {
            Ok(None) => break,
            Ok(Some(line)) => {
                // Blocks while the reader is paused by backpressure
                if tx.send(Ok(line)).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                warn!(source_id = %source_id, peer = %peer, error = %e, "Connection read failed");
                break;
            }
        }
    }
    debug!(source_id = %source_id, peer = %peer, "Connection closed");
}

/// Next line from `reader`, keeping at most `keep` bytes of it in memory.
/// `None` once the connection is closed with nothing pending.
async fn read_line_capped<R: AsyncBufRead + Unpin>(
    reader: &mut R,
    keep: usize,
) -> std::io::Result<Option<Line>> {
    let mut line = Line {
        kept: Vec::new(),
        len: 0,
        terminated: false,
    };
    loop {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            return Ok((line.len > 0).then_some(line));
        }

        let newline = available.iter().position(|&b| b == b'\n');
        let content = &available[..newline.unwrap_or(available.len())];
        let room = keep.saturating_sub(line.kept.len());
        line.kept.extend_from_slice(&content[..content.len().min(room)]);

        let used = newline.map_or(available.len(), |i| i + 1);
        reader.consume(used);
        line.len += used as u64;
        if newline.is_some() {
            line.terminated = true;
            return Ok(Some(line));
        }
    }
}
