use async_trait::async_trait;
use logferry::buffer::overflow::OverflowFile;
use logferry::buffer::Batch;
use logferry::config::parse::parse_config;
use logferry::config::Config;
use logferry::parser::{Level, LogEvent};
use logferry::pipeline::{Agent, RunError, RunSummary};
use logferry::shipper::{DeadLetterFile, ShipError, Transport};
use logferry::storage::CheckpointStore;
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

type Verdict = Box<dyn Fn(&Batch) -> Result<(), ShipError> + Send + Sync>;

/// Records every accepted event; rejects batches according to `verdict`
struct RecordingTransport {
    delivered: Mutex<Vec<LogEvent>>,
    verdict: Verdict,
}

impl RecordingTransport {
    fn new(verdict: Verdict) -> Arc<Self> {
        Arc::new(Self {
            delivered: Mutex::new(Vec::new()),
            verdict,
        })
    }

    fn accept_all() -> Arc<Self> {
        Self::new(Box::new(|_| Ok(())))
    }

    fn delivered_sequences(&self) -> Vec<u64> {
        self.delivered
            .lock()
            .unwrap()
            .iter()
            .map(|e| e.sequence_no)
            .collect()
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn send(&self, batch: &Batch) -> Result<(), ShipError> {
        (self.verdict)(batch)?;
        self.delivered
            .lock()
            .unwrap()
            .extend(batch.events.iter().cloned());
        Ok(())
    }
}

fn write_lines(path: &Path, range: std::ops::Range<u64>) {
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .unwrap();
    for n in range {
        writeln!(file, r#"{{"message":"event {}","n":{}}}"#, n, n).unwrap();
    }
}

fn config_yaml(dir: &Path, sources: &str, extra: &str) -> String {
    format!(
        r#"
sources:
{sources}
buffer:
  capacity: 1000
  high_watermark: 800
  low_watermark: 400
  overflow_dir: {dir}/overflow
  flush_interval: 5s
  batch:
    max_events: 20
shipper:
  endpoint: http://127.0.0.1:9/ingest
  concurrency: 2
  retry:
    max_attempts: 2
    initial_backoff: 1ms
    max_backoff: 2ms
checkpoint:
  dir: {dir}/checkpoints
dead_letter:
  path: {dir}/dead-letter.jsonl
{extra}
"#,
        sources = sources,
        dir = dir.display(),
        extra = extra,
    )
}

fn file_source(log: &Path) -> String {
    format!(
        "  app:\n    type: file\n    path: {}\n    read:\n      follow: false\n",
        log.display()
    )
}

#[tokio::test]
async fn test_permanent_rejection_is_quarantined_and_committed_past() {
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("app.log");
    write_lines(&log, 0..100);

    let config = parse_config(&config_yaml(dir.path(), &file_source(&log), "")).unwrap();
    let transport = RecordingTransport::new(Box::new(|batch: &Batch| {
        if batch.events.iter().any(|e| (40..60).contains(&e.sequence_no)) {
            Err(ShipError::Permanent("endpoint returned 400 Bad Request".to_string()))
        } else {
            Ok(())
        }
    }));

    let summary = Agent::with_transport(config, transport.clone())
        .run(CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(summary.events_ingested, 100);
    assert_eq!(summary.persisted, 0);
    assert_eq!(summary.shipped.quarantined_events, 20);

    let mut delivered = transport.delivered_sequences();
    delivered.sort();
    let expected: Vec<u64> = (0..40).chain(60..100).collect();
    assert_eq!(delivered, expected);

    let entries = DeadLetterFile::read_all(&dir.path().join("dead-letter.jsonl")).unwrap();
    assert_eq!(entries.len(), 1);
    let quarantined: Vec<u64> = entries[0].batch.events.iter().map(|e| e.sequence_no).collect();
    assert_eq!(quarantined, (40..60).collect::<Vec<u64>>());
    assert_eq!(entries[0].batch.events[0].message, "event 40");

    let store = CheckpointStore::open(&dir.path().join("checkpoints")).unwrap();
    let checkpoint = store.load("app").unwrap().unwrap();
    assert_eq!(checkpoint.committed_sequence, 99);
    assert_eq!(
        checkpoint.committed_offset,
        std::fs::metadata(&log).unwrap().len()
    );
}

#[tokio::test]
async fn test_restart_resumes_after_checkpoint() {
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("app.log");
    write_lines(&log, 0..50);
    let yaml = config_yaml(dir.path(), &file_source(&log), "");

    let first = RecordingTransport::accept_all();
    Agent::with_transport(parse_config(&yaml).unwrap(), first.clone())
        .run(CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(first.delivered_sequences().len(), 50);

    write_lines(&log, 50..60);
    {
        let mut file = std::fs::OpenOptions::new().append(true).open(&log).unwrap();
        writeln!(file, "this is not json").unwrap();
    }

    let second = RecordingTransport::accept_all();
    Agent::with_transport(parse_config(&yaml).unwrap(), second.clone())
        .run(CancellationToken::new())
        .await
        .unwrap();

    let delivered = second.delivered.lock().unwrap().clone();
    let sequences: Vec<u64> = delivered.iter().map(|e| e.sequence_no).collect();
    assert_eq!(sequences, (50..61).collect::<Vec<u64>>());
    assert_eq!(delivered[0].message, "event 50");

    let unparseable = &delivered[10];
    assert_eq!(unparseable.level, Level::Error);
    assert_eq!(unparseable.attributes["raw"], "this is not json");
}

#[tokio::test]
async fn test_sustained_failure_stalls_readers_and_persists_on_grace_expiry() {
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("app.log");
    write_lines(&log, 0..500);

    let mut source = file_source(&log);
    source = source.replace("follow: false", "follow: true");
    let yaml = config_yaml(dir.path(), &source, "shutdown_grace: 300ms")
        .replace("capacity: 1000", "capacity: 40")
        .replace("high_watermark: 800", "high_watermark: 30")
        .replace(
            "low_watermark: 400",
            "low_watermark: 10\n  spill_after: 10ms\n  spill_chunk: 10\n  channel_capacity: 4",
        );
    let config = parse_config(&yaml).unwrap();
    let transport = RecordingTransport::new(Box::new(|_| {
        Err(ShipError::Transient("endpoint returned 503".to_string()))
    }));
    let shutdown = CancellationToken::new();

    let agent = tokio::spawn(
        Agent::with_transport(config, transport.clone()).run(shutdown.clone()),
    );
    tokio::time::sleep(Duration::from_millis(300)).await;
    shutdown.cancel();

    let summary = tokio::time::timeout(Duration::from_secs(10), agent)
        .await
        .unwrap()
        .unwrap()
        .unwrap();

    // Readers stop at the gate instead of pulling the whole file into memory
    assert!(summary.events_ingested > 0);
    assert!(summary.events_ingested < 500);
    assert_eq!(summary.persisted as u64, summary.events_ingested);
    assert!(summary.shipped.requeued_batches > 0);
    assert!(transport.delivered_sequences().is_empty());

    let store = CheckpointStore::open(&dir.path().join("checkpoints")).unwrap();
    assert!(store.load("app").unwrap().is_none());
}

#[tokio::test]
async fn test_socket_source_flushes_on_shutdown() {
    let port = free_port();
    let dir = tempfile::tempdir().unwrap();
    let sources = format!(
        "  relay:\n    type: socket\n    listen: 127.0.0.1:{}\n    format: text\n    level_pattern: '(?P<level>WARN|ERROR)'\n",
        port
    );
    let config = parse_config(&config_yaml(dir.path(), &sources, "")).unwrap();
    let transport = RecordingTransport::accept_all();
    let shutdown = CancellationToken::new();

    let agent = tokio::spawn(
        Agent::with_transport(config, transport.clone()).run(shutdown.clone()),
    );

    let mut stream = loop {
        match tokio::net::TcpStream::connect(("127.0.0.1", port)).await {
            Ok(stream) => break stream,
            Err(_) => tokio::time::sleep(Duration::from_millis(10)).await,
        }
    };
    stream
        .write_all(b"first line\nWARN second line\nERROR third line\n")
        .await
        .unwrap();
    stream.flush().await.unwrap();
    drop(stream);

    // Give the normalizer time to buffer the lines, then stop
    tokio::time::sleep(Duration::from_millis(200)).await;
    shutdown.cancel();

    let summary = tokio::time::timeout(Duration::from_secs(10), agent)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(summary.persisted, 0);

    let delivered = transport.delivered.lock().unwrap().clone();
    let levels: Vec<Level> = delivered.iter().map(|e| e.level).collect();
    assert_eq!(levels, vec![Level::Info, Level::Warn, Level::Error]);
    assert_eq!(delivered[1].message, "WARN second line");
    assert_eq!(delivered[2].position.next_offset, 45);
}

fn socket_source(port: u16) -> String {
    format!(
        "  relay:\n    type: socket\n    listen: 127.0.0.1:{}\n    format: text\n",
        port
    )
}

fn free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

/// Send lines to a running agent's socket source and wait for it to stop
/// on its own.
async fn run_until_fatal(
    config: Config,
    transport: Arc<RecordingTransport>,
    port: u16,
    lines: &[u8],
) -> Result<RunSummary, RunError> {
    let agent = tokio::spawn(
        Agent::with_transport(config, transport).run(CancellationToken::new()),
    );

    let mut stream = loop {
        match tokio::net::TcpStream::connect(("127.0.0.1", port)).await {
            Ok(stream) => break stream,
            Err(_) => tokio::time::sleep(Duration::from_millis(10)).await,
        }
    };
    stream.write_all(lines).await.unwrap();
    stream.flush().await.unwrap();
    drop(stream);

    tokio::time::timeout(Duration::from_secs(10), agent)
        .await
        .unwrap()
        .unwrap()
}

fn overflow_lines(dir: &Path, source_id: &str) -> Vec<LogEvent> {
    let path = OverflowFile::path_for(&dir.join("overflow"), source_id);
    std::fs::read_to_string(path)
        .unwrap()
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect()
}

#[tokio::test]
async fn test_checkpoint_failure_stops_agent_and_persists_batch() {
    let port = free_port();
    let dir = tempfile::tempdir().unwrap();
    let yaml = config_yaml(dir.path(), &socket_source(port), "")
        .replace("flush_interval: 5s", "flush_interval: 50ms");
    let config = parse_config(&yaml).unwrap();

    // A directory where the checkpoint temp file goes makes every commit fail
    let store = CheckpointStore::open(&dir.path().join("checkpoints")).unwrap();
    std::fs::create_dir_all(store.path_for("relay").with_extension("json.tmp")).unwrap();

    let transport = RecordingTransport::accept_all();
    let result = run_until_fatal(config, transport.clone(), port, b"one\ntwo\nthree\n").await;

    match result {
        Err(RunError::Delivery(e)) => assert!(e.to_string().contains("checkpoint")),
        other => panic!("expected delivery error, got {:?}", other.map(|s| s.persisted)),
    }
    // The endpoint saw the first batch, but without a checkpoint it stays owed
    let delivered = transport.delivered_sequences();
    assert!(!delivered.is_empty());
    assert_eq!(delivered, (0..delivered.len() as u64).collect::<Vec<u64>>());

    let persisted = overflow_lines(dir.path(), "relay");
    let messages: Vec<&str> = persisted.iter().map(|e| e.message.as_str()).collect();
    assert_eq!(messages, vec!["one", "two", "three"]);
    assert!(store.load("relay").unwrap().is_none());
}

#[cfg(target_os = "linux")]
#[tokio::test]
async fn test_dead_letter_failure_stops_agent_and_persists_batch() {
    let port = free_port();
    let dir = tempfile::tempdir().unwrap();
    let yaml = config_yaml(dir.path(), &socket_source(port), "")
        .replace("flush_interval: 5s", "flush_interval: 50ms")
        .replace(
            &format!("path: {}/dead-letter.jsonl", dir.path().display()),
            "path: /dev/full",
        );
    let config = parse_config(&yaml).unwrap();
    assert_eq!(config.dead_letter.path, Path::new("/dev/full"));

    let transport = RecordingTransport::new(Box::new(|_| {
        Err(ShipError::Permanent("endpoint returned 422".to_string()))
    }));
    let result = run_until_fatal(config, transport.clone(), port, b"one\ntwo\nthree\n").await;

    match result {
        Err(RunError::Delivery(e)) => assert!(e.to_string().contains("dead-letter")),
        other => panic!("expected delivery error, got {:?}", other.map(|s| s.persisted)),
    }
    assert!(transport.delivered_sequences().is_empty());

    let persisted = overflow_lines(dir.path(), "relay");
    let sequences: Vec<u64> = persisted.iter().map(|e| e.sequence_no).collect();
    assert_eq!(sequences, vec![0, 1, 2]);

    let store = CheckpointStore::open(&dir.path().join("checkpoints")).unwrap();
    assert!(store.load("relay").unwrap().is_none());
}
