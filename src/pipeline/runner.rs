use crate::buffer::{BufferError, EventBuffer};
use crate::config::types::{Config, SourceType};
use crate::parser::{Normalizer, SetupError};
use crate::pipeline::channel::{create_channel, Receiver, Sender};
use crate::shipper::{
    run_worker, DeadLetterError, DeadLetterFile, DeliveryError, HttpTransport, Shipper,
    ShipperStats, Transport,
};
use crate::source::{
    expand_sources, FileReader, ReaderError, RawRecord, RecordSource, ResumePoint, SocketReader,
    SourceSpec,
};
use crate::status::{start_server, StatusState};
use crate::storage::{CheckpointError, CheckpointStore};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const STATS_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum RunError {
    #[error("checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),

    #[error("buffer error: {0}")]
    Buffer(#[from] BufferError),

    #[error("dead-letter error: {0}")]
    DeadLetter(#[from] DeadLetterError),

    #[error("delivery stopped: {0}")]
    Delivery(#[from] DeliveryError),

    #[error("source error: {0}")]
    Source(#[from] ReaderError),

    #[error("source '{source_id}' parser setup failed: {error}")]
    Parser {
        source_id: String,
        #[source]
        error: SetupError,
    },

    #[error("http client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("status server error: {0}")]
    Status(std::io::Error),

    #[error("task join error: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// What a run did, reported once it stops.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub sources: usize,
    pub events_ingested: u64,
    pub shipped: ShipperStats,
    /// Events written to overflow files because the grace period expired
    pub persisted: usize,
}

/// The whole agent: readers and normalizers per source, the shared buffer,
/// the shipper pool, and the optional status server.
pub struct Agent {
    config: Arc<Config>,
    transport: Arc<dyn Transport>,
}

impl Agent {
    /// Agent shipping over HTTP to the configured endpoint
    pub fn new(config: Config) -> Result<Self, RunError> {
        let transport = HttpTransport::new(&config.shipper, config.resolved_agent_id())?;
        Ok(Self::with_transport(config, Arc::new(transport)))
    }

    pub fn with_transport(config: Config, transport: Arc<dyn Transport>) -> Self {
        Self {
            config: Arc::new(config),
            transport,
        }
    }

    /// Run until every source ends or `shutdown` is cancelled, then drain
    /// the buffer within the grace period.
    pub async fn run(self, shutdown: CancellationToken) -> Result<RunSummary, RunError> {
        let config = self.config;

        let checkpoints = Arc::new(CheckpointStore::open(&config.checkpoint.dir)?);
        let dead_letter = Arc::new(DeadLetterFile::open(&config.dead_letter.path)?);
        let buffer = Arc::new(EventBuffer::new(config.buffer.clone()));
        let shipper = Arc::new(Shipper::new(
            self.transport,
            dead_letter,
            config.shipper.retry.clone(),
        ));

        let stop_reading = CancellationToken::new();
        let inputs_done = CancellationToken::new();
        let background = CancellationToken::new();

        let specs = expand_sources(&config.sources)?;
        let mut inputs: JoinSet<Result<u64, RunError>> = JoinSet::new();
        let mut started = 0;
        for spec in &specs {
            match start_source(spec, &config, &checkpoints, &buffer).await? {
                Some((source, normalizer)) => {
                    let (tx, rx) = create_channel(config.buffer.channel_capacity);
                    tokio::spawn(run_reader(source, tx, buffer.clone(), stop_reading.clone()));
                    inputs.spawn(run_normalizer(rx, normalizer, buffer.clone()));
                    started += 1;
                }
                None => continue,
            }
        }
        info!(sources = started, "Sources started");

        let mut workers = JoinSet::new();
        for worker in 0..config.shipper.concurrency {
            workers.spawn(run_worker(
                worker,
                buffer.clone(),
                shipper.clone(),
                checkpoints.clone(),
                config.buffer.flush_interval,
                inputs_done.clone(),
            ));
        }

        if let Some(status) = &config.status {
            let addr: SocketAddr = status.listen.parse().map_err(|e| {
                RunError::Status(std::io::Error::new(std::io::ErrorKind::InvalidInput, e))
            })?;
            let listener = TcpListener::bind(addr).await.map_err(RunError::Status)?;
            let state = Arc::new(StatusState {
                agent_id: config.resolved_agent_id(),
                start_time: Instant::now(),
                buffer: buffer.clone(),
                shipper: shipper.clone(),
                checkpoints: checkpoints.clone(),
            });
            let token = background.clone();
            tokio::spawn(async move {
                if let Err(e) = start_server(listener, state, token).await {
                    error!(error = %e, "Status server failed");
                }
            });
        }

        tokio::spawn(run_stats_heartbeat(
            buffer.clone(),
            shipper.clone(),
            background.clone(),
        ));

        let mut events_ingested = 0;
        let mut fatal: Option<RunError> = None;

        // Ingest until asked to stop, every source has ended, or delivery fails
        if !inputs.is_empty() {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        info!("Shutdown requested, stopping readers");
                        break;
                    }
                    Some(joined) = inputs.join_next() => {
                        match flatten(joined) {
                            Ok(count) => events_ingested += count,
                            Err(e) => {
                                fatal = Some(e);
                                break;
                            }
                        }
                        if inputs.is_empty() {
                            info!("All sources finished");
                            break;
                        }
                    }
                    Some(joined) = workers.join_next() => {
                        if let Err(e) = flatten(joined.map(|r| r.map_err(RunError::from))) {
                            fatal = Some(e);
                            break;
                        }
                    }
                }
            }
        } else {
            warn!("No sources running");
        }
        stop_reading.cancel();

        let mut persisted = 0;
        if fatal.is_none() {
            let grace = config.shutdown_grace;
            info!(grace_ms = grace.as_millis() as u64, "Draining buffer");

            let drain = async {
                while let Some(joined) = inputs.join_next().await {
                    events_ingested += flatten(joined)?;
                }
                inputs_done.cancel();
                while let Some(joined) = workers.join_next().await {
                    flatten(joined.map(|r| r.map_err(RunError::from)))?;
                }
                Ok::<(), RunError>(())
            };

            match tokio::time::timeout(grace, drain).await {
                Ok(Ok(())) => info!("Buffer drained"),
                Ok(Err(e)) => fatal = Some(e),
                Err(_) => warn!("Shutdown grace period expired"),
            }
        }

        inputs.shutdown().await;
        workers.shutdown().await;
        background.cancel();

        if !buffer.is_drained() {
            persisted = buffer.persist()?;
            warn!(events = persisted, "Undelivered events persisted to overflow files");
        }

        if let Some(e) = fatal {
            error!(error = %e, "Agent stopped on fatal error");
            return Err(e);
        }

        let summary = RunSummary {
            sources: started,
            events_ingested,
            shipped: shipper.stats(),
            persisted,
        };
        info!(
            events = summary.events_ingested,
            acked = summary.shipped.acked_events,
            quarantined = summary.shipped.quarantined_events,
            persisted = summary.persisted,
            "Agent stopped"
        );
        Ok(summary)
    }
}

/// Resolve a source's resume point and build its reader and normalizer.
/// A source that cannot be opened is logged and skipped.
async fn start_source(
    spec: &SourceSpec,
    config: &Config,
    checkpoints: &CheckpointStore,
    buffer: &EventBuffer,
) -> Result<Option<(Box<dyn RecordSource>, Normalizer)>, RunError> {
    let source_id = spec.source_id.clone();
    let checkpoint = checkpoints.load(&source_id)?;
    let recovered = buffer.recover_lane(
        &source_id,
        spec.replayable(),
        checkpoint.as_ref().map(|c| c.committed_sequence),
    )?;
    buffer.register(&source_id);

    let next_sequence = [
        checkpoint.as_ref().map(|c| c.committed_sequence + 1),
        recovered.last_sequence.map(|seq| seq + 1),
    ]
    .into_iter()
    .flatten()
    .max()
    .unwrap_or(0);

    let normalizer =
        Normalizer::new(source_id.clone(), &spec.config, next_sequence).map_err(|error| {
            RunError::Parser {
                source_id: source_id.clone(),
                error,
            }
        })?;

    let source: Box<dyn RecordSource> = match spec.config.source_type {
        SourceType::File => {
            let Some(path) = spec.path.clone() else {
                warn!(source_id = %source_id, "File source has no path, skipping");
                return Ok(None);
            };
            let resume = checkpoint.as_ref().map(|c| ResumePoint {
                offset: c.committed_offset,
                inode: c.inode,
            });
            info!(source_id = %source_id, path = %path.display(), "Starting file source");
            Box::new(FileReader::new(
                source_id,
                path,
                spec.config.read.clone(),
                resume,
            ))
        }
        SourceType::Socket => {
            let Some(listen) = spec.config.listen.as_deref() else {
                warn!(source_id = %source_id, "Socket source has no listen address, skipping");
                return Ok(None);
            };
            let start_offset = checkpoint
                .as_ref()
                .map(|c| c.committed_offset)
                .max(recovered.last_next_offset)
                .unwrap_or(0);
            match SocketReader::bind(
                source_id.clone(),
                listen,
                &spec.config.read,
                start_offset,
                config.buffer.channel_capacity,
            )
            .await
            {
                Ok(reader) => Box::new(reader),
                Err(e) => {
                    error!(source_id = %source_id, error = %e, "Socket source unavailable, skipping");
                    return Ok(None);
                }
            }
        }
    };

    Ok(Some((source, normalizer)))
}

/// Pull records while the buffer gate is open. Source errors end this
/// source only.
async fn run_reader(
    mut source: Box<dyn RecordSource>,
    output: Sender<RawRecord>,
    buffer: Arc<EventBuffer>,
    stop: CancellationToken,
) {
    let source_id = source.source_id().to_string();
    let mut records = 0u64;

    loop {
        tokio::select! {
            biased;
            _ = stop.cancelled() => break,
            _ = buffer.gate().wait_open() => {}
        }

        let next = tokio::select! {
            biased;
            _ = stop.cancelled() => break,
            next = source.next_record() => next,
        };

        match next {
            Ok(Some(record)) => {
                if output.send(record).await.is_err() {
                    break;
                }
                records += 1;
            }
            Ok(None) => {
                info!(source_id = %source_id, records, "Source reached end of stream");
                break;
            }
            Err(e) => {
                error!(source_id = %source_id, error = %e, "Source failed, stopping it");
                break;
            }
        }
    }

    debug!(source_id = %source_id, records, "Reader stopped");
}

/// Sequence and normalize records, then hand them to the buffer
async fn run_normalizer(
    mut input: Receiver<RawRecord>,
    mut normalizer: Normalizer,
    buffer: Arc<EventBuffer>,
) -> Result<u64, RunError> {
    let mut count = 0;
    while let Some(record) = input.recv().await {
        let event = normalizer.normalize(record);
        buffer.push(event).await?;
        count += 1;
    }
    debug!(
        source_id = %normalizer.source_id(),
        events = count,
        next_sequence = normalizer.next_sequence(),
        "Normalizer drained"
    );
    Ok(count)
}

async fn run_stats_heartbeat(
    buffer: Arc<EventBuffer>,
    shipper: Arc<Shipper>,
    stop: CancellationToken,
) {
    let mut interval = tokio::time::interval(STATS_INTERVAL);
    interval.tick().await;
    loop {
        tokio::select! {
            _ = stop.cancelled() => break,
            _ = interval.tick() => {
                let stats = buffer.stats();
                let shipped = shipper.stats();
                info!(
                    occupancy = stats.occupancy,
                    capacity = stats.capacity,
                    paused = stats.paused,
                    spilled = stats.spilled,
                    in_flight = stats.in_flight_batches,
                    acked = shipped.acked_events,
                    quarantined = shipped.quarantined_events,
                    requeued_batches = shipped.requeued_batches,
                    "Buffer stats"
                );
            }
        }
    }
}

fn flatten<T>(joined: Result<Result<T, RunError>, tokio::task::JoinError>) -> Result<T, RunError> {
    joined?
}
