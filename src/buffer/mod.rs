pub mod backpressure;
pub mod batch;
pub mod overflow;

use crate::config::types::{BatchConfig, BufferConfig};
use crate::parser::LogEvent;
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;
use tokio::sync::Notify;
use tokio::time::{sleep_until, Duration, Instant};

pub use backpressure::BackpressureGate;
pub use batch::Batch;
use batch::fits_batch;
use overflow::OverflowFile;

#[derive(Debug, Error)]
pub enum BufferError {
    #[error("overflow io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("corrupt overflow file {path}: {message}")]
    Corrupt { path: PathBuf, message: String },

    #[error("failed to encode event: {0}")]
    Encode(String),

    #[error("no batch in flight for source '{0}'")]
    NotInFlight(String),
}

impl BufferError {
    pub(crate) fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// How a shipper finished with a leased batch.
#[derive(Debug)]
pub enum Completion {
    /// Delivered or quarantined; the events leave the buffer for good
    Done,
    /// Delivery gave up for now; the events go back to the front of the lane
    Requeue(Vec<LogEvent>),
}

/// What a lane got back from a previous run's overflow file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveredLane {
    pub events: usize,
    pub last_sequence: Option<u64>,
    pub last_next_offset: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LaneStats {
    pub source_id: String,
    pub in_memory: usize,
    pub spilled: usize,
    pub in_flight: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct BufferStats {
    pub occupancy: usize,
    pub capacity: usize,
    pub high_watermark: usize,
    pub low_watermark: usize,
    pub paused: bool,
    pub spilled: usize,
    pub in_flight_batches: usize,
    pub total_spilled: u64,
    pub total_requeued: u64,
    pub lanes: Vec<LaneStats>,
}

struct Queued {
    arrival: u64,
    /// Encoded size, see `LogEvent::encoded_size`
    size: usize,
    event: LogEvent,
}

#[derive(Default)]
struct Lane {
    memory: VecDeque<Queued>,
    memory_bytes: usize,
    overflow: Option<OverflowFile>,
    in_flight: Option<Vec<LogEvent>>,
}

impl Lane {
    fn spilled(&self) -> usize {
        self.overflow.as_ref().map_or(0, |o| o.unread())
    }

    fn is_ready(&self, batch: &BatchConfig, force: bool) -> bool {
        if self.in_flight.is_some() {
            return false;
        }
        self.spilled() > 0
            || self.memory.len() >= batch.max_events
            || !fits_batch(self.memory_bytes, 0, batch.max_bytes)
            || (force && !self.memory.is_empty())
    }

    fn is_idle(&self) -> bool {
        self.memory.is_empty() && self.spilled() == 0 && self.in_flight.is_none()
    }

    fn take_memory(&mut self, batch: &BatchConfig) -> Vec<LogEvent> {
        let mut events = Vec::new();
        let mut bytes = 0;
        while events.len() < batch.max_events {
            let Some(front) = self.memory.front() else {
                break;
            };
            if !fits_batch(bytes, front.size, batch.max_bytes) {
                break;
            }
            let Some(queued) = self.memory.pop_front() else {
                break;
            };
            self.memory_bytes = self.memory_bytes.saturating_sub(queued.size);
            bytes += queued.size;
            events.push(queued.event);
        }
        events
    }

    fn overflow_mut(&mut self, dir: &Path, source_id: &str) -> Result<&mut OverflowFile, BufferError> {
        let overflow = match self.overflow.take() {
            Some(overflow) => overflow,
            None => OverflowFile::create(dir, source_id)?,
        };
        Ok(self.overflow.insert(overflow))
    }
}

#[derive(Default)]
struct BufferState {
    lanes: BTreeMap<String, Lane>,
    occupancy: usize,
    arrivals: u64,
    last_served: Option<String>,
    total_spilled: u64,
    total_requeued: u64,
}

/// Bounded, per-source FIFO between normalizers and shippers.
///
/// Each source has a lane made of an on-disk overflow segment followed by
/// an in-memory queue; events leave a lane in sequence order. Occupancy
/// counts in-memory events only and never exceeds `capacity`: a push into
/// a full buffer waits up to `spill_after`, then moves the oldest chunk of
/// memory to disk. Each lane has at most one batch leased at a time.
pub struct EventBuffer {
    config: BufferConfig,
    state: Mutex<BufferState>,
    gate: BackpressureGate,
    space: Notify,
    ready: Notify,
}

impl EventBuffer {
    pub fn new(config: BufferConfig) -> Self {
        let gate = BackpressureGate::new(config.high_watermark, config.low_watermark);
        Self {
            config,
            state: Mutex::new(BufferState::default()),
            gate,
            space: Notify::new(),
            ready: Notify::new(),
        }
    }

    pub fn gate(&self) -> &BackpressureGate {
        &self.gate
    }

    pub fn occupancy(&self) -> usize {
        self.lock().occupancy
    }

    /// Register a source so it appears in stats before its first event
    pub fn register(&self, source_id: &str) {
        self.lock().lanes.entry(source_id.to_string()).or_default();
    }

    /// Bring back events a previous run persisted for a source.
    ///
    /// Replayable sources re-read from their checkpoint, so their leftovers
    /// are discarded. Others reload everything after `committed_sequence`.
    pub fn recover_lane(
        &self,
        source_id: &str,
        replayable: bool,
        committed_sequence: Option<u64>,
    ) -> Result<RecoveredLane, BufferError> {
        let dir = &self.config.overflow_dir;
        if replayable {
            if OverflowFile::discard(dir, source_id)? {
                tracing::info!(source_id, "Discarded overflow file, source replays from checkpoint");
            }
            return Ok(RecoveredLane::default());
        }

        let Some((overflow, events)) = OverflowFile::recover(dir, source_id, committed_sequence)?
        else {
            return Ok(RecoveredLane::default());
        };

        let recovered = RecoveredLane {
            events: events.len(),
            last_sequence: events.last().map(|e| e.sequence_no),
            last_next_offset: events.last().map(|e| e.position.next_offset),
        };
        if recovered.events > 0 {
            tracing::info!(source_id, events = recovered.events, "Recovered overflow events");
        }

        self.lock()
            .lanes
            .entry(source_id.to_string())
            .or_default()
            .overflow = Some(overflow);
        self.ready.notify_waiters();
        Ok(recovered)
    }

    /// Add an event at the back of its source's lane.
    ///
    /// Waits while the buffer is at capacity. Once `spill_after` has passed
    /// without room, the oldest in-memory events are spilled to disk.
    pub async fn push(&self, event: LogEvent) -> Result<(), BufferError> {
        let deadline = Instant::now() + self.config.spill_after;
        loop {
            let space = self.space.notified();
            tokio::pin!(space);
            space.as_mut().enable();

            {
                let mut state = self.lock();
                if state.occupancy >= self.config.capacity && Instant::now() >= deadline {
                    self.spill_oldest(&mut state)?;
                }
                if state.occupancy < self.config.capacity {
                    let ready = self.enqueue(&mut state, event);
                    drop(state);
                    if ready {
                        self.ready.notify_waiters();
                    }
                    return Ok(());
                }
            }

            tokio::select! {
                _ = &mut space => {}
                _ = sleep_until(deadline) => {}
            }
        }
    }

    fn enqueue(&self, state: &mut BufferState, event: LogEvent) -> bool {
        state.arrivals += 1;
        let arrival = state.arrivals;
        let size = event.encoded_size();
        let lane = state.lanes.entry(event.source_id.clone()).or_default();
        lane.memory_bytes += size;
        lane.memory.push_back(Queued {
            arrival,
            size,
            event,
        });
        let ready = lane.is_ready(&self.config.batch, false);
        state.occupancy += 1;
        self.gate.observe(state.occupancy);
        ready
    }

    /// Move up to `spill_chunk` events from the lane with the oldest
    /// in-memory head onto that lane's overflow file.
    fn spill_oldest(&self, state: &mut BufferState) -> Result<(), BufferError> {
        let oldest = state
            .lanes
            .iter()
            .filter_map(|(id, lane)| lane.memory.front().map(|q| (q.arrival, id.clone())))
            .min();
        let Some((_, source_id)) = oldest else {
            return Ok(());
        };

        let lane = match state.lanes.get_mut(&source_id) {
            Some(lane) => lane,
            None => return Ok(()),
        };
        let count = self.config.spill_chunk.min(lane.memory.len());
        let chunk: Vec<LogEvent> = lane
            .memory
            .iter()
            .take(count)
            .map(|q| q.event.clone())
            .collect();

        lane.overflow_mut(&self.config.overflow_dir, &source_id)?
            .append(&chunk)?;
        let bytes: usize = lane.memory.drain(..count).map(|q| q.size).sum();
        lane.memory_bytes = lane.memory_bytes.saturating_sub(bytes);

        state.occupancy -= count;
        state.total_spilled += count as u64;
        self.gate.observe(state.occupancy);
        tracing::warn!(
            source_id = %source_id,
            events = count,
            occupancy = state.occupancy,
            "Buffer full, spilled oldest events to disk"
        );
        Ok(())
    }

    /// Lease the next ready batch, visiting lanes round-robin.
    ///
    /// With `force`, any lane holding in-memory events counts as ready.
    pub fn try_take_batch(&self, force: bool) -> Result<Option<Batch>, BufferError> {
        let mut state = self.lock();

        let ids: Vec<String> = state.lanes.keys().cloned().collect();
        let start = match &state.last_served {
            Some(last) => ids.iter().position(|id| id > last).unwrap_or(0),
            None => 0,
        };

        for id in ids[start..].iter().chain(ids[..start].iter()) {
            let Some(lane) = state.lanes.get_mut(id) else {
                continue;
            };
            if !lane.is_ready(&self.config.batch, force) {
                continue;
            }

            let batch_config = &self.config.batch;
            let (events, from_memory) = match lane.overflow.as_mut() {
                Some(overflow) if overflow.unread() > 0 => {
                    (overflow.take(batch_config.max_events, batch_config.max_bytes)?, 0)
                }
                _ => {
                    let events = lane.take_memory(batch_config);
                    let taken = events.len();
                    (events, taken)
                }
            };
            if events.is_empty() {
                continue;
            }

            lane.in_flight = Some(events.clone());
            state.occupancy -= from_memory;
            state.last_served = Some(id.clone());
            self.gate.observe(state.occupancy);
            drop(state);

            if from_memory > 0 {
                self.space.notify_waiters();
            }
            return Ok(Some(Batch::new(id.clone(), events)));
        }

        Ok(None)
    }

    /// Wait for a ready batch. If none becomes ready within `linger`,
    /// partial lanes are flushed. Returns `None` when the buffer has
    /// nothing to hand out.
    pub async fn next_batch(&self, linger: Duration) -> Result<Option<Batch>, BufferError> {
        let deadline = Instant::now() + linger;
        loop {
            let ready = self.ready.notified();
            tokio::pin!(ready);
            ready.as_mut().enable();

            if let Some(batch) = self.try_take_batch(false)? {
                return Ok(Some(batch));
            }
            if Instant::now() >= deadline {
                return self.try_take_batch(true);
            }

            tokio::select! {
                _ = &mut ready => {}
                _ = sleep_until(deadline) => {}
            }
        }
    }

    /// Release a lane's lease
    pub fn complete(&self, source_id: &str, completion: Completion) -> Result<(), BufferError> {
        let mut state = self.lock();
        let lane = state
            .lanes
            .get_mut(source_id)
            .ok_or_else(|| BufferError::NotInFlight(source_id.to_string()))?;
        if lane.in_flight.is_none() {
            return Err(BufferError::NotInFlight(source_id.to_string()));
        }

        let requeued = match completion {
            Completion::Done => 0,
            Completion::Requeue(events) => {
                let count = events.len();
                lane.overflow_mut(&self.config.overflow_dir, source_id)?
                    .prepend(&events)?;
                count
            }
        };
        lane.in_flight = None;
        state.total_requeued += requeued as u64;
        drop(state);

        if requeued > 0 {
            tracing::info!(source_id, events = requeued, "Requeued batch ahead of pending events");
        }
        self.ready.notify_waiters();
        Ok(())
    }

    /// True when nothing is queued, spilled or leased
    pub fn is_drained(&self) -> bool {
        let state = self.lock();
        state.lanes.values().all(Lane::is_idle)
    }

    /// Write everything still held, in-flight batches first, to each
    /// lane's overflow file. Used when the shutdown grace period expires.
    pub fn persist(&self) -> Result<usize, BufferError> {
        let mut state = self.lock();
        let dir = self.config.overflow_dir.clone();
        let mut persisted = 0;

        // Events leave memory only once they are on disk, so a failed
        // write leaves them for the next attempt.
        let BufferState {
            lanes, occupancy, ..
        } = &mut *state;
        for (source_id, lane) in lanes.iter_mut() {
            if lane.is_idle() {
                continue;
            }
            if let Some(in_flight) = lane.in_flight.take() {
                let written = lane
                    .overflow_mut(&dir, source_id)
                    .and_then(|overflow| overflow.prepend(&in_flight));
                if let Err(e) = written {
                    lane.in_flight = Some(in_flight);
                    return Err(e);
                }
            }
            let memory: Vec<LogEvent> = lane.memory.iter().map(|q| q.event.clone()).collect();
            lane.overflow_mut(&dir, source_id)?.append(&memory)?;
            *occupancy -= lane.memory.len();
            lane.memory.clear();
            lane.memory_bytes = 0;

            let overflow = lane.overflow_mut(&dir, source_id)?;
            persisted += overflow.unread();
            tracing::info!(
                source_id = %source_id,
                events = overflow.unread(),
                path = %overflow.path().display(),
                "Persisted undelivered events"
            );
        }

        self.gate.observe(state.occupancy);
        Ok(persisted)
    }

    pub fn stats(&self) -> BufferStats {
        let state = self.lock();
        let lanes: Vec<LaneStats> = state
            .lanes
            .iter()
            .map(|(id, lane)| LaneStats {
                source_id: id.clone(),
                in_memory: lane.memory.len(),
                spilled: lane.spilled(),
                in_flight: lane.in_flight.as_ref().map_or(0, Vec::len),
            })
            .collect();

        BufferStats {
            occupancy: state.occupancy,
            capacity: self.config.capacity,
            high_watermark: self.gate.high_watermark(),
            low_watermark: self.gate.low_watermark(),
            paused: self.gate.is_paused(),
            spilled: lanes.iter().map(|l| l.spilled).sum(),
            in_flight_batches: lanes.iter().filter(|l| l.in_flight > 0).count(),
            total_spilled: state.total_spilled,
            total_requeued: state.total_requeued,
            lanes,
        }
    }

    fn lock(&self) -> MutexGuard<'_, BufferState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::Encoding;
    use crate::parser::{Level, SourcePosition};
    use crate::shipper::transport::encode_batch;
    use chrono::Utc;
    use std::sync::Arc;

    fn config(dir: &Path, capacity: usize) -> BufferConfig {
        BufferConfig {
            capacity,
            high_watermark: capacity * 3 / 4,
            low_watermark: capacity / 4,
            spill_after: Duration::from_millis(50),
            spill_chunk: 2,
            overflow_dir: dir.to_path_buf(),
            batch: BatchConfig {
                max_events: 3,
                max_bytes: 1024 * 1024,
            },
            ..BufferConfig::default()
        }
    }

    fn event(source: &str, seq: u64) -> LogEvent {
        LogEvent {
            source_id: source.to_string(),
            sequence_no: seq,
            timestamp: Utc::now(),
            level: Level::Info,
            message: format!("{} {}", source, seq),
            attributes: Default::default(),
            position: SourcePosition {
                offset: seq,
                next_offset: seq + 1,
                inode: 1,
            },
        }
    }

    fn seqs(batch: &Batch) -> Vec<u64> {
        batch.events.iter().map(|e| e.sequence_no).collect()
    }

    #[tokio::test]
    async fn test_batches_preserve_order_and_lease() {
        let dir = tempfile::tempdir().unwrap();
        let buffer = EventBuffer::new(config(dir.path(), 100));
        for seq in 0..7 {
            buffer.push(event("a", seq)).await.unwrap();
        }

        let first = buffer.try_take_batch(false).unwrap().unwrap();
        assert_eq!(seqs(&first), vec![0, 1, 2]);
        // One batch per source in flight
        assert!(buffer.try_take_batch(true).unwrap().is_none());

        buffer.complete("a", Completion::Done).unwrap();
        let second = buffer.try_take_batch(false).unwrap().unwrap();
        assert_eq!(seqs(&second), vec![3, 4, 5]);
        buffer.complete("a", Completion::Done).unwrap();

        // A partial lane only ships when forced
        assert!(buffer.try_take_batch(false).unwrap().is_none());
        assert_eq!(seqs(&buffer.try_take_batch(true).unwrap().unwrap()), vec![6]);
    }

    #[tokio::test]
    async fn test_round_robin_across_sources() {
        let dir = tempfile::tempdir().unwrap();
        let buffer = EventBuffer::new(config(dir.path(), 100));
        for seq in 0..6 {
            buffer.push(event("a", seq)).await.unwrap();
            buffer.push(event("b", seq)).await.unwrap();
        }

        let first = buffer.try_take_batch(false).unwrap().unwrap();
        buffer.complete(&first.source_id, Completion::Done).unwrap();
        let second = buffer.try_take_batch(false).unwrap().unwrap();
        assert_ne!(first.source_id, second.source_id);
    }

    #[tokio::test]
    async fn test_requeue_goes_back_in_front() {
        let dir = tempfile::tempdir().unwrap();
        let buffer = EventBuffer::new(config(dir.path(), 100));
        for seq in 0..5 {
            buffer.push(event("a", seq)).await.unwrap();
        }

        let batch = buffer.try_take_batch(false).unwrap().unwrap();
        buffer
            .complete("a", Completion::Requeue(batch.events.clone()))
            .unwrap();

        let again = buffer.try_take_batch(false).unwrap().unwrap();
        assert_eq!(seqs(&again), vec![0, 1, 2]);
        assert_ne!(again.batch_id, batch.batch_id);
        buffer.complete("a", Completion::Done).unwrap();
        assert_eq!(seqs(&buffer.try_take_batch(true).unwrap().unwrap()), vec![3, 4]);
        assert_eq!(buffer.stats().total_requeued, 3);
    }

    fn sized_event(seq: u64, message: String) -> LogEvent {
        LogEvent {
            message,
            ..event("a", seq)
        }
    }

    #[tokio::test]
    async fn test_batch_body_stays_within_max_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config(dir.path(), 100);
        cfg.batch = BatchConfig {
            max_events: 10,
            max_bytes: 1000,
        };
        let buffer = EventBuffer::new(cfg);
        for seq in 0..4 {
            buffer.push(sized_event(seq, "x".repeat(200))).await.unwrap();
        }
        for seq in 4..8 {
            buffer.push(sized_event(seq, "\u{1}".repeat(40))).await.unwrap();
        }

        let mut shipped = Vec::new();
        let mut largest = 0;
        while let Some(batch) = buffer.try_take_batch(true).unwrap() {
            largest = largest.max(batch.len());
            for encoding in [Encoding::Ndjson, Encoding::Json] {
                let (body, _) = encode_batch(&batch, encoding).unwrap();
                assert!(
                    body.len() <= 1000,
                    "{} events encoded to {} bytes",
                    batch.len(),
                    body.len()
                );
            }
            shipped.extend(seqs(&batch));
            buffer.complete("a", Completion::Done).unwrap();
        }
        assert_eq!(shipped, (0..8).collect::<Vec<u64>>());
        assert!(largest >= 2);
    }

    #[tokio::test]
    async fn test_failed_persist_keeps_events() {
        let dir = tempfile::tempdir().unwrap();
        let buffer = EventBuffer::new(config(dir.path(), 100));
        for seq in 0..5 {
            buffer.push(event("sock", seq)).await.unwrap();
        }
        buffer.try_take_batch(false).unwrap().unwrap();

        let tmp = OverflowFile::path_for(dir.path(), "sock").with_extension("jsonl.tmp");
        std::fs::create_dir(&tmp).unwrap();
        assert!(buffer.persist().is_err());
        assert_eq!(buffer.stats().lanes[0].in_flight, 3);
        assert_eq!(buffer.occupancy(), 2);

        std::fs::remove_dir(&tmp).unwrap();
        assert_eq!(buffer.persist().unwrap(), 5);
        assert_eq!(buffer.occupancy(), 0);
    }

    #[tokio::test]
    async fn test_full_buffer_spills_after_deadline() {
        let dir = tempfile::tempdir().unwrap();
        let buffer = EventBuffer::new(config(dir.path(), 4));
        for seq in 0..4 {
            buffer.push(event("a", seq)).await.unwrap();
        }
        assert!(buffer.gate().is_paused());

        // Nothing drains, so this push spills the oldest chunk
        buffer.push(event("a", 4)).await.unwrap();
        let stats = buffer.stats();
        assert!(stats.occupancy <= 4);
        assert_eq!(stats.spilled, 2);
        assert_eq!(stats.total_spilled, 2);

        // Spilled events come out first, then memory, in order
        let mut all = Vec::new();
        while let Some(batch) = buffer.try_take_batch(true).unwrap() {
            all.extend(seqs(&batch));
            buffer.complete("a", Completion::Done).unwrap();
        }
        assert_eq!(all, vec![0, 1, 2, 3, 4]);
        assert!(buffer.is_drained());
    }

    #[tokio::test]
    async fn test_push_waits_for_space() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config(dir.path(), 3);
        cfg.spill_after = Duration::from_secs(30);
        let buffer = Arc::new(EventBuffer::new(cfg));
        for seq in 0..3 {
            buffer.push(event("a", seq)).await.unwrap();
        }

        let pusher = {
            let buffer = buffer.clone();
            tokio::spawn(async move { buffer.push(event("a", 3)).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!pusher.is_finished());

        buffer.try_take_batch(false).unwrap().unwrap();
        tokio::time::timeout(Duration::from_secs(1), pusher)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(buffer.stats().spilled, 0);
    }

    #[tokio::test]
    async fn test_next_batch_flushes_after_linger() {
        let dir = tempfile::tempdir().unwrap();
        let buffer = EventBuffer::new(config(dir.path(), 100));
        buffer.push(event("a", 0)).await.unwrap();

        let started = Instant::now();
        let batch = buffer
            .next_batch(Duration::from_millis(30))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(seqs(&batch), vec![0]);
        assert!(started.elapsed() >= Duration::from_millis(30));

        buffer.complete("a", Completion::Done).unwrap();
        assert!(buffer
            .next_batch(Duration::from_millis(10))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_persist_and_recover_socket_lane() {
        let dir = tempfile::tempdir().unwrap();
        {
            let buffer = EventBuffer::new(config(dir.path(), 100));
            for seq in 0..5 {
                buffer.push(event("sock", seq)).await.unwrap();
            }
            buffer.try_take_batch(false).unwrap().unwrap();
            assert_eq!(buffer.persist().unwrap(), 5);
            assert_eq!(buffer.occupancy(), 0);
        }

        let buffer = EventBuffer::new(config(dir.path(), 100));
        let recovered = buffer.recover_lane("sock", false, Some(1)).unwrap();
        assert_eq!(recovered.events, 3);
        assert_eq!(recovered.last_sequence, Some(4));
        assert_eq!(recovered.last_next_offset, Some(5));
        assert_eq!(seqs(&buffer.try_take_batch(false).unwrap().unwrap()), vec![2, 3, 4]);
    }

    #[tokio::test]
    async fn test_replayable_lane_discards_leftovers() {
        let dir = tempfile::tempdir().unwrap();
        {
            let buffer = EventBuffer::new(config(dir.path(), 100));
            buffer.push(event("file", 0)).await.unwrap();
            buffer.persist().unwrap();
        }
        let buffer = EventBuffer::new(config(dir.path(), 100));
        assert_eq!(buffer.recover_lane("file", true, None).unwrap().events, 0);
        assert!(buffer.is_drained());
        assert!(!OverflowFile::path_for(dir.path(), "file").exists());
    }
}
