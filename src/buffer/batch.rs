use crate::parser::LogEvent;
use crate::storage::CommitPosition;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Body bytes beyond the events' ndjson lines when a batch is sent as a
/// JSON array: newlines become commas and the brackets add one byte.
const ARRAY_FRAMING: usize = 1;

/// Whether an event of `size` encoded bytes may join a batch whose events
/// already take `used` bytes. A lone event is always accepted.
pub(crate) fn fits_batch(used: usize, size: usize, max_bytes: usize) -> bool {
    used == 0 || used + size + ARRAY_FRAMING <= max_bytes
}

/// Ordered events from a single source, handed to exactly one shipper.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Batch {
    /// Identifies one delivery attempt sequence. A requeued batch is cut
    /// again with a new id, so it cannot serve for deduplication.
    pub batch_id: Uuid,
    pub source_id: String,
    /// Events in strictly increasing sequence order
    pub events: Vec<LogEvent>,
}

impl Batch {
    pub fn new(source_id: String, events: Vec<LogEvent>) -> Self {
        Self {
            batch_id: Uuid::new_v4(),
            source_id,
            events,
        }
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Checkpoint position once this batch is delivered or quarantined
    pub fn commit_position(&self) -> Option<CommitPosition> {
        self.events.last().map(|e| CommitPosition {
            offset: e.position.next_offset,
            sequence: e.sequence_no,
            inode: e.position.inode,
        })
    }
}
