use tokio::sync::watch;
use tracing::{info, warn};

/// Hysteresis gate between readers and the buffer.
///
/// Closes when occupancy reaches the high watermark and stays closed until
/// occupancy falls to the low watermark. Readers wait on the gate before
/// each read, so a slow downstream suspends them instead of growing memory.
pub struct BackpressureGate {
    high_watermark: usize,
    low_watermark: usize,
    paused: watch::Sender<bool>,
}

impl BackpressureGate {
    pub fn new(high_watermark: usize, low_watermark: usize) -> Self {
        let (paused, _) = watch::channel(false);
        Self {
            high_watermark,
            low_watermark,
            paused,
        }
    }

    /// Update the gate from the current occupancy
    pub fn observe(&self, occupancy: usize) {
        let paused = *self.paused.borrow();
        if !paused && occupancy >= self.high_watermark {
            warn!(
                occupancy,
                high_watermark = self.high_watermark,
                "Buffer above high watermark, pausing readers"
            );
            self.paused.send_replace(true);
        } else if paused && occupancy <= self.low_watermark {
            info!(
                occupancy,
                low_watermark = self.low_watermark,
                "Buffer below low watermark, resuming readers"
            );
            self.paused.send_replace(false);
        }
    }

    pub fn is_paused(&self) -> bool {
        *self.paused.borrow()
    }

    /// Resolve once readers may proceed
    pub async fn wait_open(&self) {
        let mut rx = self.paused.subscribe();
        // The sender lives as long as self, so this only fails if it is dropped
        let _ = rx.wait_for(|paused| !*paused).await;
    }

    pub fn high_watermark(&self) -> usize {
        self.high_watermark
    }

    pub fn low_watermark(&self) -> usize {
        self.low_watermark
    }
}
