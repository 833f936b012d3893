//! The fork manager: owns the ring buffer, registers consumers, and tracks
//! the availability/fallback signal described in spec.md §4.2.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{info, warn};

use crate::error::{ForkError, ForkResult};
use crate::ring_buffer::{ConsumerCursor, Entry, RingBuffer};

/// Default consumer-unavailability threshold before fallback engages
/// (spec.md §4.2 `T_degrade`).
pub const DEFAULT_T_DEGRADE: Duration = Duration::from_secs(60);

/// One registered consumer's bookkeeping: its own cursor into the shared
/// ring buffer plus the availability latch its adapter flips.
pub struct Consumer {
    pub id: String,
    pub is_primary: bool,
    cursor: ConsumerCursor,
    available: AtomicBool,
    frames_forwarded: AtomicU64,
}

impl Consumer {
    /// Drain whatever is newly available for this consumer without
    /// blocking the caller (the consumer's own worker loop awaits
    /// [`RingBuffer::notified`] separately; this call never suspends).
    pub fn drain(&self, max: usize) -> Vec<Entry> {
        let entries = self.cursor.drain(max);
        self.frames_forwarded.fetch_add(entries.len() as u64, Ordering::Relaxed);
        entries
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::Release);
    }

    pub fn available(&self) -> bool {
        self.available.load(Ordering::Acquire)
    }

    /// `consumer_lag_ms` histogram input for this consumer.
    pub fn lag_ms(&self) -> Option<u64> {
        self.cursor.lag_ms()
    }

    pub fn frames_forwarded(&self) -> u64 {
        self.frames_forwarded.load(Ordering::Relaxed)
    }
}

/// Coordinates one RTP producer against N downstream consumers through a
/// shared [`RingBuffer`], publishing the `primary_available`/
/// `fallback_active` signal C3 reads to decide whether to route audio to
/// the AI service or play a pre-recorded fallback message.
pub struct ForkManager {
    buffer: Arc<RingBuffer>,
    consumers: DashMap<String, Arc<Consumer>>,
    primary_id: Mutex<Option<String>>,
    t_degrade: Duration,
    primary_unavailable_since: Mutex<Option<Instant>>,
    fallback_active: AtomicBool,
}

impl ForkManager {
    pub fn new(buffer_ms: u64, frame_duration_ms: u64, t_degrade: Duration) -> Self {
        Self {
            buffer: Arc::new(RingBuffer::new(buffer_ms, frame_duration_ms)),
            consumers: DashMap::new(),
            primary_id: Mutex::new(None),
            t_degrade,
            primary_unavailable_since: Mutex::new(None),
            fallback_active: AtomicBool::new(false),
        }
    }

    pub fn with_defaults(frame_duration_ms: u64) -> Self {
        Self::new(
            crate::ring_buffer::DEFAULT_RING_BUFFER_MS,
            frame_duration_ms,
            DEFAULT_T_DEGRADE,
        )
    }

    /// Called from the RTP receive callback. O(1), no suspension points, no
    /// allocation beyond the payload copy already made by the caller
    /// (spec.md §5: "The RTP callback has no suspension points").
    pub fn push(&self, payload: Bytes) -> u64 {
        self.buffer.push(payload)
    }

    /// Register a new consumer. `is_primary` marks the single consumer
    /// whose availability drives `fallback_active` (typically the AI
    /// session server's adapter; the transcription/indexing consumer is
    /// registered with `is_primary = false`).
    pub fn register_consumer(&self, id: impl Into<String>, is_primary: bool) -> ForkResult<Arc<Consumer>> {
        let id = id.into();
        if self.consumers.contains_key(&id) {
            return Err(ForkError::DuplicateConsumer(id));
        }
        let consumer = Arc::new(Consumer {
            cursor: ConsumerCursor::new(&self.buffer),
            id: id.clone(),
            is_primary,
            available: AtomicBool::new(false),
            frames_forwarded: AtomicU64::new(0),
        });
        if is_primary {
            *self.primary_id.lock() = Some(id.clone());
        }
        self.consumers.insert(id, consumer.clone());
        Ok(consumer)
    }

    pub fn unregister_consumer(&self, id: &str) -> ForkResult<()> {
        self.consumers
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| ForkError::UnknownConsumer(id.to_string()))
    }

    /// Suspension point for a consumer's worker loop (spec.md §5(d)).
    pub async fn notified(&self) {
        self.buffer.notified().await
    }

    /// Current `primary_available` gauge (spec.md §4.2).
    pub fn primary_available(&self) -> bool {
        let primary_id = self.primary_id.lock();
        match primary_id.as_deref() {
            Some(id) => self.consumers.get(id).map(|c| c.available()).unwrap_or(false),
            None => false,
        }
    }

    pub fn fallback_active(&self) -> bool {
        self.fallback_active.load(Ordering::Acquire)
    }

    /// Re-evaluate the fallback signal. Call this periodically (e.g. from a
    /// ticking background task) or whenever a consumer's availability
    /// changes; it is idempotent and cheap.
    pub fn tick_fallback(&self) {
        let available = self.primary_available();
        let mut since = self.primary_unavailable_since.lock();
        if available {
            if since.take().is_some() {
                info!("primary consumer available again; clearing fallback_active");
            }
            self.fallback_active.store(false, Ordering::Release);
            return;
        }

        let unavailable_since = *since.get_or_insert_with(Instant::now);
        let elapsed = unavailable_since.elapsed();
        if elapsed >= self.t_degrade && !self.fallback_active.swap(true, Ordering::AcqRel) {
            warn!(elapsed_secs = elapsed.as_secs(), "primary consumer unavailable past T_degrade, engaging fallback");
        }
    }

    pub fn buffer_fill_ratio(&self) -> f64 {
        self.buffer.fill_ratio()
    }

    pub fn frames_dropped_total(&self) -> u64 {
        self.buffer.frames_dropped()
    }

    pub fn consumer(&self, id: &str) -> Option<Arc<Consumer>> {
        self.consumers.get(id).map(|c| c.clone())
    }

    pub fn consumer_ids(&self) -> Vec<String> {
        self.consumers.iter().map(|e| e.key().clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn primary_unavailable_engages_fallback_after_t_degrade() {
        let mgr = ForkManager::new(80, 20, Duration::from_millis(0));
        mgr.register_consumer("ai-primary", true).unwrap();
        assert!(!mgr.primary_available());
        mgr.tick_fallback();
        assert!(mgr.fallback_active());
    }

    #[test]
    fn fallback_clears_once_primary_becomes_available() {
        let mgr = ForkManager::new(80, 20, Duration::from_millis(0));
        let consumer = mgr.register_consumer("ai-primary", true).unwrap();
        mgr.tick_fallback();
        assert!(mgr.fallback_active());

        consumer.set_available(true);
        mgr.tick_fallback();
        assert!(!mgr.fallback_active());
    }

    #[test]
    fn duplicate_consumer_registration_is_rejected() {
        let mgr = ForkManager::new(80, 20, DEFAULT_T_DEGRADE);
        mgr.register_consumer("dup", false).unwrap();
        assert!(mgr.register_consumer("dup", false).is_err());
    }

    #[test]
    fn independent_consumers_drain_independently() {
        let mgr = ForkManager::new(800, 20, DEFAULT_T_DEGRADE);
        let fast = mgr.register_consumer("fast", true).unwrap();
        let slow = mgr.register_consumer("slow", false).unwrap();
        for i in 0..3u8 {
            mgr.push(Bytes::from(vec![i; 4]));
        }
        assert_eq!(fast.drain(10).len(), 3);
        // slow consumer hasn't drained yet; its cursor is independent of fast's.
        assert_eq!(slow.drain(10).len(), 3);
        assert_eq!(fast.drain(10).len(), 0);
    }
}
