//! The bounded ring buffer at the heart of the fork manager (spec.md §3
//! `RingBuffer[T]`, §4.2). One producer pushes audio frames in O(1) with no
//! allocation on the steady-state path; any number of consumers drain from
//! their own independent logical cursor.
//!
//! Modeled on the teacher's `rtp-core::buffer` module (an RAII/semaphore
//! based buffer manager), generalized here to a bounded FIFO with drop-oldest
//! overflow instead of backpressure, since the producer side (the RTP
//! receive callback) must never block (spec.md §5).

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::Notify;

/// Default ring buffer depth, in milliseconds of audio (spec.md §3 `D_buf`).
pub const DEFAULT_RING_BUFFER_MS: u64 = 500;

/// One element held by the ring buffer: a frame's payload, its
/// monotonically increasing sequence number, and its arrival time
/// (spec.md §3 `RingBuffer[T]`).
#[derive(Debug, Clone)]
pub struct Entry {
    pub seq: u64,
    pub arrival: Instant,
    pub payload: Bytes,
}

struct Inner {
    buf: VecDeque<Entry>,
    next_seq: u64,
    /// Sequence number of the oldest entry still held (used by consumers
    /// whose cursor has fallen behind the retained window to catch up
    /// without re-reading already-evicted frames).
    window_start_seq: u64,
}

/// A bounded, power-of-two-sized FIFO of audio frames with drop-oldest
/// overflow. `push` never blocks and never allocates beyond the initial
/// `VecDeque` capacity (it reuses the freed slot from the popped front
/// element on overflow).
pub struct RingBuffer {
    capacity: usize,
    inner: Mutex<Inner>,
    notify: Notify,
    frames_pushed: AtomicU64,
    frames_dropped: AtomicU64,
}

impl RingBuffer {
    /// Build a ring buffer sized to hold `buffer_ms` milliseconds of audio
    /// at the given `frame_duration_ms`, rounded up to the next power of
    /// two frame slots (spec.md §4.2).
    pub fn new(buffer_ms: u64, frame_duration_ms: u64) -> Self {
        let frames_needed = ((buffer_ms + frame_duration_ms - 1) / frame_duration_ms).max(1) as usize;
        let capacity = frames_needed.next_power_of_two();
        Self {
            capacity,
            inner: Mutex::new(Inner {
                buf: VecDeque::with_capacity(capacity),
                next_seq: 0,
                window_start_seq: 0,
            }),
            notify: Notify::new(),
            frames_pushed: AtomicU64::new(0),
            frames_dropped: AtomicU64::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Push a frame. O(1), never blocks. On overflow the oldest frame is
    /// evicted and `frames_dropped` is incremented (spec.md §3 invariant).
    pub fn push(&self, payload: Bytes) -> u64 {
        let seq = {
            let mut inner = self.inner.lock();
            let seq = inner.next_seq;
            inner.next_seq += 1;
            if inner.buf.len() >= self.capacity {
                inner.buf.pop_front();
                inner.window_start_seq = inner
                    .buf
                    .front()
                    .map(|e| e.seq)
                    .unwrap_or(inner.next_seq);
                self.frames_dropped.fetch_add(1, Ordering::Relaxed);
            }
            inner.buf.push_back(Entry { seq, arrival: Instant::now(), payload });
            seq
        };
        self.frames_pushed.fetch_add(1, Ordering::Relaxed);
        self.notify.notify_waiters();
        seq
    }

    /// Drain up to `max` frames with `seq >= cursor`, returning them plus
    /// the cursor value to resume from. If `cursor` has fallen behind the
    /// retained window (the consumer was too slow and frames were
    /// overflow-dropped), this jumps forward to the oldest retained frame
    /// rather than replaying frames that no longer exist.
    pub fn drain(&self, cursor: u64, max: usize) -> (Vec<Entry>, u64) {
        let inner = self.inner.lock();
        let start = cursor.max(inner.window_start_seq);
        let out: Vec<Entry> = inner
            .buf
            .iter()
            .filter(|e| e.seq >= start)
            .take(max)
            .cloned()
            .collect();
        let next_cursor = out.last().map(|e| e.seq + 1).unwrap_or(start);
        (out, next_cursor)
    }

    /// Wait until new data may be available (or the notification is
    /// otherwise woken); used by a consumer's worker loop suspension point
    /// (spec.md §5).
    pub async fn notified(&self) {
        self.notify.notified().await
    }

    pub fn frames_pushed(&self) -> u64 {
        self.frames_pushed.load(Ordering::Relaxed)
    }

    pub fn frames_dropped(&self) -> u64 {
        self.frames_dropped.load(Ordering::Relaxed)
    }

    /// Current depth (frames currently retained), used together with
    /// `frames_pushed`/`frames_dropped` to check property P4:
    /// `sum(popped per consumer) + frames_dropped == frames_pushed - depth`.
    pub fn depth(&self) -> usize {
        self.inner.lock().buf.len()
    }

    /// `buffer_fill_ratio` gauge (spec.md §4.2 observability).
    pub fn fill_ratio(&self) -> f64 {
        self.depth() as f64 / self.capacity as f64
    }
}

/// A consumer's independent read position into a [`RingBuffer`]. Consumers
/// hold a non-lifetime-extending (`Weak`) reference to the buffer itself,
/// per spec.md §3 ownership rules; the buffer is owned by the fork manager.
pub struct ConsumerCursor {
    next_seq: AtomicU64,
    buffer: std::sync::Weak<RingBuffer>,
}

impl ConsumerCursor {
    pub fn new(buffer: &Arc<RingBuffer>) -> Self {
        Self { next_seq: AtomicU64::new(0), buffer: Arc::downgrade(buffer) }
    }

    /// Drain up to `max` frames since this cursor's last read, advancing
    /// the cursor. Returns an empty vec if the buffer has been dropped.
    pub fn drain(&self, max: usize) -> Vec<Entry> {
        let Some(buffer) = self.buffer.upgrade() else {
            return Vec::new();
        };
        let cursor = self.next_seq.load(Ordering::Acquire);
        let (entries, next_cursor) = buffer.drain(cursor, max);
        self.next_seq.store(next_cursor, Ordering::Release);
        entries
    }

    /// Lag, in milliseconds, between "now" and the arrival time of the
    /// oldest frame this cursor has not yet consumed (`consumer_lag_ms`
    /// histogram input, spec.md §4.2). `None` if the cursor is caught up
    /// or the buffer is gone.
    pub fn lag_ms(&self) -> Option<u64> {
        let buffer = self.buffer.upgrade()?;
        let cursor = self.next_seq.load(Ordering::Acquire);
        let inner = buffer.inner.lock();
        let oldest_unread = inner.buf.iter().find(|e| e.seq >= cursor)?;
        Some(oldest_unread.arrival.elapsed().as_millis() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn payload(n: u8) -> Bytes {
        Bytes::from(vec![n; 4])
    }

    #[test]
    fn capacity_rounds_up_to_power_of_two() {
        // 500ms / 20ms = 25 frames needed -> next pow2 is 32.
        let rb = RingBuffer::new(500, 20);
        assert_eq!(rb.capacity(), 32);
    }

    #[test]
    fn push_and_drain_preserves_order() {
        let rb = Arc::new(RingBuffer::new(100, 20));
        for i in 0..5u8 {
            rb.push(payload(i));
        }
        let cursor = ConsumerCursor::new(&rb);
        let entries = cursor.drain(10);
        assert_eq!(entries.len(), 5);
        for (i, e) in entries.iter().enumerate() {
            assert_eq!(e.payload, payload(i as u8));
        }
    }

    #[test]
    fn overflow_drops_oldest_and_increments_counter() {
        // capacity rounds up to 4.
        let rb = RingBuffer::new(80, 20);
        assert_eq!(rb.capacity(), 4);
        for i in 0..6u8 {
            rb.push(payload(i));
        }
        assert_eq!(rb.frames_dropped(), 2);
        assert_eq!(rb.depth(), 4);
    }

    #[test]
    fn property_p4_conservation() {
        let rb = Arc::new(RingBuffer::new(80, 20));
        for i in 0..10u8 {
            rb.push(payload(i));
        }
        let cursor = ConsumerCursor::new(&rb);
        let popped = cursor.drain(100).len() as u64;
        assert_eq!(popped + rb.frames_dropped(), rb.frames_pushed() - rb.depth() as u64);
    }

    #[test]
    fn lagging_consumer_catches_up_to_window_start_without_panicking() {
        let rb = Arc::new(RingBuffer::new(80, 20)); // capacity 4
        let cursor = ConsumerCursor::new(&rb);
        for i in 0..10u8 {
            rb.push(payload(i));
        }
        let entries = cursor.drain(100);
        // Only the 4 retained frames are replayable; the rest were dropped.
        assert_eq!(entries.len(), 4);
        assert_eq!(entries[0].payload, payload(6));
    }

    proptest! {
        /// P4: for any push/drain trace, frames popped by one consumer plus
        /// frames overflow-dropped plus what's still retained must equal
        /// everything ever pushed — nothing is ever silently lost or
        /// double-counted.
        #[test]
        fn property_p4_conservation_holds_for_arbitrary_traces(
            buffer_ms in 20u64..200,
            frame_ms in 10u64..30,
            push_count in 0usize..64,
            drain_chunk in 1usize..16,
        ) {
            let rb = Arc::new(RingBuffer::new(buffer_ms, frame_ms));
            for i in 0..push_count {
                rb.push(payload((i % 256) as u8));
            }
            let cursor = ConsumerCursor::new(&rb);
            let mut popped = 0u64;
            loop {
                let batch = cursor.drain(drain_chunk);
                if batch.is_empty() {
                    break;
                }
                popped += batch.len() as u64;
            }
            prop_assert_eq!(popped + rb.frames_dropped(), rb.frames_pushed() - rb.depth() as u64);
        }
    }

    #[tokio::test]
    async fn notify_wakes_a_waiting_consumer() {
        let rb = Arc::new(RingBuffer::new(100, 20));
        let rb2 = rb.clone();
        let handle = tokio::spawn(async move {
            rb2.notified().await;
        });
        tokio::task::yield_now().await;
        rb.push(payload(1));
        tokio::time::timeout(std::time::Duration::from_secs(1), handle)
            .await
            .expect("consumer should have been woken")
            .unwrap();
    }
}
