//! Backpressure queue for PCM the encoder could not accept yet
//!
//! Frames wait here when the codec offers no input slot. They are drained
//! before any new capture data, split into whatever input capacity the
//! codec offers at the time. One coarse lock guards queue mutation and
//! snapshot reads.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Instant;

use crate::assert_invariant;

/// Fixed queue capacity
pub const MAX_PENDING_FRAMES: usize = 10;

/// PCM bytes awaiting an encoder input slot
#[derive(Debug, Clone, PartialEq)]
pub struct PendingAudioFrame {
    pub bytes: Vec<u8>,
    pub captured_at: Instant,
}

impl PendingAudioFrame {
    pub fn new(bytes: Vec<u8>, captured_at: Instant) -> Self {
        Self { bytes, captured_at }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Diagnostic counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PendingQueueStats {
    pub depth: usize,
    pub max_depth: usize,
    pub frames_queued: u64,
    pub dropped_frames: u64,
    pub dropped_bytes: u64,
    pub buffer_unavailable: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    /// Every queued frame reached the encoder
    Drained,
    /// Capacity ran out; the unconsumed remainder is back at the front
    Stalled,
}

#[derive(Debug, Default)]
struct QueueInner {
    frames: VecDeque<PendingAudioFrame>,
    stats: PendingQueueStats,
}

#[derive(Debug)]
pub struct PendingFrameQueue {
    inner: Mutex<QueueInner>,
    capacity: usize,
}

impl Default for PendingFrameQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl PendingFrameQueue {
    pub fn new() -> Self {
        Self::with_capacity(MAX_PENDING_FRAMES)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(QueueInner::default()),
            capacity,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, QueueInner> {
        // A panicking feeder leaves the queue structurally intact
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append at the tail. Returns `false` if the queue was full and the
    /// frame was dropped.
    pub fn push_back(&self, frame: PendingAudioFrame) -> bool {
        let mut inner = self.lock();
        if inner.frames.len() >= self.capacity {
            inner.stats.dropped_frames += 1;
            inner.stats.dropped_bytes += frame.len() as u64;
            log::warn!(
                "Pending audio queue full ({} frames), dropping {} bytes (total dropped: {})",
                inner.frames.len(),
                frame.len(),
                inner.stats.dropped_frames
            );
            return false;
        }

        inner.frames.push_back(frame);
        inner.stats.frames_queued += 1;
        let depth = inner.frames.len();
        inner.stats.depth = depth;
        inner.stats.max_depth = inner.stats.max_depth.max(depth);

        assert_invariant!(
            depth <= self.capacity,
            "Pending queue never exceeds its capacity",
            "audio::pending"
        );
        true
    }

    /// Count a feed cycle that found no encoder input slot
    pub fn note_buffer_unavailable(&self) {
        self.lock().stats.buffer_unavailable += 1;
    }

    pub fn len(&self) -> usize {
        self.lock().frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().frames.is_empty()
    }

    pub fn stats(&self) -> PendingQueueStats {
        let inner = self.lock();
        PendingQueueStats {
            depth: inner.frames.len(),
            ..inner.stats
        }
    }

    /// Copy of the queued frames, oldest first
    pub fn snapshot(&self) -> Vec<PendingAudioFrame> {
        self.lock().frames.iter().cloned().collect()
    }

    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.frames.clear();
        inner.stats.depth = 0;
    }

    /// Feed queued frames to the encoder in order
    ///
    /// `feed` receives the unconsumed bytes of the head frame and returns how
    /// many it accepted; zero means no input capacity is left. The lock is
    /// held for the whole drain.
    pub fn drain<F, E>(&self, mut feed: F) -> Result<DrainOutcome, E>
    where
        F: FnMut(&[u8], Instant) -> Result<usize, E>,
    {
        let mut inner = self.lock();

        while let Some(mut frame) = inner.frames.pop_front() {
            let mut offset = 0;
            while offset < frame.bytes.len() {
                let consumed = match feed(&frame.bytes[offset..], frame.captured_at) {
                    Ok(n) => n.min(frame.bytes.len() - offset),
                    Err(e) => {
                        frame.bytes.drain(..offset);
                        inner.frames.push_front(frame);
                        inner.stats.depth = inner.frames.len();
                        return Err(e);
                    }
                };

                if consumed == 0 {
                    frame.bytes.drain(..offset);
                    inner.frames.push_front(frame);
                    inner.stats.depth = inner.frames.len();
                    return Ok(DrainOutcome::Stalled);
                }
                offset += consumed;
            }
        }

        inner.stats.depth = 0;
        Ok(DrainOutcome::Drained)
    }
}
