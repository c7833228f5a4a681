use std::collections::VecDeque;
use std::time::Duration;
use tracing::debug;

/// Bytes per protocol frame: 640 samples × 2 bytes = 40ms of 16 kHz mono PCM16
pub const FRAME_BYTES: usize = 1280;

/// Cadence of frame dispatch attempts
pub const FRAME_INTERVAL: Duration = Duration::from_millis(40);

/// Chunk configuration
#[derive(Debug, Clone)]
pub struct ChunkConfig {
    /// Size of every dispatched frame in bytes
    pub frame_bytes: usize,
    /// How often the session tries to dispatch a frame
    pub frame_interval: Duration,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            frame_bytes: FRAME_BYTES,
            frame_interval: FRAME_INTERVAL,
        }
    }
}

/// Fixed-size frame chunker
///
/// Capture output arrives in irregular sizes and is appended to a byte queue.
/// Each timer tick takes exactly one frame off the head; a tick with less than a
/// frame queued is a no-op. The queue is unbounded: if capture outpaces
/// dispatch it grows.
#[derive(Debug)]
pub struct FrameChunker {
    queue: VecDeque<u8>,
    frame_bytes: usize,
}

impl FrameChunker {
    pub fn new(frame_bytes: usize) -> Self {
        Self {
            queue: VecDeque::new(),
            frame_bytes: frame_bytes.max(1),
        }
    }

    /// Append bytes to the tail of the queue
    pub fn append(&mut self, bytes: &[u8]) {
        self.queue.extend(bytes.iter().copied());
    }

    /// Take exactly one frame off the head, or `None` if not enough is queued
    pub fn next_frame(&mut self) -> Option<Vec<u8>> {
        if self.queue.len() < self.frame_bytes {
            return None;
        }

        let frame: Vec<u8> = self.queue.drain(..self.frame_bytes).collect();
        Some(frame)
    }

    /// Number of bytes waiting for dispatch
    pub fn pending_bytes(&self) -> usize {
        self.queue.len()
    }

    /// Whether at least one whole frame is queued
    pub fn has_frame(&self) -> bool {
        self.queue.len() >= self.frame_bytes
    }

    /// Drop everything queued, returning how many bytes were discarded
    pub fn clear(&mut self) -> usize {
        let discarded = self.queue.len();
        if discarded > 0 {
            debug!("Discarding {} queued bytes (less than one frame is never sent)", discarded);
        }
        self.queue.clear();
        discarded
    }
}

impl Default for FrameChunker {
    fn default() -> Self {
        Self::new(FRAME_BYTES)
    }
}
