//! Shared byte-buffer pool.
//!
//! Frame generation and socket reads borrow `Vec<u8>` buffers from the pool
//! and hand them back once written or parsed. Buffers are cleared on release;
//! the pool keeps at most `max_pooled` of them.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use parking_lot::Mutex;

// ============================================================================
// Constants
// ============================================================================

/// Default capacity of freshly allocated buffers.
pub const DEFAULT_BUFFER_SIZE: usize = 8 * 1024;

/// Default number of idle buffers retained.
pub const DEFAULT_MAX_POOLED: usize = 256;

// ============================================================================
// BufferPool
// ============================================================================

/// Thread-safe pool of reusable byte buffers.
pub struct BufferPool {
    /// Idle buffers.
    buffers: Mutex<Vec<Vec<u8>>>,
    /// Capacity of new buffers.
    buffer_size: usize,
    /// Maximum idle buffers kept.
    max_pooled: usize,
}

impl fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferPool")
            .field("idle", &self.idle_count())
            .field("buffer_size", &self.buffer_size)
            .field("max_pooled", &self.max_pooled)
            .finish()
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER_SIZE, DEFAULT_MAX_POOLED)
    }
}

impl BufferPool {
    /// Creates a pool handing out buffers of `buffer_size` capacity.
    #[must_use]
    pub fn new(buffer_size: usize, max_pooled: usize) -> Self {
        Self {
            buffers: Mutex::new(Vec::new()),
            buffer_size,
            max_pooled,
        }
    }

    /// Takes an empty buffer with at least `capacity` bytes reserved.
    #[must_use]
    pub fn acquire(&self, capacity: usize) -> Vec<u8> {
        let pooled = self.buffers.lock().pop();
        let mut buffer = pooled.unwrap_or_else(|| Vec::with_capacity(self.buffer_size));
        buffer.reserve(capacity);
        buffer
    }

    /// Returns a buffer to the pool.
    pub fn release(&self, mut buffer: Vec<u8>) {
        buffer.clear();
        let mut buffers = self.buffers.lock();
        if buffers.len() < self.max_pooled {
            buffers.push(buffer);
        }
    }

    /// Returns the number of idle buffers.
    #[inline]
    #[must_use]
    pub fn idle_count(&self) -> usize {
        self.buffers.lock().len()
    }

    /// Returns the capacity of newly allocated buffers.
    #[inline]
    #[must_use]
    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }
}

// ============================================================================
// Tests
// ============================================================================
