//! Reusable byte buffers handed between connection pumps.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

/// Shared pool of reusable byte buffers of a single size class.
///
/// Buffers are allocated on demand when the free list is empty and return to
/// the free list when their [`Buffer`] lease is dropped. At most
/// `max_buffers` idle buffers are retained.
#[derive(Clone, Debug)]
pub struct BufferPool {
    inner: Arc<PoolInner>,
}

#[derive(Debug)]
struct PoolInner {
    buffers: Mutex<VecDeque<Vec<u8>>>,
    buffer_size: usize,
    max_buffers: usize,
}

impl PoolInner {
    fn release(&self, data: Vec<u8>) {
        let mut guard = self.buffers.lock().unwrap_or_else(PoisonError::into_inner);
        if guard.len() < self.max_buffers {
            guard.push_back(data);
        }
    }
}

impl BufferPool {
    /// Create a new buffer pool.
    #[must_use]
    pub fn new(buffer_size: usize, max_buffers: usize) -> Self {
        assert!(buffer_size > 0, "buffer_size must be positive");
        assert!(max_buffers > 0, "max_buffers must be positive");

        Self {
            inner: Arc::new(PoolInner {
                buffers: Mutex::new(VecDeque::with_capacity(max_buffers)),
                buffer_size,
                max_buffers,
            }),
        }
    }

    /// Acquire a buffer from the pool, allocating if none is idle.
    pub fn acquire(&self) -> Buffer {
        let recycled = self
            .inner
            .buffers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();

        let buffer = recycled.unwrap_or_else(|| vec![0u8; self.inner.buffer_size]);

        Buffer {
            data: Some(buffer),
            pool: Arc::clone(&self.inner),
            len: 0,
        }
    }

    /// Buffer capacity in bytes.
    #[must_use]
    pub fn buffer_size(&self) -> usize {
        self.inner.buffer_size
    }

    /// Maximum number of idle buffers retained by the pool.
    #[must_use]
    pub fn max_buffers(&self) -> usize {
        self.inner.max_buffers
    }

    /// Number of idle buffers currently held.
    #[must_use]
    pub fn idle(&self) -> usize {
        self.inner
            .buffers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// Read-sized and write-sized pools owned by one connection.
#[derive(Clone, Debug)]
pub struct ConnectionBuffers {
    /// Buffers filled by the read pump and drained by the processor
    pub read: BufferPool,
    /// Buffers filled by the response writer and drained by the write pump
    pub write: BufferPool,
}

impl ConnectionBuffers {
    /// Create both pools.
    #[must_use]
    pub fn new(read_size: usize, write_size: usize, max_buffers: usize) -> Self {
        Self {
            read: BufferPool::new(read_size, max_buffers),
            write: BufferPool::new(write_size, max_buffers),
        }
    }
}

/// Buffer leased from the pool.
///
/// The lease has exactly one owner; moving it through a channel transfers
/// ownership. Dropping it releases the storage back to the pool.
pub struct Buffer {
    data: Option<Vec<u8>>,
    pool: Arc<PoolInner>,
    len: usize,
}

impl Buffer {
    /// Expose the whole buffer as a mutable slice for filling.
    #[must_use]
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        self.data.as_deref_mut().unwrap_or_default()
    }

    /// Expose the filled portion of the buffer as an immutable slice.
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        match self.data.as_deref() {
            Some(data) => &data[..self.len],
            None => &[],
        }
    }

    /// Current logical length of the buffer.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Check whether the buffer contains no data.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Set the length of meaningful data within the buffer.
    pub fn set_len(&mut self, len: usize) {
        let capacity = self.capacity();
        assert!(len <= capacity, "buffer length exceeds capacity");
        self.len = len;
    }

    /// Return the configured capacity.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.data.as_ref().map_or(0, Vec::len)
    }
}

impl fmt::Debug for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Buffer")
            .field("len", &self.len)
            .field("capacity", &self.capacity())
            .finish()
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        if let Some(data) = self.data.take() {
            self.pool.release(data);
        }
    }
}
