//! Part buffer pool
//!
//! A fixed number of part-sized buffers shared by the workers of one upload.
//! Taking a buffer also takes one of the pool's permits, so the pool size
//! bounds both buffered memory and the number of parts in flight. Buffers go
//! back to the pool when the [`PooledBuffer`] is dropped, including when the
//! worker holding it is cancelled.

use std::sync::{Arc, Mutex};

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::error::TransferError;

/// Pool of reusable part buffers
#[derive(Debug)]
pub struct BufferPool {
    idle: Mutex<Vec<Vec<u8>>>,
    permits: Arc<Semaphore>,
    buf_len: usize,
    capacity: usize,
}

impl BufferPool {
    /// Create a pool of `capacity` buffers of `buf_len` bytes each
    ///
    /// Buffers are allocated on first use.
    pub fn new(capacity: usize, buf_len: usize) -> Arc<Self> {
        let capacity = capacity.max(1);
        Arc::new(Self {
            idle: Mutex::new(Vec::with_capacity(capacity)),
            permits: Arc::new(Semaphore::new(capacity)),
            buf_len,
            capacity,
        })
    }

    /// Take a buffer, waiting until one is free
    ///
    /// # Errors
    /// Returns [`TransferError::Cancelled`] if the pool has been closed.
    pub async fn acquire(self: &Arc<Self>) -> Result<PooledBuffer, TransferError> {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| TransferError::Cancelled)?;

        let buf = self
            .idle
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop()
            .unwrap_or_else(|| vec![0u8; self.buf_len]);

        Ok(PooledBuffer {
            buf,
            filled: 0,
            pool: Arc::clone(self),
            _permit: permit,
        })
    }

    /// Stop handing out buffers; pending and later acquires fail
    pub fn close(&self) {
        self.permits.close();
    }

    /// Buffers that can be taken right now
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Buffers allocated and currently idle
    pub fn idle(&self) -> usize {
        self.idle.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn buf_len(&self) -> usize {
        self.buf_len
    }

    fn give_back(&self, buf: Vec<u8>) {
        if buf.len() != self.buf_len {
            return;
        }
        let mut idle = self.idle.lock().unwrap_or_else(|e| e.into_inner());
        if idle.len() < self.capacity {
            idle.push(buf);
        }
    }
}

/// A buffer on loan from a [`BufferPool`]
#[derive(Debug)]
pub struct PooledBuffer {
    buf: Vec<u8>,
    filled: usize,
    pool: Arc<BufferPool>,
    _permit: OwnedSemaphorePermit,
}

impl PooledBuffer {
    /// The whole buffer, for reading into
    pub fn space_mut(&mut self) -> &mut [u8] {
        &mut self.buf
    }

    /// Mark the first `len` bytes as holding data
    pub fn set_filled(&mut self, len: usize) {
        self.filled = len.min(self.buf.len());
    }

    /// The bytes holding data
    pub fn filled(&self) -> &[u8] {
        &self.buf[..self.filled]
    }

    pub fn len(&self) -> usize {
        self.filled
    }

    pub fn is_empty(&self) -> bool {
        self.filled == 0
    }

    pub fn capacity(&self) -> usize {
        self.buf.len()
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        let buf = std::mem::take(&mut self.buf);
        self.pool.give_back(buf);
    }
}
