//! Buffer pooling for the I/O path
//!
//! Pre-allocated, fixed-size byte buffers handed out as scoped guards.
//! The pool grows instead of blocking when every buffer is in use.

use parking_lot::Mutex;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Thread-safe pool of fixed-size byte buffers
///
/// # Example
/// ```
/// use rust_ws::infrastructure::pool::BufferPool;
///
/// let pool = BufferPool::new(1024, 4);
/// {
///     let mut buf = pool.acquire();
///     buf[0] = 42;
///     assert_eq!(pool.available(), 3);
/// }
/// // Returned on drop
/// assert_eq!(pool.available(), 4);
/// ```
pub struct BufferPool {
    free: Mutex<Vec<Box<[u8]>>>,
    /// Buffers allocated over the pool's lifetime (pre-allocated + grown)
    total: AtomicUsize,
    buffer_size: usize,
}

impl BufferPool {
    /// Create a pool with `count` pre-allocated buffers of `buffer_size` bytes
    pub fn new(buffer_size: usize, count: usize) -> Self {
        let free = (0..count)
            .map(|_| vec![0u8; buffer_size].into_boxed_slice())
            .collect();

        Self {
            free: Mutex::new(free),
            total: AtomicUsize::new(count),
            buffer_size,
        }
    }

    /// Take a buffer, allocating a new one if the pool is empty
    ///
    /// Contents are whatever the previous holder left behind.
    #[inline]
    pub fn acquire(&self) -> PooledBuffer<'_> {
        let buf = self.free.lock().pop();
        let buf = match buf {
            Some(buf) => buf,
            None => {
                self.total.fetch_add(1, Ordering::Relaxed);
                vec![0u8; self.buffer_size].into_boxed_slice()
            }
        };
        PooledBuffer { pool: self, buf }
    }

    /// Buffers currently in the pool
    #[inline]
    pub fn available(&self) -> usize {
        self.free.lock().len()
    }

    /// Buffers allocated so far
    #[inline]
    pub fn total(&self) -> usize {
        self.total.load(Ordering::Relaxed)
    }

    #[inline(always)]
    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    fn release(&self, buf: Box<[u8]>) {
        self.free.lock().push(buf);
    }
}

/// Buffer borrowed from a [`BufferPool`], returned on drop
pub struct PooledBuffer<'a> {
    pool: &'a BufferPool,
    buf: Box<[u8]>,
}

impl Deref for PooledBuffer<'_> {
    type Target = [u8];

    #[inline(always)]
    fn deref(&self) -> &[u8] {
        &self.buf
    }
}

impl DerefMut for PooledBuffer<'_> {
    #[inline(always)]
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.buf
    }
}

impl Drop for PooledBuffer<'_> {
    fn drop(&mut self) {
        let buf = std::mem::take(&mut self.buf);
        self.pool.release(buf);
    }
}
