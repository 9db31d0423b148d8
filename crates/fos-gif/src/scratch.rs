//! Scratch Buffer Pooling
//!
//! Short-lived byte buffers (read windows, index rows) are recycled between
//! decode sessions instead of being reallocated for every image.

use std::sync::{Mutex, PoisonError};

/// Pool of reusable byte buffers
#[derive(Debug)]
pub struct ScratchPool {
    available: Mutex<Vec<Vec<u8>>>,
    capacity: usize,
}

impl ScratchPool {
    pub fn new() -> Self {
        Self::with_capacity(8)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            available: Mutex::new(Vec::with_capacity(capacity)),
            capacity,
        }
    }

    /// Take a zeroed buffer of exactly `len` bytes
    pub fn take(&self, len: usize) -> Vec<u8> {
        let recycled = {
            let mut available = self.available.lock().unwrap_or_else(PoisonError::into_inner);
            match available.iter().position(|buf| buf.capacity() >= len) {
                Some(index) => Some(available.swap_remove(index)),
                None => available.pop(),
            }
        };

        let mut buf = recycled.unwrap_or_default();
        buf.clear();
        buf.resize(len, 0);
        buf
    }

    /// Return a buffer to the pool
    pub fn put(&self, buf: Vec<u8>) {
        if buf.capacity() == 0 {
            return;
        }
        let mut available = self.available.lock().unwrap_or_else(PoisonError::into_inner);
        if available.len() < self.capacity {
            available.push(buf);
        }
    }

    pub fn available(&self) -> usize {
        self.available.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn clear(&self) {
        self.available.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }
}

impl Default for ScratchPool {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_take_put_reuse() {
        let pool = ScratchPool::with_capacity(2);
        let mut buf = pool.take(128);
        buf[0] = 9;
        let ptr = buf.as_ptr();
        pool.put(buf);
        assert_eq!(pool.available(), 1);

        let again = pool.take(64);
        assert_eq!(again.len(), 64);
        assert_eq!(again[0], 0);
        assert_eq!(again.as_ptr(), ptr);
        assert_eq!(pool.available(), 0);
    }

    #[test]
    fn test_capacity_bound() {
        let pool = ScratchPool::with_capacity(1);
        pool.put(vec![0; 8]);
        pool.put(vec![0; 8]);
        assert_eq!(pool.available(), 1);
        pool.clear();
        assert_eq!(pool.available(), 0);
    }
}
