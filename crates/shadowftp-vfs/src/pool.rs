//! Two small reuse pools for transfer resources: a fixed-size byte buffer
//! and a CRC-32 hasher, both reset on borrow so callers never observe
//! another transfer's leftover state.

use std::sync::Mutex;

const BUFFER_SIZE: usize = 256 * 1024;

/// A pool of `Vec<u8>` transfer buffers, each `BUFFER_SIZE` bytes.
pub struct BufferPool {
    free: Mutex<Vec<Vec<u8>>>,
}

impl Default for BufferPool {
    fn default() -> Self {
        BufferPool { free: Mutex::new(Vec::new()) }
    }
}

impl BufferPool {
    /// Borrows a zeroed, `BUFFER_SIZE`-byte buffer from the pool, allocating
    /// a new one if none are free.
    pub fn take(&self) -> Vec<u8> {
        let mut free = self.free.lock().unwrap();
        free.pop().unwrap_or_else(|| vec![0u8; BUFFER_SIZE])
    }

    /// Returns a buffer to the pool for reuse.
    pub fn give_back(&self, buf: Vec<u8>) {
        self.free.lock().unwrap().push(buf);
    }
}

/// A pool of reusable [`crc32fast::Hasher`]s.
pub struct HasherPool {
    free: Mutex<Vec<crc32fast::Hasher>>,
}

impl Default for HasherPool {
    fn default() -> Self {
        HasherPool { free: Mutex::new(Vec::new()) }
    }
}

impl HasherPool {
    /// Borrows a freshly-reset hasher.
    pub fn take(&self) -> crc32fast::Hasher {
        let mut free = self.free.lock().unwrap();
        match free.pop() {
            Some(mut h) => {
                h.reset();
                h
            }
            None => crc32fast::Hasher::new(),
        }
    }

    /// Returns a hasher to the pool for reuse.
    pub fn give_back(&self, hasher: crc32fast::Hasher) {
        self.free.lock().unwrap().push(hasher);
    }
}
