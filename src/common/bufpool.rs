//! Size-classed buffer pool
//!
//! Hot read paths (the UDP receive loop, relays, tunnel framing) take their
//! buffers from here instead of allocating per packet. A buffer is handed
//! back to the class whose size equals its capacity; anything else is
//! dropped so a class never holds a buffer of the wrong size.

use lazy_static::lazy_static;
use parking_lot::Mutex;

/// Default size classes, smallest first.
pub const DEFAULT_CLASSES: &[usize] = &[
    128,
    512,
    1024,
    2 * 1024,
    4 * 1024,
    8 * 1024,
    16 * 1024,
    32 * 1024,
    64 * 1024,
    65 * 1024,
];

/// Maximum number of idle buffers kept per class
const DEFAULT_MAX_RETAINED: usize = 256;

lazy_static! {
    static ref GLOBAL: BufferPool = BufferPool::new(DEFAULT_CLASSES, DEFAULT_MAX_RETAINED);
}

/// Take a buffer of `size` bytes from the process-wide pool.
pub fn get(size: usize) -> Vec<u8> {
    GLOBAL.get(size)
}

/// Return a buffer to the process-wide pool.
pub fn put(buf: Vec<u8>) {
    GLOBAL.put(buf)
}

struct SizeClass {
    size: usize,
    free: Mutex<Vec<Vec<u8>>>,
}

/// A set of free lists, one per size class.
pub struct BufferPool {
    classes: Vec<SizeClass>,
    max_retained: usize,
}

impl BufferPool {
    /// `sizes` must be sorted ascending.
    pub fn new(sizes: &[usize], max_retained: usize) -> Self {
        debug_assert!(sizes.windows(2).all(|w| w[0] < w[1]));
        Self {
            classes: sizes
                .iter()
                .map(|&size| SizeClass {
                    size,
                    free: Mutex::new(Vec::new()),
                })
                .collect(),
            max_retained,
        }
    }

    /// Get a zero-extended buffer with `len() == size`.
    ///
    /// Capacity is the smallest class that fits, or exactly `size` when no
    /// class is large enough (such buffers are never pooled).
    pub fn get(&self, size: usize) -> Vec<u8> {
        let Some(class) = self.classes.iter().find(|c| c.size >= size) else {
            return vec![0u8; size];
        };

        let mut buf = class
            .free
            .lock()
            .pop()
            .unwrap_or_else(|| Vec::with_capacity(class.size));
        if buf.len() < size {
            buf.resize(size, 0);
        } else {
            buf.truncate(size);
        }
        buf
    }

    /// Return a buffer. Buffers whose capacity is not exactly a class size
    /// are dropped.
    pub fn put(&self, buf: Vec<u8>) {
        let cap = buf.capacity();
        if let Some(class) = self.classes.iter().find(|c| c.size == cap) {
            let mut free = class.free.lock();
            if free.len() < self.max_retained {
                free.push(buf);
            }
        }
    }

    /// Number of idle buffers held for the class of exactly `size` bytes.
    pub fn retained(&self, size: usize) -> usize {
        self.classes
            .iter()
            .find(|c| c.size == size)
            .map(|c| c.free.lock().len())
            .unwrap_or(0)
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new(DEFAULT_CLASSES, DEFAULT_MAX_RETAINED)
    }
}
