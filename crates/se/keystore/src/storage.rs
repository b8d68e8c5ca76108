//! Persistence boundary
//!
//! The key store sees a flat, byte-addressable region whose writes are
//! durable when the call returns. [`MemoryStore`] backs tests and the
//! simulator; it can be told to lose power after a number of writes.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{Error, Result};

/// Flat durable region
pub trait Storage: fmt::Debug + Send {
    /// Size of the region in bytes
    fn size(&self) -> usize;

    /// Read `len` bytes at `offset`
    fn read(&self, offset: usize, len: usize) -> Result<Vec<u8>>;

    /// Write `data` at `offset`; durable once this returns
    fn write(&mut self, offset: usize, data: &[u8]) -> Result<()>;
}

fn check_bounds(offset: usize, len: usize, size: usize) -> Result<()> {
    match offset.checked_add(len) {
        Some(end) if end <= size => Ok(()),
        _ => Err(Error::OutOfBounds { offset, len, size }),
    }
}

#[derive(Debug)]
struct MemoryInner {
    bytes: Vec<u8>,
    writes: u64,
    writes_before_failure: Option<u64>,
}

/// In-memory region. Clones share the same bytes, so a clone taken before a
/// simulated crash is the "flash" a restarted key store opens.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    inner: Arc<Mutex<MemoryInner>>,
}

impl MemoryStore {
    /// An erased region of `size` bytes
    pub fn new(size: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(MemoryInner {
                bytes: vec![0xFF; size],
                writes: 0,
                writes_before_failure: None,
            })),
        }
    }

    /// Let `count` more writes through, then fail every write until
    /// [`Self::restore_power`]
    pub fn fail_after_writes(&self, count: u64) {
        self.inner.lock().writes_before_failure = Some(count);
    }

    /// Stop failing writes
    pub fn restore_power(&self) {
        self.inner.lock().writes_before_failure = None;
    }

    /// Writes completed so far
    pub fn writes(&self) -> u64 {
        self.inner.lock().writes
    }

    /// Snapshot of the region
    pub fn snapshot(&self) -> Vec<u8> {
        self.inner.lock().bytes.clone()
    }

    /// Flip bits of one byte, bypassing the failure injection
    pub fn corrupt(&self, offset: usize, mask: u8) {
        if let Some(byte) = self.inner.lock().bytes.get_mut(offset) {
            *byte ^= mask;
        }
    }
}

impl Storage for MemoryStore {
    fn size(&self) -> usize {
        self.inner.lock().bytes.len()
    }

    fn read(&self, offset: usize, len: usize) -> Result<Vec<u8>> {
        let inner = self.inner.lock();
        check_bounds(offset, len, inner.bytes.len())?;
        Ok(inner.bytes[offset..offset + len].to_vec())
    }

    fn write(&mut self, offset: usize, data: &[u8]) -> Result<()> {
        let mut inner = self.inner.lock();
        check_bounds(offset, data.len(), inner.bytes.len())?;
        if let Some(remaining) = inner.writes_before_failure.as_mut() {
            if *remaining == 0 {
                return Err(Error::Storage("power lost".to_string()));
            }
            *remaining -= 1;
        }
        inner.bytes[offset..offset + data.len()].copy_from_slice(data);
        inner.writes += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_bytes() {
        let store = MemoryStore::new(16);
        let mut writer = store.clone();
        writer.write(4, &[1, 2, 3]).unwrap();
        assert_eq!(store.read(3, 5).unwrap(), vec![0xFF, 1, 2, 3, 0xFF]);
        assert_eq!(store.writes(), 1);
    }

    #[test]
    fn test_bounds() {
        let mut store = MemoryStore::new(8);
        assert_eq!(
            store.write(6, &[0; 4]),
            Err(Error::OutOfBounds {
                offset: 6,
                len: 4,
                size: 8
            })
        );
        assert!(store.read(usize::MAX, 2).is_err());
    }

    #[test]
    fn test_power_loss() {
        let mut store = MemoryStore::new(8);
        store.fail_after_writes(1);
        store.write(0, &[1]).unwrap();
        assert!(store.write(1, &[2]).is_err());
        assert_eq!(store.snapshot()[1], 0xFF);
        store.restore_power();
        store.write(1, &[2]).unwrap();
        assert_eq!(store.snapshot()[..2], [1, 2]);
    }
}
