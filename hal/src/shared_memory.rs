//! Shared memory region abstraction
//!
//! Both execution domains map the same physical region. Everything the
//! message-queue core places there (buffers, ring indices, handshake words)
//! is addressed by byte offset from the start of the region, and every
//! multi-byte field is little-endian.

use parking_lot::Mutex;
use thiserror::Error;

/// Errors that can occur when touching the shared region
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum RegionError {
    /// Access falls outside the region
    #[error("Access of {len} bytes at {offset:#x} is outside the shared region")]
    OutOfBounds { offset: usize, len: usize },

    /// Word access is not 4-byte aligned
    #[error("Word access at {offset:#x} is not 4-byte aligned")]
    Misaligned { offset: usize },
}

/// A contiguous memory region visible to both processors
///
/// Implementations must make each individual call atomic with respect to
/// the other domain: a `write` is either fully visible or not at all, and
/// `compare_exchange_u32` is a true compare-and-swap. Ordering between
/// calls from one domain is program order.
pub trait SharedRegion: Send + Sync {
    /// Returns the region length in bytes
    fn size(&self) -> usize;

    /// Copies bytes out of the region
    fn read(&self, offset: usize, buffer: &mut [u8]) -> Result<(), RegionError>;

    /// Copies bytes into the region
    fn write(&self, offset: usize, data: &[u8]) -> Result<(), RegionError>;

    /// Atomically replaces the word at `offset` with `new` if it equals `current`
    ///
    /// Returns `Ok(previous)` on success and `Err(actual)` when the word
    /// did not match.
    fn compare_exchange_u32(
        &self,
        offset: usize,
        current: u32,
        new: u32,
    ) -> Result<Result<u32, u32>, RegionError>;

    /// Reads a little-endian word
    fn load_u32(&self, offset: usize) -> Result<u32, RegionError> {
        check_word(offset)?;
        let mut bytes = [0u8; 4];
        self.read(offset, &mut bytes)?;
        Ok(u32::from_le_bytes(bytes))
    }

    /// Writes a little-endian word
    fn store_u32(&self, offset: usize, value: u32) -> Result<(), RegionError> {
        check_word(offset)?;
        self.write(offset, &value.to_le_bytes())
    }

    /// Sets `len` bytes starting at `offset` to `byte`
    fn fill(&self, offset: usize, len: usize, byte: u8) -> Result<(), RegionError> {
        self.write(offset, &vec![byte; len])
    }
}

fn check_word(offset: usize) -> Result<(), RegionError> {
    if offset % 4 != 0 {
        return Err(RegionError::Misaligned { offset });
    }
    Ok(())
}

/// Host-memory stand-in for the physical shared region
///
/// Useful for running both domains inside one test process. The whole
/// region sits behind one lock, which gives every call the atomicity the
/// trait demands.
pub struct HostSharedRegion {
    bytes: Mutex<Vec<u8>>,
}

impl HostSharedRegion {
    /// Creates a zero-filled region of `size` bytes
    pub fn new(size: usize) -> Self {
        Self {
            bytes: Mutex::new(vec![0u8; size]),
        }
    }

    fn span(size: usize, offset: usize, len: usize) -> Result<core::ops::Range<usize>, RegionError> {
        match offset.checked_add(len) {
            Some(end) if end <= size => Ok(offset..end),
            _ => Err(RegionError::OutOfBounds { offset, len }),
        }
    }
}

impl SharedRegion for HostSharedRegion {
    fn size(&self) -> usize {
        self.bytes.lock().len()
    }

    fn read(&self, offset: usize, buffer: &mut [u8]) -> Result<(), RegionError> {
        let bytes = self.bytes.lock();
        let range = Self::span(bytes.len(), offset, buffer.len())?;
        buffer.copy_from_slice(&bytes[range]);
        Ok(())
    }

    fn write(&self, offset: usize, data: &[u8]) -> Result<(), RegionError> {
        let mut bytes = self.bytes.lock();
        let range = Self::span(bytes.len(), offset, data.len())?;
        bytes[range].copy_from_slice(data);
        Ok(())
    }

    fn compare_exchange_u32(
        &self,
        offset: usize,
        current: u32,
        new: u32,
    ) -> Result<Result<u32, u32>, RegionError> {
        check_word(offset)?;
        let mut bytes = self.bytes.lock();
        let range = Self::span(bytes.len(), offset, 4)?;
        let mut word = [0u8; 4];
        word.copy_from_slice(&bytes[range.clone()]);
        let actual = u32::from_le_bytes(word);
        if actual != current {
            return Ok(Err(actual));
        }
        bytes[range].copy_from_slice(&new.to_le_bytes());
        Ok(Ok(actual))
    }

    fn fill(&self, offset: usize, len: usize, byte: u8) -> Result<(), RegionError> {
        let mut bytes = self.bytes.lock();
        let range = Self::span(bytes.len(), offset, len)?;
        bytes[range].fill(byte);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_region_read_write() {
        let region = HostSharedRegion::new(64);
        region.write(8, &[1, 2, 3, 4]).unwrap();

        let mut out = [0u8; 4];
        region.read(8, &mut out).unwrap();
        assert_eq!(out, [1, 2, 3, 4]);
        assert_eq!(region.size(), 64);
    }

    #[test]
    fn test_region_out_of_bounds() {
        let region = HostSharedRegion::new(16);
        assert_eq!(
            region.write(14, &[0; 4]),
            Err(RegionError::OutOfBounds { offset: 14, len: 4 })
        );

        let mut out = [0u8; 1];
        assert_eq!(
            region.read(usize::MAX, &mut out),
            Err(RegionError::OutOfBounds {
                offset: usize::MAX,
                len: 1
            })
        );
    }

    #[test]
    fn test_region_words_are_little_endian() {
        let region = HostSharedRegion::new(16);
        region.store_u32(4, 0x0102_0304).unwrap();

        let mut raw = [0u8; 4];
        region.read(4, &mut raw).unwrap();
        assert_eq!(raw, [4, 3, 2, 1]);
        assert_eq!(region.load_u32(4).unwrap(), 0x0102_0304);
    }

    #[test]
    fn test_region_misaligned_word() {
        let region = HostSharedRegion::new(16);
        assert_eq!(
            region.store_u32(2, 1),
            Err(RegionError::Misaligned { offset: 2 })
        );
        assert_eq!(
            region.compare_exchange_u32(6, 0, 1),
            Err(RegionError::Misaligned { offset: 6 })
        );
    }

    #[test]
    fn test_compare_exchange() {
        let region = HostSharedRegion::new(8);
        assert_eq!(region.compare_exchange_u32(0, 0, 1).unwrap(), Ok(0));
        assert_eq!(region.compare_exchange_u32(0, 0, 1).unwrap(), Err(1));
        assert_eq!(region.compare_exchange_u32(0, 1, 0).unwrap(), Ok(1));
    }

    #[test]
    fn test_fill() {
        let region = HostSharedRegion::new(8);
        region.fill(2, 4, 0xAA).unwrap();

        let mut out = [0u8; 8];
        region.read(0, &mut out).unwrap();
        assert_eq!(out, [0, 0, 0xAA, 0xAA, 0xAA, 0xAA, 0, 0]);
    }
}
