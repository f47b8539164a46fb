//! Single-producer ring of (destination, offset) slots
//!
//! `head` and `tail` count modulo twice the capacity, so a full ring
//! (`head - tail == capacity`) is told apart from an empty one and the slot
//! index (`counter % capacity`) stays continuous across the wrap for any
//! capacity. A slot is written before `head` moves past it, and both
//! counters move only under the ring's lock word.

use crate::layout::{
    RING_CAPACITY_OFFSET, RING_ENTRY_SIZE, RING_HEADER_SIZE, RING_HEAD_OFFSET, RING_LOCK_OFFSET,
    RING_TAIL_OFFSET,
};
use hal::SharedRegion;
use ipc::TransportError;
use std::hint;
use std::thread;

const LOCK_FREE: u32 = 0;
const LOCK_HELD: u32 = 1;
const LOCK_SPIN_LIMIT: u32 = 100_000;

/// Largest ring capacity; counters must fit twice this in a `u32`
pub const MAX_RING_CAPACITY: u32 = 1 << 30;

/// One direction of a link
pub struct Ring<'a> {
    region: &'a dyn SharedRegion,
    base: usize,
    capacity: u32,
}

impl<'a> Ring<'a> {
    pub fn new(region: &'a dyn SharedRegion, base: usize, capacity: u32) -> Self {
        Self {
            region,
            base,
            capacity,
        }
    }

    /// Empties the ring and stamps its capacity
    ///
    /// Only the consumer resets, and only while its endpoint is down.
    pub fn reset(&self) -> Result<(), TransportError> {
        self.locked(|| {
            self.region.store_u32(self.base + RING_HEAD_OFFSET, 0)?;
            self.region.store_u32(self.base + RING_TAIL_OFFSET, 0)?;
            self.region
                .store_u32(self.base + RING_CAPACITY_OFFSET, self.capacity)?;
            Ok(())
        })
    }

    /// Appends a slot, returning `false` when the ring is full
    pub fn push(&self, dst: u32, offset: u32) -> Result<bool, TransportError> {
        self.locked(|| {
            let (head, tail) = self.counters()?;
            if self.distance(head, tail) >= self.capacity {
                return Ok(false);
            }
            let slot = self.slot(head);
            let mut entry = [0u8; RING_ENTRY_SIZE];
            entry[0..4].copy_from_slice(&dst.to_le_bytes());
            entry[4..8].copy_from_slice(&offset.to_le_bytes());
            self.region.write(slot, &entry)?;
            self.region
                .store_u32(self.base + RING_HEAD_OFFSET, self.advance(head))?;
            Ok(true)
        })
    }

    /// Removes the oldest slot
    pub fn pop(&self) -> Result<Option<(u32, u32)>, TransportError> {
        self.locked(|| {
            let (head, tail) = self.counters()?;
            if head == tail {
                return Ok(None);
            }
            let mut entry = [0u8; RING_ENTRY_SIZE];
            self.region.read(self.slot(tail), &mut entry)?;
            self.region
                .store_u32(self.base + RING_TAIL_OFFSET, self.advance(tail))?;
            let dst = u32::from_le_bytes([entry[0], entry[1], entry[2], entry[3]]);
            let offset = u32::from_le_bytes([entry[4], entry[5], entry[6], entry[7]]);
            Ok(Some((dst, offset)))
        })
    }

    /// Returns the number of occupied slots
    pub fn len(&self) -> Result<u32, TransportError> {
        self.locked(|| {
            let (head, tail) = self.counters()?;
            Ok(self.distance(head, tail))
        })
    }

    pub fn is_empty(&self) -> Result<bool, TransportError> {
        Ok(self.len()? == 0)
    }

    fn span(&self) -> u32 {
        self.capacity * 2
    }

    fn advance(&self, counter: u32) -> u32 {
        let next = counter + 1;
        if next == self.span() {
            0
        } else {
            next
        }
    }

    fn distance(&self, head: u32, tail: u32) -> u32 {
        if head >= tail {
            head - tail
        } else {
            head + self.span() - tail
        }
    }

    fn slot(&self, counter: u32) -> usize {
        self.base + RING_HEADER_SIZE + (counter % self.capacity) as usize * RING_ENTRY_SIZE
    }

    fn counters(&self) -> Result<(u32, u32), TransportError> {
        let stamped = self.region.load_u32(self.base + RING_CAPACITY_OFFSET)?;
        if stamped != self.capacity || self.capacity == 0 || self.capacity > MAX_RING_CAPACITY {
            return Err(TransportError::Protocol(format!(
                "ring at {:#x} has capacity {}, expected {}",
                self.base, stamped, self.capacity
            )));
        }
        let head = self.region.load_u32(self.base + RING_HEAD_OFFSET)?;
        let tail = self.region.load_u32(self.base + RING_TAIL_OFFSET)?;
        if head >= self.span() || tail >= self.span() || self.distance(head, tail) > self.capacity
        {
            return Err(TransportError::Protocol(format!(
                "ring at {:#x} has head {} and tail {}",
                self.base, head, tail
            )));
        }
        Ok((head, tail))
    }

    fn locked<T>(
        &self,
        critical: impl FnOnce() -> Result<T, TransportError>,
    ) -> Result<T, TransportError> {
        let lock = self.base + RING_LOCK_OFFSET;
        let mut spins = 0;
        while self
            .region
            .compare_exchange_u32(lock, LOCK_FREE, LOCK_HELD)?
            .is_err()
        {
            spins += 1;
            if spins >= LOCK_SPIN_LIMIT {
                return Err(TransportError::Protocol(format!(
                    "ring lock at {:#x} never released",
                    lock
                )));
            }
            if spins % 64 == 0 {
                thread::yield_now();
            } else {
                hint::spin_loop();
            }
        }
        let result = critical();
        self.region.store_u32(lock, LOCK_FREE)?;
        result
    }
}
