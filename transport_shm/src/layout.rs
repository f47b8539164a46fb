//! Byte layout of one link's control structures

use core_types::{ProcessorId, SessionId};
use hal::SharedRegion;
use ipc::TransportError;

/// Endpoint block magic: "MSGQ" in little-endian
pub const ENDPOINT_MAGIC: u32 = 0x5147_534D;

pub const ENDPOINT_BLOCK_SIZE: usize = 32;
pub const RING_HEADER_SIZE: usize = 16;
pub const RING_ENTRY_SIZE: usize = 8;

pub const MAGIC_OFFSET: usize = 0;
pub const STATE_OFFSET: usize = 4;
pub const SESSION_OFFSET: usize = 8;
pub const SEQUENCE_OFFSET: usize = 24;

pub const RING_LOCK_OFFSET: usize = 0;
pub const RING_HEAD_OFFSET: usize = 4;
pub const RING_TAIL_OFFSET: usize = 8;
pub const RING_CAPACITY_OFFSET: usize = 12;

/// Which end of a link a processor occupies
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Lower,
    Upper,
}

impl Side {
    /// Lower processor ID takes side 0
    pub fn of(local: ProcessorId, remote: ProcessorId) -> Self {
        if local.as_u16() < remote.as_u16() {
            Side::Lower
        } else {
            Side::Upper
        }
    }

    pub fn index(self) -> usize {
        match self {
            Side::Lower => 0,
            Side::Upper => 1,
        }
    }

    pub fn peer(self) -> Self {
        match self {
            Side::Lower => Side::Upper,
            Side::Upper => Side::Lower,
        }
    }
}

/// Returns the bytes one link needs for rings of `ring_capacity` slots
pub const fn link_bytes(ring_capacity: u32) -> usize {
    2 * ENDPOINT_BLOCK_SIZE + 2 * (RING_HEADER_SIZE + RING_ENTRY_SIZE * ring_capacity as usize)
}

/// Where one link's structures sit in the shared region
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkLayout {
    pub base: usize,
    pub ring_capacity: u32,
}

impl LinkLayout {
    pub fn new(base: usize, ring_capacity: u32) -> Self {
        Self {
            base,
            ring_capacity,
        }
    }

    pub fn size(&self) -> usize {
        link_bytes(self.ring_capacity)
    }

    pub fn end(&self) -> usize {
        self.base + self.size()
    }

    pub fn endpoint(&self, side: Side) -> usize {
        self.base + side.index() * ENDPOINT_BLOCK_SIZE
    }

    /// Offset of the ring that `from` produces into
    pub fn ring(&self, from: Side) -> usize {
        let ring_size = RING_HEADER_SIZE + RING_ENTRY_SIZE * self.ring_capacity as usize;
        self.base + 2 * ENDPOINT_BLOCK_SIZE + from.index() * ring_size
    }
}

/// Lifecycle state published in an endpoint block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointState {
    Down,
    Up,
}

impl EndpointState {
    pub fn to_raw(self) -> u32 {
        match self {
            EndpointState::Down => 0,
            EndpointState::Up => 1,
        }
    }

    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(EndpointState::Down),
            1 => Some(EndpointState::Up),
            _ => None,
        }
    }
}

/// What one side tells its peer about itself
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndpointBlock {
    pub state: EndpointState,
    pub session: SessionId,
    /// Count of sessions this side has started
    pub sequence: u32,
}

impl EndpointBlock {
    /// Reads the block at `offset`
    ///
    /// A zeroed block belongs to a side that never started and reads as
    /// `Down`.
    pub fn read(region: &dyn SharedRegion, offset: usize) -> Result<Self, TransportError> {
        let mut raw = [0u8; ENDPOINT_BLOCK_SIZE];
        region.read(offset, &mut raw)?;

        let word = |at: usize| u32::from_le_bytes([raw[at], raw[at + 1], raw[at + 2], raw[at + 3]]);
        let magic = word(MAGIC_OFFSET);
        let state = word(STATE_OFFSET);
        let mut session = [0u8; 16];
        session.copy_from_slice(&raw[SESSION_OFFSET..SESSION_OFFSET + 16]);

        if magic == 0 {
            return Ok(Self {
                state: EndpointState::Down,
                session: SessionId::from_u128(0),
                sequence: 0,
            });
        }
        if magic != ENDPOINT_MAGIC {
            return Err(TransportError::Protocol(format!(
                "bad endpoint magic {:#010x} at {:#x}",
                magic, offset
            )));
        }
        let state = EndpointState::from_raw(state).ok_or_else(|| {
            TransportError::Protocol(format!("bad endpoint state {} at {:#x}", state, offset))
        })?;

        Ok(Self {
            state,
            session: SessionId::from_u128(u128::from_le_bytes(session)),
            sequence: word(SEQUENCE_OFFSET),
        })
    }

    /// Publishes the block at `offset`, state word last
    pub fn write(&self, region: &dyn SharedRegion, offset: usize) -> Result<(), TransportError> {
        region.store_u32(offset + STATE_OFFSET, EndpointState::Down.to_raw())?;
        region.write(
            offset + SESSION_OFFSET,
            &self.session.as_u128().to_le_bytes(),
        )?;
        region.store_u32(offset + SEQUENCE_OFFSET, self.sequence)?;
        region.store_u32(offset + MAGIC_OFFSET, ENDPOINT_MAGIC)?;
        region.store_u32(offset + STATE_OFFSET, self.state.to_raw())?;
        Ok(())
    }

    /// Flips only the state word
    pub fn set_state(
        region: &dyn SharedRegion,
        offset: usize,
        state: EndpointState,
    ) -> Result<(), TransportError> {
        region.store_u32(offset + MAGIC_OFFSET, ENDPOINT_MAGIC)?;
        region.store_u32(offset + STATE_OFFSET, state.to_raw())?;
        Ok(())
    }
}
