//! Message header contract
//!
//! Every buffer handed to a transport starts with this 24-byte header,
//! little-endian, at offset 0:
//!
//! | offset | width | field      |
//! |--------|-------|------------|
//! | 0      | 4     | `size`     |
//! | 4      | 4     | `dst`      |
//! | 8      | 4     | `src`      |
//! | 12     | 4     | `msg_id`   |
//! | 16     | 2     | `priority` |
//! | 18     | 2     | `pool`     |
//! | 20     | 2     | `kind`     |
//! | 22     | 2     | reserved   |
//!
//! Both domains read the same bytes, so this table must never change
//! without changing both sides.

use core_types::{PoolId, QueueId};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Length of the header in bytes
pub const HEADER_SIZE: usize = 24;

pub const SIZE_OFFSET: usize = 0;
pub const DST_OFFSET: usize = 4;
pub const SRC_OFFSET: usize = 8;
pub const MSG_ID_OFFSET: usize = 12;
pub const PRIORITY_OFFSET: usize = 16;
pub const POOL_OFFSET: usize = 18;
pub const KIND_OFFSET: usize = 20;

/// Delivery priority of a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Priority {
    /// Appended to the tail of the receiving queue
    #[default]
    Normal,
    /// Placed at the head of the receiving queue
    High,
}

impl Priority {
    fn to_raw(self) -> u16 {
        match self {
            Priority::Normal => 0,
            Priority::High => 1,
        }
    }

    fn from_raw(raw: u16) -> Result<Self, HeaderError> {
        match raw {
            0 => Ok(Priority::Normal),
            1 => Ok(Priority::High),
            other => Err(HeaderError::UnknownPriority(other)),
        }
    }
}

/// What a message is for
///
/// Only `Data` messages ever reach an application. The locate kinds are
/// exchanged between registries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MessageKind {
    #[default]
    Data,
    LocateRequest,
    LocateReply,
}

impl MessageKind {
    fn to_raw(self) -> u16 {
        match self {
            MessageKind::Data => 0,
            MessageKind::LocateRequest => 1,
            MessageKind::LocateReply => 2,
        }
    }

    fn from_raw(raw: u16) -> Result<Self, HeaderError> {
        match raw {
            0 => Ok(MessageKind::Data),
            1 => Ok(MessageKind::LocateRequest),
            2 => Ok(MessageKind::LocateReply),
            other => Err(HeaderError::UnknownKind(other)),
        }
    }
}

/// Errors decoding a header
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum HeaderError {
    #[error("Header needs 24 bytes, got {0}")]
    Truncated(usize),

    #[error("Unknown message kind {0}")]
    UnknownKind(u16),

    #[error("Unknown priority {0}")]
    UnknownPriority(u16),
}

/// The fixed prefix of every message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
    /// Bytes of the message the sender wrote, header included
    pub size: u32,
    /// Destination queue, set by the registry on `put`
    pub dst: QueueId,
    /// Reply address, `QueueId::NONE` if none
    pub src: QueueId,
    /// Application-owned tag; transports never touch it
    pub msg_id: u32,
    pub priority: Priority,
    /// Size class the buffer came from
    pub pool: PoolId,
    pub kind: MessageKind,
}

impl MessageHeader {
    /// Creates a data header for a message of `size` total bytes
    pub fn new_data(size: u32) -> Self {
        Self {
            size,
            dst: QueueId::NONE,
            src: QueueId::NONE,
            msg_id: 0,
            priority: Priority::Normal,
            pool: PoolId::new(0),
            kind: MessageKind::Data,
        }
    }

    /// Sets the reply address
    pub fn with_src(mut self, src: QueueId) -> Self {
        self.src = src;
        self
    }

    /// Sets the application message ID
    pub fn with_msg_id(mut self, msg_id: u32) -> Self {
        self.msg_id = msg_id;
        self
    }

    /// Sets the priority
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Returns the number of payload bytes after the header
    pub fn payload_len(&self) -> usize {
        (self.size as usize).saturating_sub(HEADER_SIZE)
    }

    /// Serializes the header into its shared-memory form
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut out = [0u8; HEADER_SIZE];
        out[SIZE_OFFSET..SIZE_OFFSET + 4].copy_from_slice(&self.size.to_le_bytes());
        out[DST_OFFSET..DST_OFFSET + 4].copy_from_slice(&self.dst.as_u32().to_le_bytes());
        out[SRC_OFFSET..SRC_OFFSET + 4].copy_from_slice(&self.src.as_u32().to_le_bytes());
        out[MSG_ID_OFFSET..MSG_ID_OFFSET + 4].copy_from_slice(&self.msg_id.to_le_bytes());
        out[PRIORITY_OFFSET..PRIORITY_OFFSET + 2]
            .copy_from_slice(&self.priority.to_raw().to_le_bytes());
        out[POOL_OFFSET..POOL_OFFSET + 2].copy_from_slice(&self.pool.as_u16().to_le_bytes());
        out[KIND_OFFSET..KIND_OFFSET + 2].copy_from_slice(&self.kind.to_raw().to_le_bytes());
        out
    }

    /// Parses a header from the first `HEADER_SIZE` bytes of `bytes`
    pub fn decode(bytes: &[u8]) -> Result<Self, HeaderError> {
        if bytes.len() < HEADER_SIZE {
            return Err(HeaderError::Truncated(bytes.len()));
        }
        let u32_at = |at: usize| {
            u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
        };
        let u16_at = |at: usize| u16::from_le_bytes([bytes[at], bytes[at + 1]]);

        Ok(Self {
            size: u32_at(SIZE_OFFSET),
            dst: QueueId::from_raw(u32_at(DST_OFFSET)),
            src: QueueId::from_raw(u32_at(SRC_OFFSET)),
            msg_id: u32_at(MSG_ID_OFFSET),
            priority: Priority::from_raw(u16_at(PRIORITY_OFFSET))?,
            pool: PoolId::new(u16_at(POOL_OFFSET)),
            kind: MessageKind::from_raw(u16_at(KIND_OFFSET))?,
        })
    }
}

impl fmt::Display for MessageHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:?} #{} {} -> {} ({} bytes)",
            self.kind, self.msg_id, self.src, self.dst, self.size
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_types::ProcessorId;

    #[test]
    fn test_new_data_header() {
        let header = MessageHeader::new_data(64);
        assert_eq!(header.size, 64);
        assert!(header.dst.is_none());
        assert!(header.src.is_none());
        assert_eq!(header.kind, MessageKind::Data);
        assert_eq!(header.priority, Priority::Normal);
        assert_eq!(header.payload_len(), 40);
    }

    #[test]
    fn test_header_encode_decode() {
        let header = MessageHeader::new_data(100)
            .with_src(QueueId::new(ProcessorId::GPP, 2))
            .with_msg_id(0xBEEF)
            .with_priority(Priority::High);

        let bytes = header.encode();
        assert_eq!(MessageHeader::decode(&bytes).unwrap(), header);
    }

    #[test]
    fn test_decode_truncated() {
        assert_eq!(
            MessageHeader::decode(&[0u8; 10]),
            Err(HeaderError::Truncated(10))
        );
    }

    #[test]
    fn test_decode_rejects_unknown_kind() {
        let mut bytes = MessageHeader::new_data(24).encode();
        bytes[KIND_OFFSET] = 9;
        assert_eq!(
            MessageHeader::decode(&bytes),
            Err(HeaderError::UnknownKind(9))
        );

        let mut bytes = MessageHeader::new_data(24).encode();
        bytes[PRIORITY_OFFSET] = 7;
        assert_eq!(
            MessageHeader::decode(&bytes),
            Err(HeaderError::UnknownPriority(7))
        );
    }

    #[test]
    fn test_payload_len_saturates() {
        assert_eq!(MessageHeader::new_data(3).payload_len(), 0);
    }
}
