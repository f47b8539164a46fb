//! Identifiers for processors, queues, pools and transport sessions

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Identifier of one execution domain
///
/// The numbering is agreed by both domains at build time. By convention the
/// general-purpose host is processor 0 and the DSP is processor 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ProcessorId(u16);

impl ProcessorId {
    /// The general-purpose host processor
    pub const GPP: ProcessorId = ProcessorId(0);

    /// The digital signal processor
    pub const DSP: ProcessorId = ProcessorId(1);

    /// Creates a processor ID from its raw number
    pub const fn new(raw: u16) -> Self {
        Self(raw)
    }

    /// Returns the raw processor number
    pub const fn as_u16(&self) -> u16 {
        self.0
    }
}

impl fmt::Display for ProcessorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            ProcessorId::GPP => write!(f, "GPP"),
            ProcessorId::DSP => write!(f, "DSP"),
            ProcessorId(n) => write!(f, "Proc({})", n),
        }
    }
}

/// Identifier of a message queue
///
/// The upper 16 bits name the processor that owns (receives on) the queue,
/// the lower 16 bits are the queue's slot in that processor's registry.
/// Transport resolution only needs the processor part.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct QueueId(u32);

impl QueueId {
    /// "No queue", used as an empty reply address
    pub const NONE: QueueId = QueueId(u32::MAX);

    /// Index reserved for the registry's own control endpoint
    pub const CONTROL_INDEX: u16 = u16::MAX - 1;

    /// Creates a queue ID owned by `processor` at `index`
    pub const fn new(processor: ProcessorId, index: u16) -> Self {
        Self(((processor.0 as u32) << 16) | index as u32)
    }

    /// Returns the control endpoint of a processor's registry
    pub const fn control(processor: ProcessorId) -> Self {
        Self::new(processor, Self::CONTROL_INDEX)
    }

    /// Reconstructs a queue ID from its raw shared-memory form
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    /// Returns the raw shared-memory form
    pub const fn as_u32(&self) -> u32 {
        self.0
    }

    /// Returns the owning processor
    pub const fn processor(&self) -> ProcessorId {
        ProcessorId((self.0 >> 16) as u16)
    }

    /// Returns the slot index within the owning registry
    pub const fn index(&self) -> u16 {
        (self.0 & 0xFFFF) as u16
    }

    /// Checks if this is the "no queue" value
    pub const fn is_none(&self) -> bool {
        self.0 == u32::MAX
    }

    /// Checks if this addresses a registry control endpoint
    pub const fn is_control(&self) -> bool {
        !self.is_none() && self.index() == Self::CONTROL_INDEX
    }
}

impl fmt::Display for QueueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_none() {
            write!(f, "Queue(none)")
        } else {
            write!(f, "Queue({}:{})", self.processor(), self.index())
        }
    }
}

/// Identifier of a size-class pool
///
/// Pools are numbered in ascending buffer-size order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PoolId(u16);

impl PoolId {
    /// Creates a pool ID
    pub const fn new(raw: u16) -> Self {
        Self(raw)
    }

    /// Returns the raw pool number
    pub const fn as_u16(&self) -> u16 {
        self.0
    }

    /// Returns the pool number as a table index
    pub const fn index(&self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for PoolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Pool({})", self.0)
    }
}

/// Identity of one open of a transport endpoint
///
/// Published in the shared control block at handshake time. A peer whose
/// session changes after open has restarted and must not be talked to
/// until the channel is explicitly reopened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Creates a new random session ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Reconstructs a session ID from its shared-memory form
    pub fn from_u128(raw: u128) -> Self {
        Self(Uuid::from_u128(raw))
    }

    /// Returns the shared-memory form
    pub fn as_u128(&self) -> u128 {
        self.0.as_u128()
    }

    /// Returns the inner UUID
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Session({})", self.0)
    }
}
