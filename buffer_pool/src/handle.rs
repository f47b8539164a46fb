//! Buffer handles

use std::fmt;

/// Exclusive ownership of one pool buffer
///
/// The handle is the buffer's byte offset in the shared region, which is
/// what crosses the transport. It is deliberately neither `Clone` nor
/// `Copy`: passing it to `put` or `free` gives the buffer away, so safe code
/// holding one handle per buffer cannot alias or double-free it.
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct BufferHandle {
    offset: u32,
}

impl BufferHandle {
    /// Re-materialises a handle from its shared-region offset
    ///
    /// Used by transports when a buffer arrives from the peer. The pool
    /// validates the offset on every use, so a forged handle is reported as
    /// `InvalidHandle` or `DoubleFree` rather than corrupting a free-list.
    pub fn from_offset(offset: u32) -> Self {
        Self { offset }
    }

    /// Returns the shared-region offset
    pub fn offset(&self) -> u32 {
        self.offset
    }

    /// Gives up the handle, returning the offset to publish to the peer
    pub fn into_offset(self) -> u32 {
        self.offset
    }
}

impl fmt::Display for BufferHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Buf({:#x})", self.offset)
    }
}
