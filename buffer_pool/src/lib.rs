//! # Buffer Pool
//!
//! This crate provides the size-class buffer allocator shared by both
//! execution domains.
//!
//! ## Philosophy
//!
//! - **Buffers are finite and fixed**: Pools are sized once at start-up and
//!   never grow
//! - **Identity, not copies**: A message moves between domains as the offset
//!   of its buffer in the shared region
//! - **Fail fast**: An empty pool is reported at once, callers decide how to
//!   back off
//! - **Misuse is loud**: Freeing a foreign or already-free buffer is an error,
//!   never silently tolerated
//!
//! ## Core Concepts
//!
//! - [`PoolConfig`]: One `(count, size)` entry of the pool table
//! - [`BufferPool`]: All size classes carved out of one shared region
//! - [`BufferHandle`]: Exclusive ownership of one buffer
//! - [`PoolStats`]: Per-class accounting snapshot

mod handle;
mod pool;

pub use handle::BufferHandle;
pub use pool::{BufferPool, PoolConfig, PoolStats, BUFFER_ALIGN};

use hal::RegionError;
use thiserror::Error;

/// Errors that can occur in the buffer pool
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PoolError {
    /// Static pool configuration is unusable
    #[error("Invalid pool configuration: {0}")]
    Config(String),

    /// The matching size class has no free buffer
    #[error("Out of buffers: no free {buffer_size}-byte buffer for a {requested}-byte request")]
    OutOfBuffers { requested: usize, buffer_size: u32 },

    /// No size class is large enough for the request
    #[error("No size class holds {requested} bytes")]
    NoSizeClass { requested: usize },

    /// Handle does not name a live buffer of any pool
    #[error("Invalid buffer handle at offset {offset:#x}")]
    InvalidHandle { offset: u32 },

    /// Handle names a buffer that is already free
    #[error("Double free of buffer at offset {offset:#x}")]
    DoubleFree { offset: u32 },

    /// Access runs past the end of the buffer
    #[error("Access of {len} bytes at {start} exceeds {capacity}-byte buffer {offset:#x}")]
    OutOfBounds {
        offset: u32,
        start: usize,
        len: usize,
        capacity: usize,
    },

    /// Teardown found buffers still owned by someone
    #[error("{in_use} buffers still in use at teardown")]
    BuffersInUse { in_use: usize },

    /// Shared region access failed
    #[error("Shared region error: {0}")]
    Region(#[from] RegionError),
}
