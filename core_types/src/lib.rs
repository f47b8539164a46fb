//! # Core Types
//!
//! This crate defines the identifiers shared by every MSGQ layer.
//!
//! ## Philosophy
//!
//! - **Explicit over implicit**: A queue ID says which processor owns it.
//! - **Type safety first**: Processor, queue and pool numbers cannot be confused.
//! - **Same bits on both sides**: Every identifier has a fixed-width raw form
//!   that is written into shared memory unchanged.
//!
//! ## Key Types
//!
//! - [`ProcessorId`]: One execution domain (GPP or DSP)
//! - [`QueueId`]: A queue, encoded as `(processor << 16) | index`
//! - [`PoolId`]: A size-class pool inside the buffer allocator
//! - [`SessionId`]: The identity of one open of a transport endpoint

pub mod ids;

pub use ids::{PoolId, ProcessorId, QueueId, SessionId};
