//! # Message Queues (MSGQ)
//!
//! This crate is the application-facing half of the inter-processor
//! messaging stack: named queues, reached the same way whether they live
//! on this processor or on the peer.
//!
//! ## Philosophy
//!
//! - **Location transparency**: `put` looks only at the destination's
//!   processor to pick a transport
//! - **Ownership moves with the handle**: A buffer belongs to whoever holds
//!   its handle; `put` gives it away, `get` hands it over
//! - **Only `get` waits**: Every other operation fails fast, and nothing
//!   retries behind the caller's back
//! - **Explicit instances**: A registry is a value; several can live in one
//!   process
//!
//! ## Example
//!
//! ```ignore
//! let queues = MessageQueues::new(ProcessorId::GPP, pool, 64);
//! let inbox = queues.create("inbox", TransportBinding::Local)?;
//! let msg = queues.alloc(HEADER_SIZE + 4)?;
//! queues.write_message(&msg, 1, b"ping")?;
//! queues.put(inbox, msg)?;
//! let msg = queues.get(inbox, Timeout::from_millis(100))?;
//! ```

pub mod bootstrap;
pub mod config;
mod error;
pub mod layout;
pub mod locate;
mod queue;
mod registry;

pub use config::{LinkConfig, MsgqConfig, QueueConfig};
pub use error::{ErrorKind, MsgqError, PutError};
pub use layout::{LinkPlacement, SharedLayout};
pub use registry::{MessageQueues, TransportBinding, MAX_NAME_LEN};

pub use buffer_pool::{BufferHandle, PoolConfig};
pub use core_types::{ProcessorId, QueueId};
pub use ipc::{ChannelState, MessageHeader, Priority, HEADER_SIZE};
pub use lifecycle::Timeout;
