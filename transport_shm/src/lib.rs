//! # Shared-Memory Transport
//!
//! This crate moves MSGQ buffer handles between two processors that share a
//! memory region and a pair of interrupt lines.
//!
//! ## Philosophy
//!
//! - **Offsets cross, bytes stay**: Each ring slot carries a destination
//!   queue and a buffer offset; payloads never move
//! - **One producer per ring**: Each side writes only its outbound ring and
//!   its own endpoint block
//! - **Sessions, not heartbeats**: A peer that closes or restarts is seen as
//!   a changed endpoint block, and the channel faults
//!
//! ## Link layout
//!
//! ```text
//! +-------------------+-------------------+----------------+----------------+
//! | endpoint (side 0) | endpoint (side 1) | ring 0 -> 1    | ring 1 -> 0    |
//! | 32 bytes          | 32 bytes          | 16 + 8*cap     | 16 + 8*cap     |
//! +-------------------+-------------------+----------------+----------------+
//! ```
//!
//! Side 0 is the processor with the lower ID.

pub mod layout;
pub mod ring;
pub mod transport;

pub use layout::{link_bytes, EndpointBlock, EndpointState, LinkLayout, Side};
pub use ring::{Ring, MAX_RING_CAPACITY};
pub use transport::{ShmConfig, ShmTransport};
