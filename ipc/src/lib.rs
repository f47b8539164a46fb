//! # Inter-Processor Communication (IPC)
//!
//! This crate defines what every MSGQ transport agrees on.
//!
//! ## Philosophy
//!
//! - **Handles, not copies**: A transport moves a buffer handle; payload bytes
//!   stay where the sender wrote them
//! - **Header only**: Transports read the fixed header and nothing else
//! - **Fail fast**: `send` never waits for the peer to drain
//! - **Explicit recovery**: A faulted channel stays faulted until reopened
//!
//! ## Architecture
//!
//! - [`message`]: The fixed-layout header at the start of every buffer
//! - [`channel`]: The per-channel state machine
//! - [`transport`]: The `Transport` capability every variant implements
//! - [`local`]: The same-processor variant

pub mod channel;
pub mod local;
pub mod message;
pub mod transport;

pub use channel::{ChannelState, ChannelStateMachine};
pub use local::LocalTransport;
pub use message::{HeaderError, MessageHeader, MessageKind, Priority, HEADER_SIZE};
pub use transport::{Delivery, SendError, Transport, TransportError, TransportKind};
