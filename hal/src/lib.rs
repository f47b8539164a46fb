//! # Hardware Abstraction Layer (HAL)
//!
//! This crate defines the two platform capabilities the message-queue core
//! consumes but does not implement.
//!
//! ## Philosophy
//!
//! **The platform is an opaque capability, not a global.**
//!
//! The core never pokes addresses or interrupt controllers directly. It is
//! handed a [`SharedRegion`] and a [`Notifier`] at construction time, and a
//! board support layer decides what backs them.
//!
//! ## Design Principles
//!
//! 1. **Trait-based**: All cross-domain access goes through traits
//! 2. **Offsets, not pointers**: Shared memory is addressed by region offset,
//!    which means the same thing in both domains
//! 3. **Testable**: Host implementations simulate both domains in one process

pub mod interrupts;
pub mod shared_memory;

pub use interrupts::{
    host_interrupt_pair, HostNotifier, InterruptError, Notifier, NotifyHandler, NotifyLine,
};
pub use shared_memory::{HostSharedRegion, RegionError, SharedRegion};
