//! The transport capability
//!
//! A transport moves buffer handles toward one peer endpoint. It never
//! blocks the caller beyond a short local lock, never retries, and never
//! looks past the message header.

use crate::ChannelState;
use buffer_pool::BufferHandle;
use core_types::{ProcessorId, QueueId};
use hal::{InterruptError, NotifyHandler, RegionError};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Errors a transport reports
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// The peer-visible ring has no free slot
    #[error("Transport full")]
    TransportFull,

    /// The channel is not open, or the handshake did not complete in time
    #[error("Peer not ready")]
    PeerNotReady,

    /// The peer went away or restarted after the channel was opened
    #[error("Channel faulted: peer lost")]
    Faulted,

    /// The operation is not valid in the channel's current state
    #[error("Cannot {operation} while channel is {state}")]
    InvalidState {
        state: ChannelState,
        operation: &'static str,
    },

    /// Shared control structures hold values no peer should have written
    #[error("Protocol violation: {0}")]
    Protocol(String),

    #[error("Shared region error: {0}")]
    Region(#[from] RegionError),

    #[error("Notification error: {0}")]
    Notify(#[from] InterruptError),
}

/// A failed send, handing the buffer back to the caller
#[derive(Debug, Error, PartialEq, Eq)]
#[error("Send of {handle} failed: {error}")]
pub struct SendError {
    #[source]
    pub error: TransportError,
    pub handle: BufferHandle,
}

impl SendError {
    pub fn new(error: TransportError, handle: BufferHandle) -> Self {
        Self { error, handle }
    }
}

/// A buffer handed over by a transport, addressed to a local queue
#[derive(Debug, PartialEq, Eq)]
pub struct Delivery {
    pub dst: QueueId,
    pub handle: BufferHandle,
}

/// Which variant a transport is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransportKind {
    /// Both endpoints in one execution domain
    Local,
    /// Endpoints in two domains sharing a memory region
    SharedMemory,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::Local => write!(f, "local"),
            TransportKind::SharedMemory => write!(f, "shared-memory"),
        }
    }
}

/// Moves buffer handles between two queue endpoints
///
/// Implementations are shared between the application path and the
/// notification path of one domain, hence `Send + Sync` and `&self`
/// methods throughout.
pub trait Transport: Send + Sync {
    /// Returns which variant this is
    fn kind(&self) -> TransportKind;

    /// Returns the channel state
    fn state(&self) -> ChannelState;

    /// Performs the one-time handshake with the peer
    ///
    /// Fails with `PeerNotReady` if the peer does not answer within the
    /// transport's configured timeout. The transport does not retry.
    fn open_channel(&self, local: ProcessorId, remote: ProcessorId) -> Result<(), TransportError>;

    /// Tears the channel down
    ///
    /// Idempotent, and never waits on the peer.
    fn close_channel(&self);

    /// Makes `handle` visible to the peer endpoint and signals it
    ///
    /// On failure the buffer comes back inside the `SendError`.
    fn send(&self, dst: QueueId, handle: BufferHandle) -> Result<(), SendError>;

    /// Takes one delivered buffer, if any
    ///
    /// `Ok(None)` is the normal idle answer.
    fn recv(&self) -> Result<Option<Delivery>, TransportError>;

    /// Installs the callback run when the peer signals new deliveries
    ///
    /// Transports without a notification path keep the default, and
    /// their owner polls `recv` instead.
    fn set_notify_handler(&self, _handler: NotifyHandler) -> Result<(), TransportError> {
        Ok(())
    }

    /// Removes the notification callback
    fn clear_notify_handler(&self) {}

    /// Takes buffers that were published to this side but discarded
    /// undelivered, such as those left in an inbound ring when a fresh
    /// session reset it
    ///
    /// The caller owns them and must free them.
    fn take_stranded(&self) -> Vec<BufferHandle> {
        Vec::new()
    }
}
