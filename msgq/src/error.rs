//! Registry errors

use buffer_pool::{BufferHandle, PoolError};
use core_types::{ProcessorId, QueueId};
use ipc::{HeaderError, TransportError};
use std::fmt;
use thiserror::Error;

/// Errors reported by the message queue registry
///
/// Allocator and transport failures are carried unchanged inside
/// `Pool` and `Transport`, with the queue they concerned.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MsgqError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid queue name {0:?}")]
    InvalidName(String),

    #[error("Queue name {0:?} already in use")]
    DuplicateName(String),

    #[error("Queue {0:?} not found")]
    NotFound(String),

    #[error("{0} does not exist")]
    UnknownQueue(QueueId),

    #[error("{0} is not served by this processor")]
    NotLocal(QueueId),

    #[error("Timed out waiting on {0}")]
    Timeout(QueueId),

    #[error("{queue} still holds {count} messages")]
    MessagesPending { queue: QueueId, count: usize },

    #[error("{0} was deleted")]
    QueueDeleted(QueueId),

    #[error("{0} already has a waiter")]
    QueueBusy(QueueId),

    #[error("Message size {size} outside [24, {capacity}]")]
    InvalidMessageSize { size: usize, capacity: usize },

    #[error("Malformed header: {0}")]
    Header(#[from] HeaderError),

    #[error("No transport bound for {0}")]
    NoTransport(ProcessorId),

    #[error("A transport is already bound for {0}")]
    DuplicateBinding(ProcessorId),

    #[error("Buffer pool error: {0}")]
    Pool(#[from] PoolError),

    #[error("Transport error on {queue}: {source}")]
    Transport {
        queue: QueueId,
        #[source]
        source: TransportError,
    },

    #[error("Channel to {remote}: {source}")]
    Channel {
        remote: ProcessorId,
        #[source]
        source: TransportError,
    },
}

/// The error taxonomy without context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Config,
    InvalidName,
    DuplicateName,
    NotFound,
    UnknownQueue,
    NotLocal,
    Timeout,
    MessagesPending,
    QueueDeleted,
    QueueBusy,
    InvalidMessageSize,
    Header,
    NoTransport,
    DuplicateBinding,
    OutOfBuffers,
    NoSizeClass,
    InvalidHandle,
    DoubleFree,
    Pool,
    TransportFull,
    PeerNotReady,
    Faulted,
    Transport,
}

impl ErrorKind {
    /// Returns whether retrying the same call later can succeed
    pub fn is_transient(self) -> bool {
        matches!(
            self,
            ErrorKind::OutOfBuffers
                | ErrorKind::TransportFull
                | ErrorKind::Timeout
                | ErrorKind::NotFound
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

fn transport_kind(error: &TransportError) -> ErrorKind {
    match error {
        TransportError::TransportFull => ErrorKind::TransportFull,
        TransportError::PeerNotReady => ErrorKind::PeerNotReady,
        TransportError::Faulted => ErrorKind::Faulted,
        _ => ErrorKind::Transport,
    }
}

impl MsgqError {
    /// Classifies the error
    pub fn kind(&self) -> ErrorKind {
        match self {
            MsgqError::Config(_) => ErrorKind::Config,
            MsgqError::InvalidName(_) => ErrorKind::InvalidName,
            MsgqError::DuplicateName(_) => ErrorKind::DuplicateName,
            MsgqError::NotFound(_) => ErrorKind::NotFound,
            MsgqError::UnknownQueue(_) => ErrorKind::UnknownQueue,
            MsgqError::NotLocal(_) => ErrorKind::NotLocal,
            MsgqError::Timeout(_) => ErrorKind::Timeout,
            MsgqError::MessagesPending { .. } => ErrorKind::MessagesPending,
            MsgqError::QueueDeleted(_) => ErrorKind::QueueDeleted,
            MsgqError::QueueBusy(_) => ErrorKind::QueueBusy,
            MsgqError::InvalidMessageSize { .. } => ErrorKind::InvalidMessageSize,
            MsgqError::Header(_) => ErrorKind::Header,
            MsgqError::NoTransport(_) => ErrorKind::NoTransport,
            MsgqError::DuplicateBinding(_) => ErrorKind::DuplicateBinding,
            MsgqError::Pool(err) => match err {
                PoolError::Config(_) => ErrorKind::Config,
                PoolError::OutOfBuffers { .. } => ErrorKind::OutOfBuffers,
                PoolError::NoSizeClass { .. } => ErrorKind::NoSizeClass,
                PoolError::InvalidHandle { .. } => ErrorKind::InvalidHandle,
                PoolError::DoubleFree { .. } => ErrorKind::DoubleFree,
                _ => ErrorKind::Pool,
            },
            MsgqError::Transport { source, .. } | MsgqError::Channel { source, .. } => {
                transport_kind(source)
            }
        }
    }

    pub(crate) fn transport(queue: QueueId, source: TransportError) -> Self {
        MsgqError::Transport { queue, source }
    }

    pub(crate) fn channel(remote: ProcessorId, source: TransportError) -> Self {
        MsgqError::Channel { remote, source }
    }
}

/// A failed `put`, handing the buffer back to the caller
#[derive(Debug, Error, PartialEq, Eq)]
#[error("Put of {handle} failed: {error}")]
pub struct PutError {
    #[source]
    pub error: MsgqError,
    pub handle: BufferHandle,
}

impl PutError {
    pub fn new(error: MsgqError, handle: BufferHandle) -> Self {
        Self { error, handle }
    }

    pub fn kind(&self) -> ErrorKind {
        self.error.kind()
    }

    /// Splits into the error and the returned buffer
    pub fn into_parts(self) -> (MsgqError, BufferHandle) {
        (self.error, self.handle)
    }
}
