//! Same-processor transport
//!
//! Both endpoints live in one domain, so "making a buffer visible" is a push
//! onto a bounded in-memory FIFO. The owner drains it with `recv` right
//! after each send; there is no handshake and no peer that can fail.

use crate::{ChannelState, Delivery, SendError, Transport, TransportError, TransportKind};
use buffer_pool::BufferHandle;
use core_types::{ProcessorId, QueueId};
use log::trace;
use parking_lot::Mutex;
use std::collections::VecDeque;

/// In-domain transport over a bounded FIFO
pub struct LocalTransport {
    capacity: usize,
    deliveries: Mutex<VecDeque<Delivery>>,
}

impl LocalTransport {
    /// Creates a transport holding at most `capacity` undrained buffers
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            deliveries: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    /// Returns the number of buffers not yet drained
    pub fn len(&self) -> usize {
        self.deliveries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the configured capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Transport for LocalTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Local
    }

    fn state(&self) -> ChannelState {
        ChannelState::Ready
    }

    fn open_channel(&self, _local: ProcessorId, _remote: ProcessorId) -> Result<(), TransportError> {
        Ok(())
    }

    fn close_channel(&self) {}

    fn send(&self, dst: QueueId, handle: BufferHandle) -> Result<(), SendError> {
        let mut deliveries = self.deliveries.lock();
        if deliveries.len() >= self.capacity {
            return Err(SendError::new(TransportError::TransportFull, handle));
        }
        trace!(target: "ipc", "local send {} -> {}", handle, dst);
        deliveries.push_back(Delivery { dst, handle });
        Ok(())
    }

    fn recv(&self) -> Result<Option<Delivery>, TransportError> {
        Ok(self.deliveries.lock().pop_front())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queue(index: u16) -> QueueId {
        QueueId::new(ProcessorId::GPP, index)
    }

    #[test]
    fn test_local_is_always_ready() {
        let transport = LocalTransport::new(4);
        assert_eq!(transport.kind(), TransportKind::Local);
        assert_eq!(transport.state(), ChannelState::Ready);
        transport
            .open_channel(ProcessorId::GPP, ProcessorId::GPP)
            .unwrap();
        transport.close_channel();
        assert_eq!(transport.state(), ChannelState::Ready);
    }

    #[test]
    fn test_local_preserves_order() {
        let transport = LocalTransport::new(4);
        transport.send(queue(0), BufferHandle::from_offset(0x100)).unwrap();
        transport.send(queue(1), BufferHandle::from_offset(0x200)).unwrap();
        assert_eq!(transport.len(), 2);

        let first = transport.recv().unwrap().unwrap();
        assert_eq!(first.dst, queue(0));
        assert_eq!(first.handle.offset(), 0x100);
        let second = transport.recv().unwrap().unwrap();
        assert_eq!(second.dst, queue(1));
        assert_eq!(second.handle.offset(), 0x200);
        assert!(transport.recv().unwrap().is_none());
    }

    #[test]
    fn test_local_full_returns_handle() {
        let transport = LocalTransport::new(1);
        transport.send(queue(0), BufferHandle::from_offset(8)).unwrap();

        let err = transport
            .send(queue(0), BufferHandle::from_offset(16))
            .unwrap_err();
        assert_eq!(err.error, TransportError::TransportFull);
        assert_eq!(err.handle.offset(), 16);
        assert_eq!(transport.len(), 1);
    }

    #[test]
    fn test_default_notify_handler_is_accepted() {
        let transport = LocalTransport::new(1);
        transport
            .set_notify_handler(std::sync::Arc::new(|_| {}))
            .unwrap();
        transport.clear_notify_handler();
        assert!(transport.is_empty());
    }
}
