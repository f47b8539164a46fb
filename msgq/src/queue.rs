//! Per-queue store of delivered buffers
//!
//! Arrival order is kept; a high-priority message goes to the head.

use buffer_pool::BufferHandle;
use ipc::Priority;
use std::collections::VecDeque;

#[derive(Debug, PartialEq, Eq)]
pub enum QueueError {
    /// The queue is at capacity; the buffer is handed back
    Full(BufferHandle),
}

/// Bounded FIFO of buffer handles
#[derive(Debug)]
pub struct PendingQueue {
    capacity: usize,
    messages: VecDeque<BufferHandle>,
}

impl PendingQueue {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity,
            messages: VecDeque::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Stores a delivered buffer, or hands it back if the queue is full
    pub fn push(&mut self, handle: BufferHandle, priority: Priority) -> Result<(), QueueError> {
        if self.messages.len() >= self.capacity {
            return Err(QueueError::Full(handle));
        }
        match priority {
            Priority::Normal => self.messages.push_back(handle),
            Priority::High => self.messages.push_front(handle),
        }
        Ok(())
    }

    pub fn pop(&mut self) -> Option<BufferHandle> {
        self.messages.pop_front()
    }

    /// Takes every pending buffer, head first
    pub fn drain(&mut self) -> Vec<BufferHandle> {
        self.messages.drain(..).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buf(offset: u32) -> BufferHandle {
        BufferHandle::from_offset(offset)
    }

    #[test]
    fn test_arrival_order() {
        let mut queue = PendingQueue::with_capacity(4);
        queue.push(buf(8), Priority::Normal).unwrap();
        queue.push(buf(16), Priority::Normal).unwrap();
        queue.push(buf(24), Priority::Normal).unwrap();

        assert_eq!(queue.pop().unwrap().offset(), 8);
        assert_eq!(queue.pop().unwrap().offset(), 16);
        assert_eq!(queue.pop().unwrap().offset(), 24);
        assert_eq!(queue.pop(), None);
    }

    #[test]
    fn test_high_priority_jumps_ahead() {
        let mut queue = PendingQueue::with_capacity(4);
        queue.push(buf(8), Priority::Normal).unwrap();
        queue.push(buf(16), Priority::High).unwrap();
        assert_eq!(queue.pop().unwrap().offset(), 16);
        assert_eq!(queue.pop().unwrap().offset(), 8);
    }

    #[test]
    fn test_full_queue_returns_buffer() {
        let mut queue = PendingQueue::with_capacity(2);
        queue.push(buf(8), Priority::Normal).unwrap();
        queue.push(buf(16), Priority::Normal).unwrap();
        assert_eq!(
            queue.push(buf(24), Priority::Normal),
            Err(QueueError::Full(buf(24)))
        );
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.pop().map(|handle| handle.offset()), Some(8));
        queue.push(buf(24), Priority::High).unwrap();
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_drain_empties_in_order() {
        let mut queue = PendingQueue::with_capacity(4);
        queue.push(buf(8), Priority::Normal).unwrap();
        queue.push(buf(16), Priority::Normal).unwrap();
        let drained: Vec<u32> = queue.drain().iter().map(BufferHandle::offset).collect();
        assert_eq!(drained, vec![8, 16]);
        assert!(queue.is_empty());
    }
}
