//! The message queue registry
//!
//! One `MessageQueues` instance serves one processor. It owns the queue
//! table, routes `put` to the transport bound to the destination's
//! processor, and parks `get` callers until a delivery or a delete wakes
//! them.
//!
//! Lock order is queue table, then locate table, then the allocator;
//! transports are entered with at most the queue table held.

use crate::locate::{
    LocateReply, LocateRequest, LocateStatus, LocateTable, LOCATE_REPLY_LEN, LOCATE_REQUEST_LEN,
};
use crate::queue::{PendingQueue, QueueError};
use crate::{MsgqError, PutError};
use buffer_pool::{BufferHandle, BufferPool, PoolStats};
use core_types::{ProcessorId, QueueId};
use ipc::{
    ChannelState, Delivery, LocalTransport, MessageHeader, MessageKind, Priority, SendError,
    Transport, HEADER_SIZE,
};
use lifecycle::{Deadline, Timeout};
use log::{debug, info, trace, warn};
use parking_lot::{Condvar, Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Longest queue name, in bytes
pub const MAX_NAME_LEN: usize = 32;

const PUT_RETRY_INTERVAL: Duration = Duration::from_millis(1);
const MAX_QUEUES: usize = QueueId::CONTROL_INDEX as usize;

/// Which transport serves a queue created on this processor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum TransportBinding {
    /// Reachable from this processor only
    #[default]
    Local,
    /// Also visible to `locate` from the given peer
    Remote(ProcessorId),
}

pub(crate) fn check_name(name: &str) -> Result<(), MsgqError> {
    if name.is_empty() || name.len() > MAX_NAME_LEN {
        return Err(MsgqError::InvalidName(name.to_string()));
    }
    Ok(())
}

struct QueueEntry {
    name: String,
    binding: TransportBinding,
    /// Distinguishes this queue from a later one reusing its index
    epoch: u64,
    pending: PendingQueue,
    waiting: bool,
}

#[derive(Default)]
struct QueueTable {
    queues: HashMap<u16, QueueEntry>,
    names: HashMap<String, u16>,
    next_index: u16,
    next_epoch: u64,
}

impl QueueTable {
    fn free_index(&mut self) -> Option<u16> {
        for _ in 0..MAX_QUEUES {
            let index = self.next_index;
            self.next_index = if index as usize + 1 >= MAX_QUEUES {
                0
            } else {
                index + 1
            };
            if !self.queues.contains_key(&index) {
                return Some(index);
            }
        }
        None
    }
}

struct Inner {
    processor: ProcessorId,
    pool: Arc<BufferPool>,
    local: LocalTransport,
    table: Mutex<QueueTable>,
    arrived: Condvar,
    transports: RwLock<HashMap<ProcessorId, Arc<dyn Transport>>>,
    locates: Mutex<LocateTable>,
    located: Condvar,
}

impl Inner {
    fn transport(&self, remote: ProcessorId) -> Result<Arc<dyn Transport>, MsgqError> {
        self.transports
            .read()
            .get(&remote)
            .cloned()
            .ok_or(MsgqError::NoTransport(remote))
    }

    fn read_header(&self, handle: &BufferHandle) -> Result<MessageHeader, MsgqError> {
        let mut raw = [0u8; HEADER_SIZE];
        self.pool.read(handle, 0, &mut raw)?;
        Ok(MessageHeader::decode(&raw)?)
    }

    fn write_header(&self, handle: &BufferHandle, header: &MessageHeader) -> Result<(), MsgqError> {
        self.pool.write(handle, 0, &header.encode())?;
        Ok(())
    }

    /// Checks the sender's header and addresses the message to `queue`
    fn stamp(&self, queue: QueueId, handle: &BufferHandle) -> Result<(), MsgqError> {
        if queue.is_none() || queue.is_control() {
            return Err(MsgqError::UnknownQueue(queue));
        }
        let capacity = self.pool.capacity(handle)?;
        let mut header = self.read_header(handle)?;
        let size = header.size as usize;
        if size < HEADER_SIZE || size > capacity {
            return Err(MsgqError::InvalidMessageSize { size, capacity });
        }
        header.dst = queue;
        header.kind = MessageKind::Data;
        header.pool = self.pool.pool_of(handle)?;
        self.write_header(handle, &header)
    }

    fn drop_message(&self, handle: BufferHandle, reason: &str) {
        warn!(target: "msgq", "{}: dropping {}: {}", self.processor, handle, reason);
        if let Err(err) = self.pool.free(handle) {
            warn!(target: "msgq", "{}: could not free dropped buffer: {}", self.processor, err);
        }
    }

    fn deliver(&self, table: &mut QueueTable, delivery: Delivery) {
        let Delivery { dst, handle } = delivery;
        if dst.processor() != self.processor {
            return self.drop_message(handle, &format!("misrouted to {}", dst));
        }
        let header = match self.read_header(&handle) {
            Ok(header) => header,
            Err(err) => return self.drop_message(handle, &err.to_string()),
        };

        if dst.is_control() {
            return match header.kind {
                MessageKind::LocateRequest => self.answer_locate(table, header, handle),
                MessageKind::LocateReply => self.finish_locate(handle),
                MessageKind::Data => self.drop_message(handle, "data sent to control address"),
            };
        }
        if header.kind != MessageKind::Data {
            return self.drop_message(handle, &format!("{:?} sent to {}", header.kind, dst));
        }

        let entry = match table.queues.get_mut(&dst.index()) {
            Some(entry) => entry,
            None => return self.drop_message(handle, &format!("{} does not exist", dst)),
        };
        match entry.pending.push(handle, header.priority) {
            Ok(()) => {
                trace!(target: "msgq", "{}: delivered msg {} to {}", self.processor, header.msg_id, dst);
                self.arrived.notify_all();
            }
            Err(QueueError::Full(handle)) => {
                self.drop_message(handle, &format!("{} is full", dst))
            }
        }
    }

    fn drain_local(&self, table: &mut QueueTable) {
        while let Ok(Some(delivery)) = self.local.recv() {
            self.deliver(table, delivery);
        }
    }

    /// Drains everything `remote` has published to us
    fn service(&self, remote: ProcessorId) -> Result<usize, MsgqError> {
        let transport = self.transport(remote)?;
        let mut table = self.table.lock();
        let mut delivered = 0;
        loop {
            match transport.recv() {
                Ok(Some(delivery)) => {
                    self.deliver(&mut table, delivery);
                    delivered += 1;
                }
                Ok(None) => return Ok(delivered),
                Err(err) => return Err(MsgqError::channel(remote, err)),
            }
        }
    }

    fn answer_locate(&self, table: &QueueTable, request: MessageHeader, handle: BufferHandle) {
        let mut payload = [0u8; LOCATE_REQUEST_LEN];
        let decoded = self
            .pool
            .read(&handle, HEADER_SIZE, &mut payload)
            .ok()
            .and_then(|_| LocateRequest::decode(&payload));
        let locate = match decoded {
            Some(locate) => locate,
            None => return self.drop_message(handle, "malformed locate request"),
        };

        let requester = request.src.processor();
        let queue = table
            .names
            .get(&locate.name)
            .and_then(|index| table.queues.get(index).map(|entry| (*index, entry)))
            .filter(|(_, entry)| entry.binding == TransportBinding::Remote(requester))
            .map(|(index, _)| QueueId::new(self.processor, index));

        let reply = LocateReply {
            token: locate.token,
            queue,
        };
        let header = MessageHeader {
            size: (HEADER_SIZE + LOCATE_REPLY_LEN) as u32,
            dst: request.src,
            src: QueueId::control(self.processor),
            kind: MessageKind::LocateReply,
            ..request
        };
        let written = self
            .write_header(&handle, &header)
            .and_then(|_| Ok(self.pool.write(&handle, HEADER_SIZE, &reply.encode())?));
        if let Err(err) = written {
            return self.drop_message(handle, &err.to_string());
        }

        let transport = match self.transport(requester) {
            Ok(transport) => transport,
            Err(err) => return self.drop_message(handle, &err.to_string()),
        };
        match transport.send(request.src, handle) {
            Ok(()) => debug!(
                target: "msgq",
                "{}: answered locate {:?} from {}: {:?}",
                self.processor, locate.name, requester, queue
            ),
            Err(SendError { error, handle }) => {
                self.drop_message(handle, &format!("locate reply not sent: {}", error))
            }
        }
    }

    fn finish_locate(&self, handle: BufferHandle) {
        let mut payload = [0u8; LOCATE_REPLY_LEN];
        let reply = self
            .pool
            .read(&handle, HEADER_SIZE, &mut payload)
            .ok()
            .and_then(|_| LocateReply::decode(&payload));
        if let Err(err) = self.pool.free(handle) {
            warn!(target: "msgq", "{}: could not free locate reply: {}", self.processor, err);
        }

        match reply {
            Some(reply) => {
                let mut locates = self.locates.lock();
                if locates.answer(reply) {
                    self.located.notify_all();
                } else {
                    debug!(target: "msgq", "{}: late locate reply {}", self.processor, reply.token);
                }
            }
            None => warn!(target: "msgq", "{}: malformed locate reply", self.processor),
        }
    }

    fn send_locate(
        &self,
        remote: ProcessorId,
        transport: &Arc<dyn Transport>,
        token: u32,
        name: &str,
    ) -> Result<(), MsgqError> {
        let handle = self.pool.allocate(HEADER_SIZE + LOCATE_REQUEST_LEN)?;
        let mut header = MessageHeader::new_data((HEADER_SIZE + LOCATE_REQUEST_LEN) as u32)
            .with_src(QueueId::control(self.processor))
            .with_msg_id(token);
        header.dst = QueueId::control(remote);
        header.kind = MessageKind::LocateRequest;
        let request = LocateRequest {
            token,
            name: name.to_string(),
        };
        let written = self
            .pool
            .pool_of(&handle)
            .map_err(MsgqError::from)
            .and_then(|pool| {
                header.pool = pool;
                self.write_header(&handle, &header)
            })
            .and_then(|_| Ok(self.pool.write(&handle, HEADER_SIZE, &request.encode())?));
        if let Err(err) = written {
            self.drop_message(handle, &err.to_string());
            return Err(err);
        }

        self.locates.lock().expect_reply(token);
        if let Err(SendError { error, handle }) = transport.send(header.dst, handle) {
            self.locates.lock().withdraw(token);
            if let Err(err) = self.pool.free(handle) {
                warn!(target: "msgq", "{}: could not free locate request: {}", self.processor, err);
            }
            return Err(MsgqError::channel(remote, error));
        }
        Ok(())
    }

    fn await_locate(&self, token: u32, deadline: Deadline) -> Option<QueueId> {
        let mut locates = self.locates.lock();
        loop {
            match locates.status(token) {
                LocateStatus::Found(queue) => return Some(queue),
                LocateStatus::NotFound => return None,
                LocateStatus::Waiting => {}
            }
            match deadline.instant() {
                Some(at) => {
                    if self.located.wait_until(&mut locates, at).timed_out() {
                        return match locates.status(token) {
                            LocateStatus::Found(queue) => Some(queue),
                            _ => None,
                        };
                    }
                }
                None => self.located.wait(&mut locates),
            }
        }
    }
}

/// The MSGQ application interface for one processor
///
/// Cloning yields another handle to the same registry.
#[derive(Clone)]
pub struct MessageQueues {
    inner: Arc<Inner>,
}

impl MessageQueues {
    /// Creates a registry with no queues and no remote transports
    pub fn new(processor: ProcessorId, pool: Arc<BufferPool>, local_fifo_capacity: usize) -> Self {
        info!(target: "msgq", "{}: registry up", processor);
        Self {
            inner: Arc::new(Inner {
                processor,
                pool,
                local: LocalTransport::new(local_fifo_capacity),
                table: Mutex::new(QueueTable::default()),
                arrived: Condvar::new(),
                transports: RwLock::new(HashMap::new()),
                locates: Mutex::new(LocateTable::new()),
                located: Condvar::new(),
            }),
        }
    }

    pub fn processor(&self) -> ProcessorId {
        self.inner.processor
    }

    pub fn pool(&self) -> &Arc<BufferPool> {
        &self.inner.pool
    }

    /// Binds the transport that reaches `remote`
    ///
    /// The transport's notifications drive delivery from then on.
    pub fn attach_transport(
        &self,
        remote: ProcessorId,
        transport: Arc<dyn Transport>,
    ) -> Result<(), MsgqError> {
        if remote == self.inner.processor {
            return Err(MsgqError::Config(format!(
                "cannot bind a transport to local processor {}",
                remote
            )));
        }
        let mut transports = self.inner.transports.write();
        if transports.contains_key(&remote) {
            return Err(MsgqError::DuplicateBinding(remote));
        }

        let weak = Arc::downgrade(&self.inner);
        transport
            .set_notify_handler(Arc::new(move |line| {
                if let Some(inner) = weak.upgrade() {
                    match inner.service(remote) {
                        Ok(delivered) => {
                            trace!(target: "msgq", "{}: {} delivered {} on {}", inner.processor, remote, delivered, line)
                        }
                        Err(err) => debug!(target: "msgq", "{}: service {} failed: {}", inner.processor, remote, err),
                    }
                }
            }))
            .map_err(|err| MsgqError::channel(remote, err))?;

        info!(
            target: "msgq",
            "{}: {} transport bound for {}",
            self.inner.processor,
            transport.kind(),
            remote
        );
        transports.insert(remote, transport);
        Ok(())
    }

    /// Unbinds and closes the transport for `remote`
    pub fn detach_transport(&self, remote: ProcessorId) -> Result<Arc<dyn Transport>, MsgqError> {
        let transport = self
            .inner
            .transports
            .write()
            .remove(&remote)
            .ok_or(MsgqError::NoTransport(remote))?;
        transport.clear_notify_handler();
        transport.close_channel();
        Ok(transport)
    }

    /// Opens the channel to `remote`, waiting for its handshake
    ///
    /// Buffers the transport discarded while starting a fresh session are
    /// freed here, whether or not the handshake completes.
    pub fn open(&self, remote: ProcessorId) -> Result<(), MsgqError> {
        let transport = self.inner.transport(remote)?;
        let opened = transport.open_channel(self.inner.processor, remote);
        for handle in transport.take_stranded() {
            self.inner.drop_message(handle, "stranded by a session reset");
        }
        opened.map_err(|err| MsgqError::channel(remote, err))?;
        self.inner.service(remote)?;
        Ok(())
    }

    pub fn close(&self, remote: ProcessorId) -> Result<(), MsgqError> {
        self.inner.transport(remote)?.close_channel();
        Ok(())
    }

    pub fn channel_state(&self, remote: ProcessorId) -> Result<ChannelState, MsgqError> {
        Ok(self.inner.transport(remote)?.state())
    }

    /// Creates a queue on this processor
    pub fn create(&self, name: &str, binding: TransportBinding) -> Result<QueueId, MsgqError> {
        check_name(name)?;
        if binding == TransportBinding::Remote(self.inner.processor) {
            return Err(MsgqError::Config(format!(
                "queue {:?} exported to its own processor",
                name
            )));
        }
        let capacity = self.inner.pool.total_buffers();
        let mut table = self.inner.table.lock();
        if table.names.contains_key(name) {
            return Err(MsgqError::DuplicateName(name.to_string()));
        }
        let index = table
            .free_index()
            .ok_or_else(|| MsgqError::Config("queue table full".to_string()))?;
        let epoch = table.next_epoch;
        table.next_epoch += 1;
        table.queues.insert(
            index,
            QueueEntry {
                name: name.to_string(),
                binding,
                epoch,
                pending: PendingQueue::with_capacity(capacity),
                waiting: false,
            },
        );
        table.names.insert(name.to_string(), index);

        let queue = QueueId::new(self.inner.processor, index);
        info!(target: "msgq", "created {:?} as {} ({:?})", name, queue, binding);
        Ok(queue)
    }

    /// Deletes a queue, returning how many pending messages were discarded
    ///
    /// A blocked `get` on the queue wakes with `QueueDeleted`.
    pub fn delete(&self, queue: QueueId, discard_pending: bool) -> Result<usize, MsgqError> {
        if queue.processor() != self.inner.processor {
            return Err(MsgqError::NotLocal(queue));
        }
        let mut table = self.inner.table.lock();
        let entry = table
            .queues
            .get(&queue.index())
            .ok_or(MsgqError::UnknownQueue(queue))?;
        if !entry.pending.is_empty() && !discard_pending {
            return Err(MsgqError::MessagesPending {
                queue,
                count: entry.pending.len(),
            });
        }

        let mut entry = match table.queues.remove(&queue.index()) {
            Some(entry) => entry,
            None => return Err(MsgqError::UnknownQueue(queue)),
        };
        table.names.remove(&entry.name);
        let discarded = entry.pending.drain();
        let count = discarded.len();
        for handle in discarded {
            if let Err(err) = self.inner.pool.free(handle) {
                warn!(target: "msgq", "could not free discarded buffer: {}", err);
            }
        }
        self.inner.arrived.notify_all();
        drop(table);

        if count > 0 {
            warn!(target: "msgq", "deleted {:?} ({}), discarded {} messages", entry.name, queue, count);
        } else {
            info!(target: "msgq", "deleted {:?} ({})", entry.name, queue);
        }
        Ok(count)
    }

    /// Resolves a queue name, asking every ready peer if it is not local
    ///
    /// `NotFound` is the routine answer when no peer knows the name before
    /// `timeout`; callers retry. A request that cannot be sent fails the
    /// call with that peer's transport error.
    pub fn locate(&self, name: &str, timeout: Timeout) -> Result<QueueId, MsgqError> {
        check_name(name)?;
        let inner = &self.inner;
        if let Some(index) = inner.table.lock().names.get(name) {
            return Ok(QueueId::new(inner.processor, *index));
        }

        let deadline = timeout.start();
        let mut peers: Vec<(ProcessorId, Arc<dyn Transport>)> = inner
            .transports
            .read()
            .iter()
            .filter(|(_, transport)| transport.state() == ChannelState::Ready)
            .map(|(remote, transport)| (*remote, transport.clone()))
            .collect();
        peers.sort_by_key(|(remote, _)| *remote);

        let token = inner.locates.lock().register();
        let mut result = Ok(());
        for (remote, transport) in &peers {
            result = inner.send_locate(*remote, transport, token, name);
            if result.is_err() {
                break;
            }
        }
        let found = match result {
            Ok(()) => inner.await_locate(token, deadline),
            Err(_) => None,
        };
        inner.locates.lock().finish(token);
        result?;

        match found {
            Some(queue) => {
                debug!(target: "msgq", "{}: located {:?} at {}", inner.processor, name, queue);
                Ok(queue)
            }
            None => Err(MsgqError::NotFound(name.to_string())),
        }
    }

    /// Sends a message
    ///
    /// The header must already hold a valid `size`. Never waits for the
    /// destination to drain; on failure the buffer comes back in the error.
    pub fn put(&self, queue: QueueId, handle: BufferHandle) -> Result<(), PutError> {
        let inner = &self.inner;
        if let Err(err) = inner.stamp(queue, &handle) {
            return Err(PutError::new(err, handle));
        }

        if queue.processor() == inner.processor {
            let mut table = inner.table.lock();
            if !table.queues.contains_key(&queue.index()) {
                return Err(PutError::new(MsgqError::UnknownQueue(queue), handle));
            }
            if let Err(SendError { error, handle }) = inner.local.send(queue, handle) {
                return Err(PutError::new(MsgqError::transport(queue, error), handle));
            }
            inner.drain_local(&mut table);
            return Ok(());
        }

        let transport = match inner.transport(queue.processor()) {
            Ok(transport) => transport,
            Err(err) => return Err(PutError::new(err, handle)),
        };
        trace!(target: "msgq", "{}: put {} to {}", inner.processor, handle, queue);
        transport
            .send(queue, handle)
            .map_err(|SendError { error, handle }| {
                PutError::new(MsgqError::transport(queue, error), handle)
            })
    }

    /// Sends a message, retrying while the transport is full
    ///
    /// Every other failure is returned at once, like `put`.
    pub fn put_blocking(
        &self,
        queue: QueueId,
        handle: BufferHandle,
        timeout: Timeout,
    ) -> Result<(), PutError> {
        let deadline = timeout.start();
        let mut handle = handle;
        loop {
            match self.put(queue, handle) {
                Err(err)
                    if err.kind() == crate::ErrorKind::TransportFull && !deadline.is_expired() =>
                {
                    handle = err.handle;
                    thread::sleep(PUT_RETRY_INTERVAL);
                }
                result => return result,
            }
        }
    }

    /// Takes the next message from a local queue, waiting up to `timeout`
    ///
    /// Only one caller may wait on a queue at a time; a second gets
    /// `QueueBusy`.
    pub fn get(&self, queue: QueueId, timeout: Timeout) -> Result<BufferHandle, MsgqError> {
        if queue.processor() != self.inner.processor {
            return Err(MsgqError::NotLocal(queue));
        }
        let deadline = timeout.start();
        let mut table = self.inner.table.lock();
        let epoch = {
            let entry = table
                .queues
                .get_mut(&queue.index())
                .ok_or(MsgqError::UnknownQueue(queue))?;
            if entry.waiting {
                return Err(MsgqError::QueueBusy(queue));
            }
            if let Some(handle) = entry.pending.pop() {
                return Ok(handle);
            }
            entry.waiting = true;
            entry.epoch
        };

        loop {
            if deadline.is_expired() {
                if let Some(entry) = table.queues.get_mut(&queue.index()) {
                    entry.waiting = false;
                }
                return Err(MsgqError::Timeout(queue));
            }
            match deadline.instant() {
                Some(at) => {
                    self.inner.arrived.wait_until(&mut table, at);
                }
                None => self.inner.arrived.wait(&mut table),
            }

            let entry = match table.queues.get_mut(&queue.index()) {
                Some(entry) if entry.epoch == epoch => entry,
                _ => return Err(MsgqError::QueueDeleted(queue)),
            };
            if let Some(handle) = entry.pending.pop() {
                entry.waiting = false;
                return Ok(handle);
            }
        }
    }

    /// Returns how many messages wait on a local queue
    pub fn pending(&self, queue: QueueId) -> Result<usize, MsgqError> {
        if queue.processor() != self.inner.processor {
            return Err(MsgqError::NotLocal(queue));
        }
        self.inner
            .table
            .lock()
            .queues
            .get(&queue.index())
            .map(|entry| entry.pending.len())
            .ok_or(MsgqError::UnknownQueue(queue))
    }

    /// Drains every ready transport, for hosts without notifications
    pub fn poll(&self) -> Result<usize, MsgqError> {
        let mut ready: Vec<ProcessorId> = self
            .inner
            .transports
            .read()
            .iter()
            .filter(|(_, transport)| transport.state() == ChannelState::Ready)
            .map(|(remote, _)| *remote)
            .collect();
        ready.sort();
        let mut delivered = 0;
        for remote in ready {
            delivered += self.inner.service(remote)?;
        }
        Ok(delivered)
    }

    /// Takes a buffer of at least `size` bytes, header included
    pub fn alloc(&self, size: usize) -> Result<BufferHandle, MsgqError> {
        Ok(self.inner.pool.allocate(size)?)
    }

    pub fn free(&self, handle: BufferHandle) -> Result<(), MsgqError> {
        Ok(self.inner.pool.free(handle)?)
    }

    /// Fills a buffer with a fresh data header and `payload`
    pub fn write_message(
        &self,
        handle: &BufferHandle,
        msg_id: u32,
        payload: &[u8],
    ) -> Result<(), MsgqError> {
        let pool = &self.inner.pool;
        let capacity = pool.capacity(handle)?;
        let size = HEADER_SIZE + payload.len();
        if size > capacity {
            return Err(MsgqError::InvalidMessageSize { size, capacity });
        }
        let mut header = MessageHeader::new_data(size as u32).with_msg_id(msg_id);
        header.pool = pool.pool_of(handle)?;
        self.inner.write_header(handle, &header)?;
        pool.write(handle, HEADER_SIZE, payload)?;
        Ok(())
    }

    pub fn header(&self, handle: &BufferHandle) -> Result<MessageHeader, MsgqError> {
        self.inner.read_header(handle)
    }

    /// Copies out the payload the header's `size` covers
    pub fn payload(&self, handle: &BufferHandle) -> Result<Vec<u8>, MsgqError> {
        let header = self.inner.read_header(handle)?;
        let capacity = self.inner.pool.capacity(handle)?;
        let size = header.size as usize;
        if size < HEADER_SIZE || size > capacity {
            return Err(MsgqError::InvalidMessageSize { size, capacity });
        }
        let mut payload = vec![0u8; header.payload_len()];
        self.inner.pool.read(handle, HEADER_SIZE, &mut payload)?;
        Ok(payload)
    }

    pub fn set_reply_to(&self, handle: &BufferHandle, queue: QueueId) -> Result<(), MsgqError> {
        let header = self.inner.read_header(handle)?.with_src(queue);
        self.inner.write_header(handle, &header)
    }

    pub fn reply_to(&self, handle: &BufferHandle) -> Result<Option<QueueId>, MsgqError> {
        let src = self.inner.read_header(handle)?.src;
        Ok((!src.is_none()).then_some(src))
    }

    pub fn set_priority(&self, handle: &BufferHandle, priority: Priority) -> Result<(), MsgqError> {
        let header = self.inner.read_header(handle)?.with_priority(priority);
        self.inner.write_header(handle, &header)
    }

    pub fn stats(&self) -> Vec<PoolStats> {
        self.inner.pool.stats()
    }

    /// Closes every channel and deletes every queue
    ///
    /// Pending messages are discarded and their buffers freed; the count is
    /// returned. Waiters wake with `QueueDeleted`.
    pub fn shutdown(&self) -> usize {
        let inner = &self.inner;
        let transports: Vec<(ProcessorId, Arc<dyn Transport>)> = inner
            .transports
            .read()
            .iter()
            .map(|(remote, transport)| (*remote, transport.clone()))
            .collect();
        for (remote, transport) in transports {
            transport.clear_notify_handler();
            transport.close_channel();
            debug!(target: "msgq", "{}: closed channel to {}", inner.processor, remote);
        }

        let mut table = inner.table.lock();
        inner.drain_local(&mut table);
        let mut discarded = 0;
        for (_, mut entry) in table.queues.drain() {
            for handle in entry.pending.drain() {
                discarded += 1;
                if let Err(err) = inner.pool.free(handle) {
                    warn!(target: "msgq", "could not free discarded buffer: {}", err);
                }
            }
        }
        table.names.clear();
        inner.arrived.notify_all();
        drop(table);

        if discarded > 0 {
            warn!(target: "msgq", "{}: shutdown discarded {} messages", inner.processor, discarded);
        }
        info!(target: "msgq", "{}: registry down", inner.processor);
        discarded
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;
    use buffer_pool::PoolConfig;
    use hal::{HostSharedRegion, SharedRegion};
    use std::time::Instant;

    fn registry(pools: &[PoolConfig]) -> MessageQueues {
        let bytes = BufferPool::required_bytes(pools).unwrap();
        let region: Arc<dyn SharedRegion> = Arc::new(HostSharedRegion::new(bytes));
        let pool = Arc::new(BufferPool::new(region, 0, pools).unwrap());
        MessageQueues::new(ProcessorId::GPP, pool, 16)
    }

    fn default_registry() -> MessageQueues {
        registry(&[PoolConfig::new(8, 64), PoolConfig::new(4, 256)])
    }

    /// Waits until another thread is parked in `get` on `queue`
    fn wait_for_waiter(queues: &MessageQueues, queue: QueueId) {
        let start = Instant::now();
        while queues.get(queue, Timeout::Immediate) != Err(MsgqError::QueueBusy(queue)) {
            assert!(start.elapsed() < Duration::from_secs(5), "no waiter on {}", queue);
            thread::yield_now();
        }
    }

    fn message(queues: &MessageQueues, msg_id: u32, payload: &[u8]) -> BufferHandle {
        let handle = queues.alloc(HEADER_SIZE + payload.len()).unwrap();
        queues.write_message(&handle, msg_id, payload).unwrap();
        handle
    }

    #[test]
    fn test_round_trip_preserves_message() {
        let queues = default_registry();
        let queue = queues.create("Q1", TransportBinding::Local).unwrap();
        let payload: Vec<u8> = (0..100u8).collect();

        queues.put(queue, message(&queues, 42, &payload)).unwrap();
        let handle = queues.get(queue, Timeout::Immediate).unwrap();

        let header = queues.header(&handle).unwrap();
        assert_eq!(header.size as usize, HEADER_SIZE + payload.len());
        assert_eq!(header.msg_id, 42);
        assert_eq!(header.dst, queue);
        assert_eq!(queues.payload(&handle).unwrap(), payload);
        queues.free(handle).unwrap();
        assert_eq!(queues.pool().in_use(), 0);
    }

    #[test]
    fn test_fifo_order() {
        let queues = default_registry();
        let queue = queues.create("fifo", TransportBinding::Local).unwrap();
        for id in 0..5 {
            queues.put(queue, message(&queues, id, b"x")).unwrap();
        }
        assert_eq!(queues.pending(queue).unwrap(), 5);
        for id in 0..5 {
            let handle = queues.get(queue, Timeout::Immediate).unwrap();
            assert_eq!(queues.header(&handle).unwrap().msg_id, id);
            queues.free(handle).unwrap();
        }
    }

    #[test]
    fn test_high_priority_first() {
        let queues = default_registry();
        let queue = queues.create("prio", TransportBinding::Local).unwrap();
        queues.put(queue, message(&queues, 1, b"normal")).unwrap();
        let urgent = message(&queues, 2, b"urgent");
        queues.set_priority(&urgent, Priority::High).unwrap();
        queues.put(queue, urgent).unwrap();

        let first = queues.get(queue, Timeout::Immediate).unwrap();
        assert_eq!(queues.header(&first).unwrap().msg_id, 2);
        queues.free(first).unwrap();
    }

    #[test]
    fn test_get_times_out() {
        let queues = default_registry();
        let queue = queues.create("Q1", TransportBinding::Local).unwrap();

        let start = Instant::now();
        let err = queues.get(queue, Timeout::from_millis(100)).unwrap_err();
        let elapsed = start.elapsed();
        assert_eq!(err, MsgqError::Timeout(queue));
        assert!(elapsed >= Duration::from_millis(100));
        assert!(elapsed < Duration::from_secs(2));

        // The waiter slot is released
        assert_eq!(
            queues.get(queue, Timeout::Immediate),
            Err(MsgqError::Timeout(queue))
        );
    }

    #[test]
    fn test_delete_with_pending() {
        let queues = default_registry();
        let queue = queues.create("Q1", TransportBinding::Local).unwrap();
        queues.put(queue, message(&queues, 1, b"left behind")).unwrap();

        assert_eq!(
            queues.delete(queue, false),
            Err(MsgqError::MessagesPending { queue, count: 1 })
        );
        assert_eq!(queues.pool().in_use(), 1);

        assert_eq!(queues.delete(queue, true), Ok(1));
        assert_eq!(queues.pool().in_use(), 0);
        assert_eq!(
            queues.get(queue, Timeout::Immediate),
            Err(MsgqError::UnknownQueue(queue))
        );
        assert!(queues.create("Q1", TransportBinding::Local).is_ok());
    }

    #[test]
    fn test_delete_wakes_blocked_get() {
        let queues = default_registry();
        let queue = queues.create("Q2", TransportBinding::Local).unwrap();

        let waiter = {
            let queues = queues.clone();
            thread::spawn(move || queues.get(queue, Timeout::Forever))
        };
        wait_for_waiter(&queues, queue);

        queues.delete(queue, true).unwrap();
        assert_eq!(waiter.join().unwrap(), Err(MsgqError::QueueDeleted(queue)));
    }

    #[test]
    fn test_blocked_get_receives_put() {
        let queues = default_registry();
        let queue = queues.create("wake", TransportBinding::Local).unwrap();

        let waiter = {
            let queues = queues.clone();
            thread::spawn(move || {
                let handle = queues.get(queue, Timeout::from_secs(5)).unwrap();
                let id = queues.header(&handle).unwrap().msg_id;
                queues.free(handle).unwrap();
                id
            })
        };
        wait_for_waiter(&queues, queue);
        queues.put(queue, message(&queues, 77, b"hello")).unwrap();
        assert_eq!(waiter.join().unwrap(), 77);
    }

    #[test]
    fn test_put_at_get_deadline_is_kept() {
        let queues = default_registry();
        let queue = queues.create("race", TransportBinding::Local).unwrap();

        for round in 0..200u32 {
            let getter = {
                let queues = queues.clone();
                thread::spawn(move || queues.get(queue, Timeout::from_millis(2)))
            };
            // Land the put anywhere from just before to just after the deadline
            thread::sleep(Duration::from_micros(1500 + u64::from(round % 10) * 100));
            queues.put(queue, message(&queues, round, b"race")).unwrap();

            let handle = match getter.join().unwrap() {
                Ok(handle) => {
                    assert_eq!(queues.pending(queue), Ok(0));
                    handle
                }
                Err(MsgqError::Timeout(timed_out)) => {
                    assert_eq!(timed_out, queue);
                    assert_eq!(queues.pending(queue), Ok(1));
                    queues.get(queue, Timeout::Immediate).unwrap()
                }
                Err(other) => panic!("round {}: unexpected {}", round, other),
            };
            assert_eq!(queues.header(&handle).unwrap().msg_id, round);
            queues.free(handle).unwrap();
        }
        assert_eq!(queues.pool().in_use(), 0);
    }

    #[test]
    fn test_create_rejects_bad_names() {
        let queues = default_registry();
        queues.create("dup", TransportBinding::Local).unwrap();
        assert_eq!(
            queues.create("dup", TransportBinding::Local),
            Err(MsgqError::DuplicateName("dup".to_string()))
        );
        assert_eq!(
            queues.create("", TransportBinding::Local).unwrap_err().kind(),
            ErrorKind::InvalidName
        );
        let long = "q".repeat(MAX_NAME_LEN + 1);
        assert_eq!(
            queues.create(&long, TransportBinding::Local).unwrap_err().kind(),
            ErrorKind::InvalidName
        );
        assert_eq!(
            queues
                .create("self", TransportBinding::Remote(ProcessorId::GPP))
                .unwrap_err()
                .kind(),
            ErrorKind::Config
        );
    }

    #[test]
    fn test_put_without_size_is_rejected() {
        let queues = default_registry();
        let queue = queues.create("Q1", TransportBinding::Local).unwrap();
        let handle = queues.alloc(32).unwrap();

        let err = queues.put(queue, handle).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidMessageSize);
        queues.free(err.handle).unwrap();
    }

    #[test]
    fn test_oversized_payload_is_rejected() {
        let queues = default_registry();
        let handle = queues.alloc(64).unwrap();
        let err = queues.write_message(&handle, 0, &[0u8; 64]).unwrap_err();
        assert_eq!(
            err,
            MsgqError::InvalidMessageSize {
                size: 88,
                capacity: 64
            }
        );
        queues.free(handle).unwrap();
    }

    #[test]
    fn test_put_to_unknown_queue_returns_buffer() {
        let queues = default_registry();
        let missing = QueueId::new(ProcessorId::GPP, 9);
        let err = queues.put(missing, message(&queues, 1, b"x")).unwrap_err();
        assert_eq!(err.error, MsgqError::UnknownQueue(missing));
        queues.free(err.handle).unwrap();
    }

    #[test]
    fn test_put_to_unbound_processor() {
        let queues = default_registry();
        let remote = QueueId::new(ProcessorId::DSP, 0);
        let err = queues.put(remote, message(&queues, 1, b"x")).unwrap_err();
        assert_eq!(err.error, MsgqError::NoTransport(ProcessorId::DSP));
        queues.free(err.handle).unwrap();
    }

    #[test]
    fn test_get_on_remote_queue_is_not_local() {
        let queues = default_registry();
        let remote = QueueId::new(ProcessorId::DSP, 0);
        assert_eq!(
            queues.get(remote, Timeout::Immediate),
            Err(MsgqError::NotLocal(remote))
        );
    }

    #[test]
    fn test_locate_local_and_missing() {
        let queues = default_registry();
        let queue = queues.create("here", TransportBinding::Local).unwrap();
        assert_eq!(queues.locate("here", Timeout::Immediate), Ok(queue));
        assert_eq!(
            queues.locate("elsewhere", Timeout::from_millis(10)),
            Err(MsgqError::NotFound("elsewhere".to_string()))
        );
    }

    #[test]
    fn test_reply_address() {
        let queues = default_registry();
        let reply = queues.create("reply", TransportBinding::Local).unwrap();
        let handle = message(&queues, 1, b"ask");
        assert_eq!(queues.reply_to(&handle).unwrap(), None);
        queues.set_reply_to(&handle, reply).unwrap();
        assert_eq!(queues.reply_to(&handle).unwrap(), Some(reply));
        queues.free(handle).unwrap();
    }

    #[test]
    fn test_duplicate_binding() {
        let queues = default_registry();
        queues
            .attach_transport(ProcessorId::DSP, Arc::new(LocalTransport::new(4)))
            .unwrap();
        assert_eq!(
            queues.attach_transport(ProcessorId::DSP, Arc::new(LocalTransport::new(4))),
            Err(MsgqError::DuplicateBinding(ProcessorId::DSP))
        );
        assert_eq!(
            queues
                .attach_transport(ProcessorId::GPP, Arc::new(LocalTransport::new(4)))
                .unwrap_err()
                .kind(),
            ErrorKind::Config
        );
        assert!(queues.detach_transport(ProcessorId::DSP).is_ok());
        assert_eq!(
            queues.channel_state(ProcessorId::DSP),
            Err(MsgqError::NoTransport(ProcessorId::DSP))
        );
    }

    #[test]
    fn test_shutdown_discards_pending() {
        let queues = default_registry();
        let queue = queues.create("Q1", TransportBinding::Local).unwrap();
        queues.put(queue, message(&queues, 1, b"a")).unwrap();
        queues.put(queue, message(&queues, 2, b"b")).unwrap();

        assert_eq!(queues.shutdown(), 2);
        assert_eq!(queues.pool().in_use(), 0);
        assert!(queues.pool().shutdown().is_ok());
        assert_eq!(
            queues.pending(queue),
            Err(MsgqError::UnknownQueue(queue))
        );
    }
}
