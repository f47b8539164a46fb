//! Shared-memory transport for one processor link

use crate::layout::{EndpointBlock, EndpointState, LinkLayout, Side};
use crate::ring::{Ring, MAX_RING_CAPACITY};
use buffer_pool::BufferHandle;
use core_types::{ProcessorId, QueueId, SessionId};
use hal::{NotifyHandler, NotifyLine, Notifier, RegionError, SharedRegion};
use ipc::{
    ChannelState, ChannelStateMachine, Delivery, SendError, Transport, TransportError,
    TransportKind,
};
use lifecycle::Timeout;
use log::{debug, info, trace, warn};
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Placement and timing of one link
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShmConfig {
    /// Offset of the link's control structures in the shared region
    pub base: usize,
    /// Slots per direction
    pub ring_capacity: u32,
    /// Interrupt line raised after each publish
    pub notify_line: NotifyLine,
    /// How long `open_channel` waits for the peer
    pub handshake_timeout: Duration,
    /// Pause between peer checks during the handshake
    pub poll_interval: Duration,
}

impl ShmConfig {
    pub fn new(base: usize, ring_capacity: u32) -> Self {
        Self {
            base,
            ring_capacity,
            notify_line: NotifyLine(0),
            handshake_timeout: Duration::from_secs(1),
            poll_interval: Duration::from_millis(1),
        }
    }

    pub fn with_notify_line(mut self, line: NotifyLine) -> Self {
        self.notify_line = line;
        self
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

struct Link {
    channel: ChannelStateMachine,
    side: Option<Side>,
    local_session: Option<SessionId>,
    peer_session: Option<SessionId>,
    sequence: u32,
    /// Inbound buffers discarded by a session reset, awaiting their owner
    stranded: Vec<BufferHandle>,
}

/// Transport toward a peer processor over a shared region
///
/// Each side owns one endpoint block and the ring it produces into. A fresh
/// open empties the inbound ring and publishes a new session; reopening
/// after a fault keeps the session so anything the peer already published
/// survives.
pub struct ShmTransport {
    region: Arc<dyn SharedRegion>,
    notifier: Arc<dyn Notifier>,
    config: ShmConfig,
    layout: LinkLayout,
    link: Mutex<Link>,
}

impl ShmTransport {
    /// Creates a closed transport over `region`
    pub fn new(
        region: Arc<dyn SharedRegion>,
        notifier: Arc<dyn Notifier>,
        config: ShmConfig,
    ) -> Result<Self, TransportError> {
        if config.ring_capacity == 0 || config.ring_capacity > MAX_RING_CAPACITY {
            return Err(TransportError::Protocol(format!(
                "ring capacity {} outside [1, {}]",
                config.ring_capacity, MAX_RING_CAPACITY
            )));
        }
        let layout = LinkLayout::new(config.base, config.ring_capacity);
        if config.base % 4 != 0 {
            return Err(RegionError::Misaligned {
                offset: config.base,
            }
            .into());
        }
        if layout.end() > region.size() {
            return Err(RegionError::OutOfBounds {
                offset: config.base,
                len: layout.size(),
            }
            .into());
        }

        Ok(Self {
            region,
            notifier,
            config,
            layout,
            link: Mutex::new(Link {
                channel: ChannelStateMachine::new(),
                side: None,
                local_session: None,
                peer_session: None,
                sequence: 0,
                stranded: Vec::new(),
            }),
        })
    }

    pub fn config(&self) -> &ShmConfig {
        &self.config
    }

    pub fn layout(&self) -> LinkLayout {
        self.layout
    }

    /// Returns the session this side currently publishes
    pub fn local_session(&self) -> Option<SessionId> {
        self.link.lock().local_session
    }

    /// Returns the number of buffers published but not yet taken by the peer
    pub fn outbound_len(&self) -> Result<u32, TransportError> {
        let side = self.link.lock().side.ok_or(TransportError::PeerNotReady)?;
        self.ring(side).len()
    }

    /// Returns the number of buffers the peer published that await `recv`
    pub fn inbound_len(&self) -> Result<u32, TransportError> {
        let side = self.link.lock().side.ok_or(TransportError::PeerNotReady)?;
        self.ring(side.peer()).len()
    }

    /// Verifies the peer still runs the session seen at open
    ///
    /// Moves the channel to `Faulted` if it does not.
    pub fn check_peer(&self) -> Result<(), TransportError> {
        let mut link = self.link.lock();
        self.ensure_ready(&mut link).map(|_| ())
    }

    fn ring(&self, producer: Side) -> Ring<'_> {
        Ring::new(
            self.region.as_ref(),
            self.layout.ring(producer),
            self.config.ring_capacity,
        )
    }

    /// Empties the inbound ring before a reset so its buffers can be freed
    fn strand_inbound(&self, link: &mut Link, side: Side) {
        let inbound = self.ring(side.peer());
        loop {
            match inbound.pop() {
                Ok(Some((dst, offset))) => {
                    let handle = BufferHandle::from_offset(offset);
                    warn!(
                        target: "transport_shm",
                        "{} for {} left over from the previous session",
                        handle,
                        QueueId::from_raw(dst)
                    );
                    link.stranded.push(handle);
                }
                Ok(None) => return,
                // Never stamped: nothing was ever published here
                Err(err) => {
                    debug!(target: "transport_shm", "inbound ring not drained: {}", err);
                    return;
                }
            }
        }
    }

    fn publish_session(&self, link: &mut Link, side: Side) -> Result<(), TransportError> {
        self.strand_inbound(link, side);
        self.ring(side.peer()).reset()?;
        let session = SessionId::new();
        let sequence = link.sequence.wrapping_add(1);
        EndpointBlock {
            state: EndpointState::Up,
            session,
            sequence,
        }
        .write(self.region.as_ref(), self.layout.endpoint(side))?;
        link.sequence = sequence;
        link.local_session = Some(session);
        debug!(target: "transport_shm", "published session {} (#{})", session, sequence);
        Ok(())
    }

    fn ensure_ready(&self, link: &mut Link) -> Result<Side, TransportError> {
        link.channel.require_ready()?;
        let side = link.side.ok_or(TransportError::PeerNotReady)?;
        let peer = EndpointBlock::read(self.region.as_ref(), self.layout.endpoint(side.peer()))?;
        if peer.state != EndpointState::Up || Some(peer.session) != link.peer_session {
            if link.channel.fault() {
                warn!(
                    target: "transport_shm",
                    "peer endpoint lost (state {:?}, session {}), channel faulted",
                    peer.state, peer.session
                );
            }
            return Err(TransportError::Faulted);
        }
        Ok(side)
    }

    fn notify_peer(&self) {
        if let Err(err) = self.notifier.raise(self.config.notify_line) {
            warn!(target: "transport_shm", "failed to notify peer: {}", err);
        }
    }
}

impl Transport for ShmTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::SharedMemory
    }

    fn state(&self) -> ChannelState {
        self.link.lock().channel.state()
    }

    fn open_channel(&self, local: ProcessorId, remote: ProcessorId) -> Result<(), TransportError> {
        if local == remote {
            return Err(TransportError::Protocol(format!(
                "cannot link {} to itself",
                local
            )));
        }
        let side = Side::of(local, remote);
        {
            let mut link = self.link.lock();
            if !link.channel.begin_open()? {
                return Ok(());
            }
            link.side = Some(side);
            if link.local_session.is_none() {
                if let Err(err) = self.publish_session(&mut link, side) {
                    link.channel.abort_open();
                    return Err(err);
                }
            }
        }

        info!(target: "transport_shm", "{} opening channel to {}", local, remote);
        let deadline = Timeout::After(self.config.handshake_timeout).start();
        loop {
            let peer = EndpointBlock::read(self.region.as_ref(), self.layout.endpoint(side.peer()));
            match peer {
                Ok(block) if block.state == EndpointState::Up => {
                    let mut link = self.link.lock();
                    link.channel.complete_open()?;
                    link.peer_session = Some(block.session);
                    info!(
                        target: "transport_shm",
                        "{} channel to {} ready (peer session {})",
                        local, remote, block.session
                    );
                    return Ok(());
                }
                Ok(_) => {}
                Err(err) => {
                    self.link.lock().channel.abort_open();
                    return Err(err);
                }
            }
            if deadline.is_expired() {
                self.link.lock().channel.abort_open();
                warn!(
                    target: "transport_shm",
                    "{} handshake with {} timed out after {:?}",
                    local, remote, self.config.handshake_timeout
                );
                return Err(TransportError::PeerNotReady);
            }
            thread::sleep(self.config.poll_interval);
        }
    }

    fn close_channel(&self) {
        let mut link = self.link.lock();
        let previous = link.channel.close();
        link.peer_session = None;
        if link.local_session.take().is_some() {
            if let Some(side) = link.side {
                let endpoint = self.layout.endpoint(side);
                if let Err(err) =
                    EndpointBlock::set_state(self.region.as_ref(), endpoint, EndpointState::Down)
                {
                    warn!(target: "transport_shm", "failed to publish endpoint down: {}", err);
                }
            }
        }
        if previous != ChannelState::Closed {
            info!(target: "transport_shm", "channel closed (was {})", previous);
        }
    }

    fn send(&self, dst: QueueId, handle: BufferHandle) -> Result<(), SendError> {
        let mut link = self.link.lock();
        let side = match self.ensure_ready(&mut link) {
            Ok(side) => side,
            Err(err) => return Err(SendError::new(err, handle)),
        };
        match self.ring(side).push(dst.as_u32(), handle.offset()) {
            Ok(true) => {
                drop(link);
                trace!(target: "transport_shm", "published {} -> {}", handle, dst);
                let _ = handle.into_offset();
                self.notify_peer();
                Ok(())
            }
            Ok(false) => {
                drop(link);
                debug!(target: "transport_shm", "ring full, {} not sent to {}", handle, dst);
                self.notify_peer();
                Err(SendError::new(TransportError::TransportFull, handle))
            }
            Err(err) => Err(SendError::new(err, handle)),
        }
    }

    fn recv(&self) -> Result<Option<Delivery>, TransportError> {
        let mut link = self.link.lock();
        let side = self.ensure_ready(&mut link)?;
        let slot = self.ring(side.peer()).pop()?;
        Ok(slot.map(|(dst, offset)| Delivery {
            dst: QueueId::from_raw(dst),
            handle: BufferHandle::from_offset(offset),
        }))
    }

    fn set_notify_handler(&self, handler: NotifyHandler) -> Result<(), TransportError> {
        self.notifier.on_notify(self.config.notify_line, handler)?;
        Ok(())
    }

    fn clear_notify_handler(&self) {
        self.notifier.clear_handler(self.config.notify_line);
    }

    fn take_stranded(&self) -> Vec<BufferHandle> {
        std::mem::take(&mut self.link.lock().stranded)
    }
}
