//! MSGQ Integration Test Utilities
//!
//! This crate provides shared bootstrap helpers for cross-domain tests.
//!
//! ## Test Philosophy
//!
//! - **Two real domains**: Each side has its own registry and transport,
//!   and they meet only in the shared region and the interrupt pair
//! - **No sleeps for correctness**: Waits are bounded polls on observable
//!   state, never fixed delays that hope the peer was quick enough
//! - **Buffers come home**: Every test can check that the allocator ends
//!   with nothing in use

use buffer_pool::BufferPool;
use hal::{host_interrupt_pair, HostSharedRegion, Notifier, SharedRegion};
use ipc::{Transport, TransportError};
use lifecycle::Timeout;
use msgq::bootstrap::{create_pool, start};
use msgq::{
    LinkConfig, MessageQueues, MsgqConfig, MsgqError, PoolConfig, ProcessorId, PutError, QueueId,
    HEADER_SIZE,
};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use transport_shm::{link_bytes, ShmConfig, ShmTransport};

pub const GPP: ProcessorId = ProcessorId::GPP;
pub const DSP: ProcessorId = ProcessorId::DSP;

/// Pool table used unless a test needs its own
pub fn default_pools() -> Vec<PoolConfig> {
    vec![PoolConfig::new(16, 64), PoolConfig::new(8, 256)]
}

/// Matching configurations for both sides of one link
pub fn configs(
    pools: Vec<PoolConfig>,
    ring_capacity: u32,
    handshake_timeout_ms: u64,
) -> (MsgqConfig, MsgqConfig) {
    let link = |remote| LinkConfig {
        handshake_timeout_ms,
        ..LinkConfig::new(remote, ring_capacity)
    };
    (
        MsgqConfig::new(GPP, pools.clone()).with_link(link(DSP)),
        MsgqConfig::new(DSP, pools).with_link(link(GPP)),
    )
}

/// Both simulated processors, sharing one region and one allocator
pub struct TwoDomains {
    pub gpp: MessageQueues,
    pub dsp: MessageQueues,
    pub pool: Arc<BufferPool>,
    pub region: Arc<dyn SharedRegion>,
}

/// Bootstrap helper for tests
///
/// Brings both domains up with the default pools and an 8-slot ring. The
/// channel is not open yet.
pub fn test_bootstrap() -> TwoDomains {
    let (gpp, dsp) = configs(default_pools(), 8, 2000);
    bootstrap_with(&gpp, &dsp).expect("bootstrap failed")
}

/// Brings both domains up from explicit configurations
pub fn bootstrap_with(gpp: &MsgqConfig, dsp: &MsgqConfig) -> Result<TwoDomains, MsgqError> {
    let layout = gpp.layout()?;
    let peer = dsp.layout()?;
    if layout.pools_base != peer.pools_base
        || layout.total() != peer.total()
        || layout.link(DSP) != peer.link(GPP)
    {
        return Err(MsgqError::Config(
            "GPP and DSP configurations disagree on the shared layout".to_string(),
        ));
    }
    let region: Arc<dyn SharedRegion> = Arc::new(HostSharedRegion::new(layout.total()));
    let pool = create_pool(gpp, region.clone())?;

    let (gpp_irq, dsp_irq) = host_interrupt_pair("gpp", "dsp")
        .map_err(|err| MsgqError::Config(err.to_string()))?;
    let gpp_irq: Arc<dyn Notifier> = Arc::new(gpp_irq);
    let dsp_irq: Arc<dyn Notifier> = Arc::new(dsp_irq);

    Ok(TwoDomains {
        gpp: start(gpp, pool.clone(), &[(DSP, gpp_irq)])?,
        dsp: start(dsp, pool.clone(), &[(GPP, dsp_irq)])?,
        pool,
        region,
    })
}

impl TwoDomains {
    /// Opens the link from both sides at once
    pub fn open(&self) -> Result<(), MsgqError> {
        let dsp = self.dsp.clone();
        let opener = thread::spawn(move || dsp.open(GPP));
        let gpp = self.gpp.open(DSP);
        let dsp = opener
            .join()
            .map_err(|_| MsgqError::Config("DSP opener panicked".to_string()))?;
        gpp.and(dsp)
    }

    /// Shuts both registries down and checks the allocator is empty
    pub fn shutdown(self) -> Result<(), MsgqError> {
        self.gpp.shutdown();
        self.dsp.shutdown();
        self.pool.shutdown()?;
        Ok(())
    }
}

/// A GPP registry whose DSP peer is a bare transport nobody drains
///
/// Lets tests fill the GPP-to-DSP ring deterministically.
pub fn gpp_with_silent_peer(
    ring_capacity: u32,
) -> Result<(MessageQueues, Arc<ShmTransport>), MsgqError> {
    let pools = default_pools();
    let link_len = link_bytes(ring_capacity);
    let pools_base = (link_len + 7) & !7;
    let pools_len = BufferPool::required_bytes(&pools)?;
    let region: Arc<dyn SharedRegion> = Arc::new(HostSharedRegion::new(pools_base + pools_len));
    let pool = Arc::new(BufferPool::new(region.clone(), pools_base, &pools)?);

    let (gpp_irq, dsp_irq) = host_interrupt_pair("gpp", "dsp")
        .map_err(|err| MsgqError::Config(err.to_string()))?;
    let config = ShmConfig::new(0, ring_capacity).with_handshake_timeout(Duration::from_secs(2));
    let channel = |source: TransportError| MsgqError::Channel {
        remote: DSP,
        source,
    };
    let gpp_link = ShmTransport::new(region.clone(), Arc::new(gpp_irq), config.clone())
        .map_err(channel)?;
    let dsp_link = Arc::new(ShmTransport::new(region, Arc::new(dsp_irq), config).map_err(channel)?);

    let gpp = MessageQueues::new(GPP, pool, 16);
    gpp.attach_transport(DSP, Arc::new(gpp_link))?;

    let peer = dsp_link.clone();
    let opener = thread::spawn(move || peer.open_channel(DSP, GPP));
    gpp.open(DSP)?;
    opener
        .join()
        .map_err(|_| MsgqError::Config("DSP opener panicked".to_string()))?
        .map_err(channel)?;
    Ok((gpp, dsp_link))
}

/// Allocates, fills and sends one text message
pub fn send_text(
    queues: &MessageQueues,
    queue: QueueId,
    msg_id: u32,
    text: &str,
) -> Result<(), MsgqError> {
    let handle = queues.alloc(HEADER_SIZE + text.len())?;
    if let Err(err) = queues.write_message(&handle, msg_id, text.as_bytes()) {
        queues.free(handle)?;
        return Err(err);
    }
    queues.put(queue, handle).map_err(|err: PutError| {
        let (error, handle) = err.into_parts();
        let _ = queues.free(handle);
        error
    })
}

/// Receives one text message, frees its buffer and returns its contents
pub fn recv_text(
    queues: &MessageQueues,
    queue: QueueId,
    timeout: Timeout,
) -> Result<(u32, String), MsgqError> {
    let handle = queues.get(queue, timeout)?;
    let header = queues.header(&handle)?;
    let payload = queues.payload(&handle)?;
    queues.free(handle)?;
    Ok((header.msg_id, String::from_utf8_lossy(&payload).into_owned()))
}

/// Polls `condition` until it holds or `timeout` passes
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < timeout {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    condition()
}
