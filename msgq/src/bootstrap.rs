//! Bringing one domain up from its configuration

use crate::config::MsgqConfig;
use crate::{MessageQueues, MsgqError};
use buffer_pool::BufferPool;
use core_types::ProcessorId;
use hal::{Notifier, SharedRegion};
use log::info;
use std::sync::Arc;
use transport_shm::{ShmConfig, ShmTransport};

/// Carves the configured pools out of `region`
///
/// Domains that share one allocator create it once and hand the same
/// `Arc` to every `start`.
pub fn create_pool(
    config: &MsgqConfig,
    region: Arc<dyn SharedRegion>,
) -> Result<Arc<BufferPool>, MsgqError> {
    config.validate()?;
    let layout = config.layout()?;
    if region.size() < layout.total() {
        return Err(MsgqError::Config(format!(
            "shared region is {} bytes, configuration needs {}",
            region.size(),
            layout.total()
        )));
    }
    let pool = BufferPool::new(region, layout.pools_base, &config.pools)?;
    Ok(Arc::new(pool))
}

/// Builds a registry with a shared-memory transport per configured link
/// and the configured start-up queues
///
/// Channels are left closed: opening waits for the peer, so each domain
/// calls `open` when it is ready to.
pub fn start(
    config: &MsgqConfig,
    pool: Arc<BufferPool>,
    notifiers: &[(ProcessorId, Arc<dyn Notifier>)],
) -> Result<MessageQueues, MsgqError> {
    config.validate()?;
    let layout = config.layout()?;
    if pool.span() != (layout.pools_base, layout.total()) {
        return Err(MsgqError::Config(format!(
            "pools span {:?}, configuration places them at {:?}",
            pool.span(),
            (layout.pools_base, layout.total())
        )));
    }

    let queues = MessageQueues::new(config.processor, pool.clone(), config.local_fifo_capacity);
    for link in &config.links {
        let placement = layout.link(link.remote).ok_or_else(|| {
            MsgqError::Config(format!("no placement for link to {}", link.remote))
        })?;
        let notifier = notifiers
            .iter()
            .find(|(remote, _)| *remote == link.remote)
            .map(|(_, notifier)| notifier.clone())
            .ok_or_else(|| {
                MsgqError::Config(format!("no notifier for link to {}", link.remote))
            })?;
        let shm = ShmConfig::new(placement.base, link.ring_capacity)
            .with_notify_line(link.notify_line())
            .with_handshake_timeout(link.handshake_timeout());
        let transport = ShmTransport::new(pool.region().clone(), notifier, shm)
            .map_err(|err| MsgqError::channel(link.remote, err))?;
        queues.attach_transport(link.remote, Arc::new(transport))?;
    }

    for queue in &config.queues {
        queues.create(&queue.name, queue.binding)?;
    }

    info!(
        target: "msgq",
        "{}: started with {} links and {} queues",
        config.processor,
        config.links.len(),
        config.queues.len()
    );
    Ok(queues)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LinkConfig;
    use crate::TransportBinding;
    use buffer_pool::PoolConfig;
    use hal::{host_interrupt_pair, HostSharedRegion};
    use ipc::ChannelState;

    fn gpp_config() -> MsgqConfig {
        MsgqConfig::new(ProcessorId::GPP, vec![PoolConfig::new(4, 64)])
            .with_link(LinkConfig::new(ProcessorId::DSP, 4))
            .with_queue("inbox", TransportBinding::Local)
    }

    #[test]
    fn test_start_binds_links_and_queues() {
        let config = gpp_config();
        let region: Arc<dyn SharedRegion> =
            Arc::new(HostSharedRegion::new(config.layout().unwrap().total()));
        let pool = create_pool(&config, region).unwrap();
        let (irq, _peer) = host_interrupt_pair("gpp", "dsp").unwrap();
        let notifier: Arc<dyn Notifier> = Arc::new(irq);

        let queues = start(&config, pool, &[(ProcessorId::DSP, notifier)]).unwrap();
        assert_eq!(
            queues.channel_state(ProcessorId::DSP),
            Ok(ChannelState::Closed)
        );
        assert!(queues
            .locate("inbox", lifecycle::Timeout::Immediate)
            .is_ok());
    }

    #[test]
    fn test_region_too_small() {
        let config = gpp_config();
        let region: Arc<dyn SharedRegion> = Arc::new(HostSharedRegion::new(64));
        assert!(matches!(
            create_pool(&config, region),
            Err(MsgqError::Config(_))
        ));
    }

    #[test]
    fn test_missing_notifier() {
        let config = gpp_config();
        let region: Arc<dyn SharedRegion> =
            Arc::new(HostSharedRegion::new(config.layout().unwrap().total()));
        let pool = create_pool(&config, region).unwrap();
        assert!(matches!(start(&config, pool, &[]), Err(MsgqError::Config(_))));
    }

    #[test]
    fn test_misplaced_pool() {
        let config = gpp_config();
        let region: Arc<dyn SharedRegion> = Arc::new(HostSharedRegion::new(4096));
        let pool = Arc::new(BufferPool::new(region, 0, &config.pools).unwrap());
        assert!(matches!(start(&config, pool, &[]), Err(MsgqError::Config(_))));
    }
}
