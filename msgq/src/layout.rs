//! Shared-region map
//!
//! ```text
//! 0                                                               total
//! +-------------+-------------+-----+-----------------------------+
//! | link (A, B) | link (A, C) | ... | pool storage                |
//! +-------------+-------------+-----+-----------------------------+
//! ```
//!
//! Links are ordered by their (lower, upper) processor pair, so two domains
//! planning from matching configurations arrive at identical offsets.

use crate::config::LinkConfig;
use crate::MsgqError;
use buffer_pool::{BufferPool, PoolConfig, BUFFER_ALIGN};
use core_types::ProcessorId;
use transport_shm::LinkLayout;

/// Where one link's control structures live
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkPlacement {
    pub remote: ProcessorId,
    pub layout: LinkLayout,
}

/// The region map for one domain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SharedLayout {
    pub links: Vec<LinkPlacement>,
    pub pools_base: usize,
    pub pools_len: usize,
}

fn align_up(value: usize) -> usize {
    (value + BUFFER_ALIGN - 1) & !(BUFFER_ALIGN - 1)
}

impl SharedLayout {
    /// Places every link of `local`, then the pools
    pub fn plan(
        local: ProcessorId,
        pools: &[PoolConfig],
        links: &[LinkConfig],
    ) -> Result<Self, MsgqError> {
        let pools_len =
            BufferPool::required_bytes(pools).map_err(|e| MsgqError::Config(e.to_string()))?;

        let mut ordered: Vec<&LinkConfig> = links.iter().collect();
        ordered.sort_by_key(|link| pair(local, link.remote));

        let mut cursor = 0;
        let mut placed = Vec::with_capacity(ordered.len());
        for link in ordered {
            let layout = LinkLayout::new(cursor, link.ring_capacity);
            cursor = align_up(layout.end());
            placed.push(LinkPlacement {
                remote: link.remote,
                layout,
            });
        }

        Ok(Self {
            links: placed,
            pools_base: cursor,
            pools_len,
        })
    }

    /// Returns the placement of the link to `remote`
    pub fn link(&self, remote: ProcessorId) -> Option<LinkLayout> {
        self.links
            .iter()
            .find(|placement| placement.remote == remote)
            .map(|placement| placement.layout)
    }

    /// Returns the minimum region size
    pub fn total(&self) -> usize {
        self.pools_base + self.pools_len
    }
}

fn pair(local: ProcessorId, remote: ProcessorId) -> (u16, u16) {
    let (a, b) = (local.as_u16(), remote.as_u16());
    (a.min(b), a.max(b))
}

#[cfg(test)]
mod tests {
    use super::*;
    use transport_shm::link_bytes;

    #[test]
    fn test_pools_only() {
        let layout = SharedLayout::plan(ProcessorId::GPP, &[PoolConfig::new(4, 60)], &[]).unwrap();
        assert!(layout.links.is_empty());
        assert_eq!(layout.pools_base, 0);
        assert_eq!(layout.pools_len, 4 * 64);
        assert_eq!(layout.total(), 256);
    }

    #[test]
    fn test_links_precede_pools() {
        let pools = [PoolConfig::new(2, 64)];
        let links = [LinkConfig::new(ProcessorId::DSP, 4)];
        let layout = SharedLayout::plan(ProcessorId::GPP, &pools, &links).unwrap();

        let link = layout.link(ProcessorId::DSP).unwrap();
        assert_eq!(link.base, 0);
        assert_eq!(link.size(), link_bytes(4));
        assert_eq!(layout.pools_base, link_bytes(4));
        assert_eq!(layout.pools_base % BUFFER_ALIGN, 0);
        assert!(layout.link(ProcessorId::GPP).is_none());
    }

    #[test]
    fn test_both_sides_agree() {
        let pools = [PoolConfig::new(8, 128), PoolConfig::new(4, 32)];
        let gpp = SharedLayout::plan(
            ProcessorId::GPP,
            &pools,
            &[LinkConfig::new(ProcessorId::DSP, 8)],
        )
        .unwrap();
        let dsp = SharedLayout::plan(
            ProcessorId::DSP,
            &pools,
            &[LinkConfig::new(ProcessorId::GPP, 8)],
        )
        .unwrap();

        assert_eq!(
            gpp.link(ProcessorId::DSP).unwrap(),
            dsp.link(ProcessorId::GPP).unwrap()
        );
        assert_eq!(gpp.pools_base, dsp.pools_base);
        assert_eq!(gpp.total(), dsp.total());
    }

    #[test]
    fn test_bad_pools_rejected() {
        assert!(matches!(
            SharedLayout::plan(ProcessorId::GPP, &[], &[]),
            Err(MsgqError::Config(_))
        ));
    }
}
