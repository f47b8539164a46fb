//! Shared-memory link contract
//!
//! These tests define the layout both processors map over the same bytes:
//! two endpoint blocks, then one ring per direction.

use crate::test_helpers::*;
use core_types::SessionId;
use hal::{HostSharedRegion, SharedRegion};
use transport_shm::layout::{
    ENDPOINT_BLOCK_SIZE, ENDPOINT_MAGIC, MAGIC_OFFSET, RING_CAPACITY_OFFSET, RING_ENTRY_SIZE,
    RING_HEADER_SIZE, RING_HEAD_OFFSET, RING_LOCK_OFFSET, RING_TAIL_OFFSET, SEQUENCE_OFFSET,
    SESSION_OFFSET, STATE_OFFSET,
};
use transport_shm::{link_bytes, EndpointBlock, EndpointState, LinkLayout, Ring, Side};

/// Session used by the golden endpoint block
pub const CANONICAL_SESSION: u128 = 0x0011_2233_4455_6677_8899_AABB_CCDD_EEFF;

// ===== Contract Tests =====
