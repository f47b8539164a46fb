//! Message header contract
//!
//! These tests define the stable layout of the header every buffer starts
//! with.

use crate::test_helpers::*;
use core_types::{PoolId, ProcessorId, QueueId};
use ipc::message::{
    DST_OFFSET, KIND_OFFSET, MSG_ID_OFFSET, POOL_OFFSET, PRIORITY_OFFSET, SIZE_OFFSET, SRC_OFFSET,
};
use ipc::{MessageHeader, MessageKind, Priority, HEADER_SIZE};

/// Canonical header used by the golden tests
pub fn canonical_header() -> MessageHeader {
    let mut header = MessageHeader::new_data(0x40)
        .with_src(QueueId::new(ProcessorId::GPP, 2))
        .with_msg_id(0xA1B2_C3D4)
        .with_priority(Priority::High);
    header.dst = QueueId::new(ProcessorId::DSP, 5);
    header.pool = PoolId::new(3);
    header
}

// ===== Contract Tests =====
