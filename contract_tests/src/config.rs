//! Configuration format contract
//!
//! These tests pin the JSON field names deployed configuration files use.

use msgq::{LinkConfig, MsgqConfig, PoolConfig, ProcessorId, TransportBinding};
use serde_json::{json, Value};

/// Canonical configuration used by the golden tests
pub fn canonical_config() -> MsgqConfig {
    MsgqConfig::new(
        ProcessorId::DSP,
        vec![PoolConfig::new(16, 64), PoolConfig::new(4, 1024)],
    )
    .with_link(LinkConfig::new(ProcessorId::GPP, 32))
    .with_queue("dsp-in", TransportBinding::Remote(ProcessorId::GPP))
    .with_queue("scratch", TransportBinding::Local)
}

fn golden() -> Value {
    json!({
        "version": 1,
        "processor": 1,
        "pools": [
            { "count": 16, "size": 64 },
            { "count": 4, "size": 1024 }
        ],
        "links": [
            { "remote": 0, "ring_capacity": 32, "notify_line": 0, "handshake_timeout_ms": 1000 }
        ],
        "queues": [
            { "name": "dsp-in", "binding": { "Remote": 0 } },
            { "name": "scratch", "binding": "Local" }
        ],
        "local_fifo_capacity": 64
    })
}

// ===== Contract Tests =====
