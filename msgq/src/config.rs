//! Start-up configuration
//!
//! Both domains load the same pool table and agree on link parameters, so
//! each derives the same shared-region layout.

use crate::layout::SharedLayout;
use crate::registry::{check_name, TransportBinding};
use crate::MsgqError;
use buffer_pool::{BufferPool, PoolConfig};
use core_types::ProcessorId;
use hal::NotifyLine;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::time::Duration;
use transport_shm::MAX_RING_CAPACITY;

/// Default bound on undrained same-processor deliveries
pub const DEFAULT_LOCAL_FIFO_CAPACITY: usize = 64;

/// Default handshake timeout
pub const DEFAULT_HANDSHAKE_TIMEOUT_MS: u64 = 1000;

fn default_handshake_timeout_ms() -> u64 {
    DEFAULT_HANDSHAKE_TIMEOUT_MS
}

fn default_local_fifo_capacity() -> usize {
    DEFAULT_LOCAL_FIFO_CAPACITY
}

/// Parameters of the shared-memory link to one peer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkConfig {
    pub remote: ProcessorId,
    pub ring_capacity: u32,
    #[serde(default)]
    pub notify_line: u32,
    #[serde(default = "default_handshake_timeout_ms")]
    pub handshake_timeout_ms: u64,
}

impl LinkConfig {
    pub fn new(remote: ProcessorId, ring_capacity: u32) -> Self {
        Self {
            remote,
            ring_capacity,
            notify_line: 0,
            handshake_timeout_ms: DEFAULT_HANDSHAKE_TIMEOUT_MS,
        }
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn notify_line(&self) -> NotifyLine {
        NotifyLine(self.notify_line)
    }
}

/// A queue created at start-up
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueConfig {
    pub name: String,
    #[serde(default)]
    pub binding: TransportBinding,
}

/// Everything one domain needs to bring MSGQ up
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MsgqConfig {
    /// Format version, for future migrations
    pub version: u32,
    pub processor: ProcessorId,
    pub pools: Vec<PoolConfig>,
    #[serde(default)]
    pub links: Vec<LinkConfig>,
    #[serde(default)]
    pub queues: Vec<QueueConfig>,
    #[serde(default = "default_local_fifo_capacity")]
    pub local_fifo_capacity: usize,
}

impl MsgqConfig {
    /// Current configuration format version
    pub const CURRENT_VERSION: u32 = 1;

    /// Creates a configuration with no links and no start-up queues
    pub fn new(processor: ProcessorId, pools: Vec<PoolConfig>) -> Self {
        Self {
            version: Self::CURRENT_VERSION,
            processor,
            pools,
            links: Vec::new(),
            queues: Vec::new(),
            local_fifo_capacity: DEFAULT_LOCAL_FIFO_CAPACITY,
        }
    }

    pub fn with_link(mut self, link: LinkConfig) -> Self {
        self.links.push(link);
        self
    }

    pub fn with_queue(mut self, name: &str, binding: TransportBinding) -> Self {
        self.queues.push(QueueConfig {
            name: name.to_string(),
            binding,
        });
        self
    }

    /// Parses and validates a JSON configuration
    pub fn from_json(json: &str) -> Result<Self, MsgqError> {
        let config: MsgqConfig =
            serde_json::from_str(json).map_err(|e| MsgqError::Config(e.to_string()))?;
        if config.version != Self::CURRENT_VERSION {
            return Err(MsgqError::Config(format!(
                "unsupported configuration version {}",
                config.version
            )));
        }
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a JSON configuration file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, MsgqError> {
        let path = path.as_ref();
        let json = fs::read_to_string(path)
            .map_err(|e| MsgqError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_json(&json)
    }

    /// Serializes to pretty JSON
    pub fn to_json(&self) -> Result<String, MsgqError> {
        serde_json::to_string_pretty(self).map_err(|e| MsgqError::Config(e.to_string()))
    }

    /// Checks the configuration for anything fatal at start-up
    pub fn validate(&self) -> Result<(), MsgqError> {
        BufferPool::required_bytes(&self.pools).map_err(|e| MsgqError::Config(e.to_string()))?;
        let mut sizes = HashSet::new();
        for pool in &self.pools {
            if !sizes.insert(pool.size) {
                return Err(MsgqError::Config(format!(
                    "duplicate pool size {}",
                    pool.size
                )));
            }
        }

        if self.local_fifo_capacity == 0 {
            return Err(MsgqError::Config(
                "local FIFO capacity must be non-zero".to_string(),
            ));
        }

        let mut remotes = HashSet::new();
        for link in &self.links {
            if link.remote == self.processor {
                return Err(MsgqError::Config(format!(
                    "link from {} to itself",
                    self.processor
                )));
            }
            if link.ring_capacity == 0 {
                return Err(MsgqError::Config(format!(
                    "link to {} has zero ring capacity",
                    link.remote
                )));
            }
            if link.ring_capacity > MAX_RING_CAPACITY {
                return Err(MsgqError::Config(format!(
                    "link to {} has ring capacity {}, limit is {}",
                    link.remote, link.ring_capacity, MAX_RING_CAPACITY
                )));
            }
            if !remotes.insert(link.remote) {
                return Err(MsgqError::Config(format!(
                    "duplicate link to {}",
                    link.remote
                )));
            }
        }

        let mut names = HashSet::new();
        for queue in &self.queues {
            check_name(&queue.name).map_err(|e| MsgqError::Config(e.to_string()))?;
            if !names.insert(queue.name.as_str()) {
                return Err(MsgqError::Config(format!(
                    "duplicate queue {:?}",
                    queue.name
                )));
            }
            if let TransportBinding::Remote(remote) = queue.binding {
                if !remotes.contains(&remote) {
                    return Err(MsgqError::Config(format!(
                        "queue {:?} exported to {} without a link",
                        queue.name, remote
                    )));
                }
            }
        }
        Ok(())
    }

    /// Plans the shared region for this configuration
    pub fn layout(&self) -> Result<SharedLayout, MsgqError> {
        SharedLayout::plan(self.processor, &self.pools, &self.links)
    }
}
