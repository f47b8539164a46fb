//! Cross-domain name lookup
//!
//! A request travels in a pool buffer to the peer's control address; the
//! peer answers in the same buffer.
//!
//! ```text
//! request payload: token u32 | name_len u32 | name [u8; 32]
//! reply payload:   token u32 | found u32    | queue u32
//! ```

use crate::registry::MAX_NAME_LEN;
use core_types::QueueId;
use std::collections::HashMap;

pub const LOCATE_REQUEST_LEN: usize = 8 + MAX_NAME_LEN;
pub const LOCATE_REPLY_LEN: usize = 12;

fn word(bytes: &[u8], at: usize) -> Option<u32> {
    let raw = bytes.get(at..at + 4)?;
    Some(u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocateRequest {
    pub token: u32,
    pub name: String,
}

impl LocateRequest {
    /// Callers check the name length before encoding
    pub fn encode(&self) -> [u8; LOCATE_REQUEST_LEN] {
        let mut out = [0u8; LOCATE_REQUEST_LEN];
        let name = self.name.as_bytes();
        let len = name.len().min(MAX_NAME_LEN);
        out[0..4].copy_from_slice(&self.token.to_le_bytes());
        out[4..8].copy_from_slice(&(len as u32).to_le_bytes());
        out[8..8 + len].copy_from_slice(&name[..len]);
        out
    }

    pub fn decode(bytes: &[u8]) -> Option<Self> {
        let token = word(bytes, 0)?;
        let len = word(bytes, 4)? as usize;
        if len > MAX_NAME_LEN {
            return None;
        }
        let name = bytes.get(8..8 + len)?;
        let name = std::str::from_utf8(name).ok()?.to_string();
        Some(Self { token, name })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocateReply {
    pub token: u32,
    pub queue: Option<QueueId>,
}

impl LocateReply {
    pub fn encode(&self) -> [u8; LOCATE_REPLY_LEN] {
        let mut out = [0u8; LOCATE_REPLY_LEN];
        let (found, queue) = match self.queue {
            Some(queue) => (1u32, queue),
            None => (0u32, QueueId::NONE),
        };
        out[0..4].copy_from_slice(&self.token.to_le_bytes());
        out[4..8].copy_from_slice(&found.to_le_bytes());
        out[8..12].copy_from_slice(&queue.as_u32().to_le_bytes());
        out
    }

    pub fn decode(bytes: &[u8]) -> Option<Self> {
        let token = word(bytes, 0)?;
        let found = word(bytes, 4)?;
        let queue = QueueId::from_raw(word(bytes, 8)?);
        Some(Self {
            token,
            queue: (found != 0 && !queue.is_none()).then_some(queue),
        })
    }
}

#[derive(Debug, Default)]
struct Pending {
    expected: u32,
    negative: u32,
    found: Option<QueueId>,
}

/// Outcome of an outstanding lookup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocateStatus {
    Waiting,
    Found(QueueId),
    NotFound,
}

/// Lookups awaiting replies, keyed by token
#[derive(Debug, Default)]
pub struct LocateTable {
    next_token: u32,
    pending: HashMap<u32, Pending>,
}

impl LocateTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a lookup and returns its token
    pub fn register(&mut self) -> u32 {
        let token = self.next_token;
        self.next_token = self.next_token.wrapping_add(1);
        self.pending.insert(token, Pending::default());
        token
    }

    /// Records one more request sent under `token`
    pub fn expect_reply(&mut self, token: u32) {
        if let Some(pending) = self.pending.get_mut(&token) {
            pending.expected += 1;
        }
    }

    /// Takes back a request that never left
    pub fn withdraw(&mut self, token: u32) {
        if let Some(pending) = self.pending.get_mut(&token) {
            pending.expected = pending.expected.saturating_sub(1);
        }
    }

    /// Applies a reply; returns false for tokens nobody waits on
    pub fn answer(&mut self, reply: LocateReply) -> bool {
        match self.pending.get_mut(&reply.token) {
            Some(pending) => {
                match reply.queue {
                    Some(queue) => pending.found = pending.found.or(Some(queue)),
                    None => pending.negative += 1,
                }
                true
            }
            None => false,
        }
    }

    pub fn status(&self, token: u32) -> LocateStatus {
        match self.pending.get(&token) {
            Some(Pending {
                found: Some(queue), ..
            }) => LocateStatus::Found(*queue),
            Some(pending) if pending.negative < pending.expected => LocateStatus::Waiting,
            _ => LocateStatus::NotFound,
        }
    }

    /// Closes a lookup
    pub fn finish(&mut self, token: u32) {
        self.pending.remove(&token);
    }

    pub fn outstanding(&self) -> usize {
        self.pending.len()
    }
}
