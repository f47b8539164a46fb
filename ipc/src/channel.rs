//! Per-channel state machine
//!
//! ```text
//! Closed --open--> Opening --handshake--> Ready --close--> Closed
//!                     |                     |
//!                     +--timeout--> Closed  +--peer lost--> Faulted --open--> Opening
//! ```
//!
//! There is no implicit reconnect: a faulted channel only leaves `Faulted`
//! through an explicit open or close.

use crate::TransportError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// State of one transport channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChannelState {
    Closed,
    Opening,
    Ready,
    Faulted,
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelState::Closed => write!(f, "closed"),
            ChannelState::Opening => write!(f, "opening"),
            ChannelState::Ready => write!(f, "ready"),
            ChannelState::Faulted => write!(f, "faulted"),
        }
    }
}

/// Guards the transitions of one channel
#[derive(Debug, Clone)]
pub struct ChannelStateMachine {
    state: ChannelState,
}

impl ChannelStateMachine {
    /// Creates a closed channel
    pub fn new() -> Self {
        Self {
            state: ChannelState::Closed,
        }
    }

    /// Returns the current state
    pub fn state(&self) -> ChannelState {
        self.state
    }

    /// Starts a handshake
    ///
    /// Returns `Ok(false)` if the channel is already ready, in which case
    /// no handshake is needed.
    pub fn begin_open(&mut self) -> Result<bool, TransportError> {
        match self.state {
            ChannelState::Closed | ChannelState::Faulted => {
                self.state = ChannelState::Opening;
                Ok(true)
            }
            ChannelState::Ready => Ok(false),
            ChannelState::Opening => Err(TransportError::InvalidState {
                state: self.state,
                operation: "open",
            }),
        }
    }

    /// Finishes a successful handshake
    pub fn complete_open(&mut self) -> Result<(), TransportError> {
        if self.state != ChannelState::Opening {
            return Err(TransportError::InvalidState {
                state: self.state,
                operation: "complete open",
            });
        }
        self.state = ChannelState::Ready;
        Ok(())
    }

    /// Abandons a handshake that did not complete
    pub fn abort_open(&mut self) {
        if self.state == ChannelState::Opening {
            self.state = ChannelState::Closed;
        }
    }

    /// Closes the channel from any state, returning the previous one
    pub fn close(&mut self) -> ChannelState {
        std::mem::replace(&mut self.state, ChannelState::Closed)
    }

    /// Marks a ready channel as faulted
    ///
    /// Returns whether this call made the transition.
    pub fn fault(&mut self) -> bool {
        if self.state == ChannelState::Ready {
            self.state = ChannelState::Faulted;
            true
        } else {
            false
        }
    }

    /// Fails unless the channel can carry traffic
    pub fn require_ready(&self) -> Result<(), TransportError> {
        match self.state {
            ChannelState::Ready => Ok(()),
            ChannelState::Faulted => Err(TransportError::Faulted),
            ChannelState::Closed | ChannelState::Opening => Err(TransportError::PeerNotReady),
        }
    }
}

impl Default for ChannelStateMachine {
    fn default() -> Self {
        Self::new()
    }
}
