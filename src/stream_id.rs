use crate::error::{MuxError, Result};
use std::sync::atomic::{AtomicU64, Ordering};

/// Which end of the connection this peer is.
///
/// The role only fixes the parity of locally allocated stream identifiers:
/// clients allocate even ids starting at 0, servers odd ids starting at 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

impl Role {
    pub fn initial_id(self) -> u32 {
        match self {
            Role::Client => 0,
            Role::Server => 1,
        }
    }

    pub fn peer(self) -> Role {
        match self {
            Role::Client => Role::Server,
            Role::Server => Role::Client,
        }
    }

    /// Whether `stream_id` falls in the identifier space this role allocates.
    pub fn owns(self, stream_id: u32) -> bool {
        stream_id % 2 == self.initial_id()
    }
}

#[derive(Debug)]
pub struct StreamIdGenerator {
    /// Wider than an id so exhaustion is seen without wrapping
    next_id: AtomicU64,
    role: Role,
}

impl StreamIdGenerator {
    pub fn new(role: Role) -> Self {
        Self {
            next_id: AtomicU64::new(u64::from(role.initial_id())),
            role,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Hand out the next local identifier. Identifiers are never reused, so
    /// the generator stays exhausted once it passes `u32::MAX`.
    pub fn next(&self) -> Result<u32> {
        let next_id = self.next_id.fetch_add(2, Ordering::Relaxed);
        u32::try_from(next_id).map_err(|_| {
            MuxError::ProtocolViolation(
                "Stream ID overflow - connection should be restarted".to_string(),
            )
        })
    }

    pub fn validate_peer_stream_id(&self, stream_id: u32) -> Result<()> {
        if !self.role.peer().owns(stream_id) {
            return Err(MuxError::InvalidStreamId(stream_id));
        }
        Ok(())
    }
}
