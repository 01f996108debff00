//! Protocol configuration supplied by the embedding application.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Only message version this engine writes and accepts.
pub const CURRENT_VERSION: u8 = 3;

/// Oldest message version accepted on the wire.
pub const MIN_SUPPORTED_VERSION: u8 = 3;

/// Shortest truncated MAC accepted.
pub const MIN_MAC_LENGTH: usize = 8;

/// Full HMAC-SHA256 output; no MAC can be longer.
pub const MAX_MAC_LENGTH: usize = 32;

/// Tunables for session handling.
///
/// All bounds are explicit so the embedding application decides them;
/// [`ProtocolConfig::default`] carries the canonical values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    /// Version written into newly established sessions
    pub message_version: u8,
    /// Length of the truncated MAC appended to each Whisper message
    pub mac_length: usize,
    /// Skipped message keys cached per receiving chain; oldest evicted first
    pub max_message_keys: usize,
    /// Largest counter gap accepted within one receiving chain
    pub max_forward_jump: u32,
    /// Receiving chains retained per session state
    pub max_receiver_chains: usize,
    /// Archived (previous) session states retained per record
    pub max_archived_states: usize,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            message_version: CURRENT_VERSION,
            mac_length: 8,
            max_message_keys: 2000,
            max_forward_jump: 2000,
            max_receiver_chains: 5,
            max_archived_states: 40,
        }
    }
}

impl ProtocolConfig {
    /// Sets the skipped-key cache capacity.
    #[must_use]
    pub fn with_max_message_keys(mut self, max: usize) -> Self {
        self.max_message_keys = max;
        self
    }

    /// Sets the largest accepted counter gap.
    #[must_use]
    pub fn with_max_forward_jump(mut self, max: u32) -> Self {
        self.max_forward_jump = max;
        self
    }

    /// Sets the number of archived session states kept per record.
    #[must_use]
    pub fn with_max_archived_states(mut self, max: usize) -> Self {
        self.max_archived_states = max;
        self
    }

    /// Sets the truncated MAC length.
    #[must_use]
    pub fn with_mac_length(mut self, len: usize) -> Self {
        self.mac_length = len;
        self
    }

    /// Checks that every bound is usable.
    pub fn validate(&self) -> Result<()> {
        if !(MIN_SUPPORTED_VERSION..=CURRENT_VERSION).contains(&self.message_version) {
            return Err(Error::InvalidState("unsupported message version"));
        }
        if !(MIN_MAC_LENGTH..=MAX_MAC_LENGTH).contains(&self.mac_length) {
            return Err(Error::InvalidState("MAC length must be within 8..=32"));
        }
        if self.max_receiver_chains == 0 {
            return Err(Error::InvalidState("at least one receiver chain is required"));
        }
        Ok(())
    }
}
