//! Tunable constants (spec §6.3), validated on construction.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// The distinguished fill byte for the `auth_tag` field of unauthenticated
/// message kinds.
pub const AUTH_CHECK_VALUE: u8 = 0xA5;

/// Size in bytes of an HMAC-SHA-256 tag / cipher key / ticket status nonce.
pub const SIZE_AUTH_TAG: usize = 32;
pub const SIZE_CIPHER_KEY: usize = 32;
pub const SIZE_TICKET_STATUS: usize = 32;

/// Iteration count applied by [`crate::crypto::hash::sha256_stretched`] and
/// friends when the caller requests hash stretching.
pub const DEFAULT_HASH_STRETCH: u32 = 8;

/// X25519 wire sizes (spec §4.3 / SPEC_FULL §9.y): the client public-key
/// field is a 32-byte Montgomery point plus a 4-byte fixed tag; the server
/// public-key field is a 32-byte point plus a 1-byte fixed tag.
pub const SIZE_X25519_CLIENT_PUBLIC: usize = 36;
pub const SIZE_X25519_SERVER_PUBLIC: usize = 33;
pub const X25519_CLIENT_TAG: [u8; 4] = [0, 0, 0, 0];
pub const X25519_SERVER_TAG: [u8; 1] = [0];

/// Transaction timeouts and daemon retry/queue tuning, all overridable via
/// [`EngineConfig`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Negotiated GATT MTU in bytes; frames are chunked to `mtu - 3`.
    pub mtu: u16,
    /// Maximum payload length the assembler accepts (`L` in §4.1).
    pub max_length: u16,
    /// Capacity of the raw receive-byte queue.
    pub rx_byte_queue_depth: usize,
    /// Capacity of the decoded-message queue.
    pub decoded_queue_depth: usize,
    /// Capacity of the event queue.
    pub event_queue_depth: usize,
    /// Event daemon retry count on queue-full before dropping + `HandlingErr`.
    pub max_evt_retry: u8,
    /// Open-transaction timeout in milliseconds.
    pub open_timeout_ms: u64,
    /// Pairing-transaction timeout in milliseconds.
    pub pairing_timeout_ms: u64,
    /// Status-check-transaction timeout in milliseconds.
    pub status_check_timeout_ms: u64,
    /// Deadline for a bounded-queue send/receive before it fails.
    pub queue_timeout_ms: u64,
    /// Consecutive auth/replay failures within a window before `HandlingErr`.
    pub auth_fail_threshold: u8,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            mtu: 256,
            max_length: 2048,
            rx_byte_queue_depth: 32,
            decoded_queue_depth: 32,
            event_queue_depth: 32,
            max_evt_retry: 3,
            open_timeout_ms: 90_000,
            pairing_timeout_ms: 90_000,
            status_check_timeout_ms: 5_000,
            queue_timeout_ms: 3_000,
            auth_fail_threshold: 3,
        }
    }
}

impl EngineConfig {
    /// Validate this configuration, rejecting nonsensical values rather
    /// than silently clamping them.
    pub fn validate(&self) -> Result<()> {
        if self.mtu < 23 {
            return Err(Error::InvalidArg);
        }
        if self.max_length == 0 {
            return Err(Error::InvalidArg);
        }
        if self.rx_byte_queue_depth < 32
            || self.decoded_queue_depth < 1
            || self.event_queue_depth < 1
        {
            return Err(Error::InvalidArg);
        }
        if self.max_evt_retry == 0 {
            return Err(Error::InvalidArg);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_zero_max_length() {
        let mut cfg = EngineConfig::default();
        cfg.max_length = 0;
        assert_eq!(cfg.validate(), Err(Error::InvalidArg));
    }

    #[test]
    fn rejects_tiny_mtu() {
        let mut cfg = EngineConfig::default();
        cfg.mtu = 10;
        assert_eq!(cfg.validate(), Err(Error::InvalidArg));
    }
}
