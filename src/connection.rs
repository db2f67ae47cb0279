//! Per-link connection and transaction status (spec §3 "Connection state").

use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    WaitPasskey,
    WaitNumChk,
    Connected,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionStatus {
    None,
    Open,
    Pairing,
    StsChk,
}

/// Transient, per-link state (spec §3). Reset on disconnect; the
/// transaction half resets on completion, timeout, or disconnect.
#[derive(Debug, Clone)]
pub struct ConnectionState {
    pub connection_sts: ConnectionStatus,
    pub transaction_sts: TransactionStatus,
    pub remote_address: [u8; 6],
    pub remote_device_id: Option<u64>,
    pub passkey: Option<u32>,
    pub transaction_started_at: Option<Instant>,
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self {
            connection_sts: ConnectionStatus::Disconnected,
            transaction_sts: TransactionStatus::None,
            remote_address: [0; 6],
            remote_device_id: None,
            passkey: None,
            transaction_started_at: None,
        }
    }
}

impl ConnectionState {
    /// Mark a transaction as starting now; guarded by `transaction_sts ==
    /// None` at the call site since at most one transaction runs at a time
    /// (spec §4.5).
    pub fn begin_transaction(&mut self, sts: TransactionStatus) {
        self.transaction_sts = sts;
        self.transaction_started_at = Some(Instant::now());
    }

    pub fn end_transaction(&mut self) {
        self.transaction_sts = TransactionStatus::None;
        self.transaction_started_at = None;
    }

    /// Whether the currently running transaction has exceeded `timeout_ms`.
    pub fn transaction_timed_out(&self, timeout_ms: u64) -> bool {
        match self.transaction_started_at {
            Some(start) => start.elapsed().as_millis() as u64 >= timeout_ms,
            None => false,
        }
    }

    /// Reset connection state on disconnect (spec §3 "Lifecycles").
    pub fn on_disconnect(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_state_has_no_active_transaction() {
        let state = ConnectionState::default();
        assert_eq!(state.transaction_sts, TransactionStatus::None);
        assert!(!state.transaction_timed_out(0));
    }

    #[test]
    fn begin_then_end_transaction_clears_timer() {
        let mut state = ConnectionState::default();
        state.begin_transaction(TransactionStatus::Pairing);
        assert_eq!(state.transaction_sts, TransactionStatus::Pairing);
        state.end_transaction();
        assert_eq!(state.transaction_sts, TransactionStatus::None);
        assert!(state.transaction_started_at.is_none());
    }

    #[test]
    fn disconnect_resets_everything() {
        let mut state = ConnectionState::default();
        state.connection_sts = ConnectionStatus::Connected;
        state.remote_device_id = Some(42);
        state.on_disconnect();
        assert_eq!(state.connection_sts, ConnectionStatus::Disconnected);
        assert_eq!(state.remote_device_id, None);
    }
}
