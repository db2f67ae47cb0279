//! Open transaction (spec §4.5.1): client-initiated connection. Driven by
//! the BLE adapter's connection handler, not by protocol messages — GATT
//! connect, service discovery and MTU negotiation all happen below this
//! crate's narrow adapter contract (spec §1, §6.1).

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenState {
    Idle,
    Linking,
    Linked,
}

pub struct OpenTransaction {
    state: OpenState,
}

impl OpenTransaction {
    pub fn new() -> Self {
        Self {
            state: OpenState::Idle,
        }
    }

    pub fn state(&self) -> OpenState {
        self.state
    }

    /// Host called `open_server(...)` — begin linking.
    pub fn start(&mut self) {
        self.state = OpenState::Linking;
    }

    /// The adapter's connection handler reported a successful GATT
    /// connect + MTU negotiation. Emits `OPEN_SUCCESS` + `LINK_SUCCESS`
    /// (spec §4.5.1) — the caller (core) is responsible for posting both
    /// events.
    pub fn on_linked(&mut self) {
        self.state = OpenState::Linked;
    }

    /// 90 s elapsed without reaching `Linked` (spec §4.5.1 timeout).
    pub fn on_timeout(&mut self) {
        self.state = OpenState::Idle;
    }
}

impl Default for OpenTransaction {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_reaches_linked() {
        let mut t = OpenTransaction::new();
        assert_eq!(t.state(), OpenState::Idle);
        t.start();
        assert_eq!(t.state(), OpenState::Linking);
        t.on_linked();
        assert_eq!(t.state(), OpenState::Linked);
    }

    #[test]
    fn timeout_returns_to_idle() {
        let mut t = OpenTransaction::new();
        t.start();
        t.on_timeout();
        assert_eq!(t.state(), OpenState::Idle);
    }
}
