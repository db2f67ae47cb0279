//! Host event set (spec §4.4 dispatch + SPEC_FULL §9.y supplement). Posted
//! to the event queue and delivered by the event daemon (spec §4.6).

use crate::message::Message;

#[derive(Debug, Clone)]
pub enum HostEvent {
    RxResponse(Message),
    RxReset(Message),
    RxPing(Message),
    RxData(Message),
    RxCiphertext(Message),

    /// Decoded-message queue stayed full past `QUEUE_TIMEOUT`; the
    /// message was dropped with no ticket state change (spec §4.4 step 7).
    QueueFull,

    GattConnect { remote_address: [u8; 6] },
    GattDisconnect { remote_address: [u8; 6] },
    LinkSuccess,

    OpenSuccess,
    OpenTimeout,

    PairingStart,
    /// ECDH finished; `digest` is the 6-decimal-digit value the host must
    /// display to the user for manual confirmation (spec §4.5.2 step 5)
    /// before calling `tx_pairing_verdict`.
    PairingDigestReady { remote_device_id: u64, digest: u32 },
    PairingSuccess { remote_device_id: u64 },
    PairingErr,
    PairingTimeout,

    StatusCheck,
    StatusOk { remote_device_id: u64 },
    StatusErr,
    StatusTimeout,

    /// Repeated/escalated errors the host should surface (auth-fail
    /// threshold exceeded, event-queue retries exhausted, ticket-store
    /// failure mid-transaction — spec §7 propagation policy).
    HandlingErr,
}

/// Serial callback the event daemon invokes for every dequeued event
/// (spec §4.6: "Serializes callbacks so the host observes events in
/// arrival order per link").
pub trait EventSink: Send {
    fn on_event(&mut self, event: HostEvent);
}

impl<F: FnMut(HostEvent) + Send> EventSink for F {
    fn on_event(&mut self, event: HostEvent) {
        (self)(event)
    }
}
