//! BLE adapter contract (spec §6.1): the narrow interface the core
//! consumes from the underlying GATT transport.
//!
//! GAP scanning, advertising, connection management, the attribute
//! table and MTU negotiation all live on the far side of this trait —
//! the core never touches a real BLE stack (spec §1 "external
//! collaborator"). A host wires a concrete [`BleAdapter`] (ESP-IDF
//! Bluedroid, a Linux BlueZ binding, …) into [`crate::core::SecureLink`]
//! at construction time; [`sim::SimAdapter`] is the in-process stand-in
//! used by this crate's own tests.

pub mod sim;

use crate::error::Result;

/// One write handle into the GATT attribute table (characteristic or
/// descriptor), opaque to the core.
pub type AttributeHandle = u16;

/// The operations the core drives on the underlying GATT transport
/// (spec §6.1).
pub trait BleAdapter: Send {
    /// Bring up the link as a GATT peripheral advertising `service_uuid`.
    fn init_server(&mut self, app_id: u32, service_uuid: u128, mtu: u16) -> Result<()>;
    /// Bring up the link as a GATT central.
    fn init_client(&mut self, app_id: u32, mtu: u16) -> Result<()>;
    fn start_scan(&mut self) -> Result<()>;
    fn stop_scan(&mut self) -> Result<()>;
    fn connect(&mut self, address: [u8; 6]) -> Result<()>;
    fn disconnect(&mut self) -> Result<()>;
    /// Write one MTU-sized chunk to `handle`; may block until the
    /// underlying stack acknowledges the write (spec §6.1).
    fn write_attribute(&mut self, handle: AttributeHandle, bytes: &[u8]) -> Result<()>;
    /// The MTU negotiated with the current peer, used by
    /// [`crate::codec::chunk_for_mtu`].
    fn negotiated_mtu(&self) -> u16;

    /// Register the sink invoked on every inbound attribute write (spec
    /// §6.1 `set_attribute_write_handler`).
    fn set_attribute_write_handler(&mut self, sink: Box<dyn AttributeWriteSink>);
    /// Register the sink invoked on connect/disconnect (spec §6.1
    /// `set_connection_handler`).
    fn set_connection_handler(&mut self, sink: Box<dyn ConnectionSink>);
    /// Register the link-layer pairing delegate (spec §6.1 "Pairing
    /// delegation").
    fn set_pairing_delegate(&mut self, delegate: Box<dyn PairingDelegate>);
}

/// Registered on the adapter by the core at startup; the adapter invokes
/// this from BLE-stack context whenever bytes arrive via an attribute
/// write (spec §6.1 `set_attribute_write_handler`). Implementations
/// enqueue onto the receive-byte queue and return immediately — this
/// runs on the BLE stack's callback context, not the receive daemon's.
pub trait AttributeWriteSink: Send {
    fn on_attribute_write(&mut self, peer_address: [u8; 6], bytes: &[u8]);
}

/// Registered on the adapter by the core; invoked on connect/disconnect
/// with the peer address (spec §6.1 `set_connection_handler`).
pub trait ConnectionSink: Send {
    fn on_connected(&mut self, peer_address: [u8; 6]);
    fn on_disconnected(&mut self, peer_address: [u8; 6]);
}

/// Underlying BLE-layer pairing delegation (distinct from the
/// application-layer pairing of spec §4.5.2): numeric-comparison or
/// passkey-entry callbacks for the link-layer bonding process that
/// happens during the Open transaction's `LINKING` state.
pub trait PairingDelegate: Send {
    fn on_numeric_comparison(&mut self, passkey: u32) -> bool;
    fn on_passkey_request(&mut self) -> u32;
}

/// A [`PairingDelegate`] that accepts every numeric comparison and hands
/// back `0` for passkey requests — the right default for transports
/// (like [`sim::SimAdapter`]) that never actually invoke link-layer
/// bonding, and a starting point for hosts that want to wire up a real
/// UI later.
#[derive(Debug, Default, Clone, Copy)]
pub struct AutoAcceptPairingDelegate;

impl PairingDelegate for AutoAcceptPairingDelegate {
    fn on_numeric_comparison(&mut self, _passkey: u32) -> bool {
        true
    }

    fn on_passkey_request(&mut self) -> u32 {
        0
    }
}
