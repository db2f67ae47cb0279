//! In-process BLE transport pairing two [`SimAdapter`]s directly — the
//! reference [`super::BleAdapter`] used by this crate's own tests and as
//! a usage example for hosts wiring up a real adapter (spec §0 "ships
//! for tests and as a usage reference").

use std::sync::{Arc, Mutex};

use super::{AttributeHandle, AttributeWriteSink, BleAdapter, ConnectionSink, PairingDelegate};
use crate::error::{Error, Result};

type SinkSlot = Arc<Mutex<Option<Box<dyn AttributeWriteSink>>>>;

/// One side of an in-process BLE link. `write_attribute` hands bytes
/// straight to the peer's registered [`AttributeWriteSink`] — no real
/// transport, no fragraming beyond what [`crate::codec`] already does.
pub struct SimAdapter {
    mtu: u16,
    own_address: [u8; 6],
    peer_address: [u8; 6],
    peer_sink: SinkSlot,
    own_sink: SinkSlot,
    connection_sink: Option<Box<dyn ConnectionSink>>,
    pairing_delegate: Option<Box<dyn PairingDelegate>>,
    connected: bool,
}

impl SimAdapter {
    /// Build a connected pair: `server_address` is this device as seen
    /// by the client, and vice versa.
    pub fn pair(mtu: u16, server_address: [u8; 6], client_address: [u8; 6]) -> (Self, Self) {
        let server_sink: SinkSlot = Arc::new(Mutex::new(None));
        let client_sink: SinkSlot = Arc::new(Mutex::new(None));

        let server = Self {
            mtu,
            own_address: server_address,
            peer_address: client_address,
            peer_sink: client_sink.clone(),
            own_sink: server_sink.clone(),
            connection_sink: None,
            pairing_delegate: None,
            connected: false,
        };
        let client = Self {
            mtu,
            own_address: client_address,
            peer_address: server_address,
            peer_sink: server_sink,
            own_sink: client_sink,
            connection_sink: None,
            pairing_delegate: None,
            connected: false,
        };
        (server, client)
    }
}

impl BleAdapter for SimAdapter {
    fn init_server(&mut self, _app_id: u32, _service_uuid: u128, mtu: u16) -> Result<()> {
        self.mtu = mtu;
        Ok(())
    }

    fn init_client(&mut self, _app_id: u32, mtu: u16) -> Result<()> {
        self.mtu = mtu;
        Ok(())
    }

    fn start_scan(&mut self) -> Result<()> {
        Ok(())
    }

    fn stop_scan(&mut self) -> Result<()> {
        Ok(())
    }

    fn connect(&mut self, _address: [u8; 6]) -> Result<()> {
        self.connected = true;
        if let Some(sink) = &mut self.connection_sink {
            sink.on_connected(self.peer_address);
        }
        Ok(())
    }

    fn disconnect(&mut self) -> Result<()> {
        self.connected = false;
        if let Some(sink) = &mut self.connection_sink {
            sink.on_disconnected(self.peer_address);
        }
        Ok(())
    }

    fn write_attribute(&mut self, _handle: AttributeHandle, bytes: &[u8]) -> Result<()> {
        if !self.connected {
            return Err(Error::TransportErr);
        }
        let mut guard = self.peer_sink.lock().expect("sim sink mutex poisoned");
        match guard.as_mut() {
            Some(sink) => {
                sink.on_attribute_write(self.own_address, bytes);
                Ok(())
            }
            None => Err(Error::TransportErr),
        }
    }

    fn negotiated_mtu(&self) -> u16 {
        self.mtu
    }

    fn set_attribute_write_handler(&mut self, sink: Box<dyn AttributeWriteSink>) {
        *self.own_sink.lock().expect("sim sink mutex poisoned") = Some(sink);
    }

    fn set_connection_handler(&mut self, sink: Box<dyn ConnectionSink>) {
        self.connection_sink = Some(sink);
    }

    fn set_pairing_delegate(&mut self, delegate: Box<dyn PairingDelegate>) {
        self.pairing_delegate = Some(delegate);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    struct ChannelSink(mpsc::Sender<Vec<u8>>);
    impl AttributeWriteSink for ChannelSink {
        fn on_attribute_write(&mut self, _peer_address: [u8; 6], bytes: &[u8]) {
            let _ = self.0.send(bytes.to_vec());
        }
    }

    #[test]
    fn write_attribute_delivers_to_peer_sink() {
        let (mut server, mut client) = SimAdapter::pair(256, [1; 6], [2; 6]);
        let (tx, rx) = mpsc::channel();
        client.set_attribute_write_handler(Box::new(ChannelSink(tx)));
        server.connect([2; 6]).unwrap();
        client.connect([1; 6]).unwrap();

        server.write_attribute(1, b"hello").unwrap();
        assert_eq!(rx.recv().unwrap(), b"hello");
    }

    #[test]
    fn write_before_connect_fails() {
        let (mut server, _client) = SimAdapter::pair(256, [1; 6], [2; 6]);
        assert_eq!(server.write_attribute(1, b"x"), Err(Error::TransportErr));
    }

    #[test]
    fn negotiated_mtu_reflects_init() {
        let (mut server, _client) = SimAdapter::pair(23, [1; 6], [2; 6]);
        server.init_server(1, 0, 512).unwrap();
        assert_eq!(server.negotiated_mtu(), 512);
    }
}
