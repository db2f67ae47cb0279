//! Pairing transaction (spec §4.5.2): mutual ECDH key agreement with a
//! human-verifiable 6-digit digest.

use crate::config::{SIZE_X25519_CLIENT_PUBLIC, SIZE_X25519_SERVER_PUBLIC};
use crate::crypto::{self, ClientContext, ServerContext};
use crate::ticket::Ticket;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairingState {
    Idle,
    /// Client: sent `PAIRING_REQ`, waiting for `PAIRING_RSP`.
    AwaitingResponse,
    /// Both sides: ECDH complete, digest computed, waiting for the host
    /// to confirm or reject it (`tx_pairing_verdict`).
    AwaitingLocalVerdict,
    /// Local verdict sent, waiting for the peer's `DIGEST_MATCH`/`DIGEST_ERR`.
    AwaitingPeerVerdict,
    Complete,
    Failed,
}

/// Everything accumulated over the course of one pairing exchange, enough
/// to build the resulting [`Ticket`] once both verdicts arrive.
struct ProtoTicket {
    own_device_id: u64,
    remote_device_id: u64,
    cipher_key: [u8; 32],
    own_status: [u8; 32],
    remote_status_hash: [u8; 32],
    max_seq_no: u32,
}

pub struct PairingTransaction {
    state: PairingState,
    client_ctx: Option<ClientContext>,
    proto: Option<ProtoTicket>,
    own_verdict: Option<bool>,
    peer_verdict: Option<bool>,
}

impl PairingTransaction {
    pub fn new() -> Self {
        Self {
            state: PairingState::Idle,
            client_ctx: None,
            proto: None,
            own_verdict: None,
            peer_verdict: None,
        }
    }

    pub fn state(&self) -> PairingState {
        self.state
    }

    /// This side's own status nonce generated during this pairing
    /// attempt. The caller needs it (alongside the peer's raw status
    /// parsed straight off the wire payload) to compute [`Self::digest`]
    /// client-then-server, regardless of local role.
    pub fn own_status(&self) -> Option<[u8; 32]> {
        self.proto.as_ref().map(|p| p.own_status)
    }

    /// The peer's `device_id`, known once a `PAIRING_REQ`/`PAIRING_RSP`
    /// has been processed.
    pub fn remote_device_id(&self) -> Option<u64> {
        self.proto.as_ref().map(|p| p.remote_device_id)
    }

    /// Client role: begin pairing. Returns the `PAIRING_REQ` payload:
    /// `client_device_id || client_public(36) || proposed_max_seq_no || own_status(32)`.
    pub fn start_as_client(&mut self, own_device_id: u64, proposed_max_seq_no: u32) -> Vec<u8> {
        let ctx = ClientContext::new();
        let own_status = crypto::random_array::<32>();
        let mut payload = Vec::with_capacity(8 + SIZE_X25519_CLIENT_PUBLIC + 4 + 32);
        payload.extend_from_slice(&own_device_id.to_be_bytes());
        payload.extend_from_slice(&ctx.public_bytes());
        payload.extend_from_slice(&proposed_max_seq_no.to_be_bytes());
        payload.extend_from_slice(&own_status);

        self.client_ctx = Some(ctx);
        self.proto = Some(ProtoTicket {
            own_device_id,
            remote_device_id: 0,
            cipher_key: [0; 32],
            own_status,
            remote_status_hash: [0; 32],
            max_seq_no: proposed_max_seq_no,
        });
        self.state = PairingState::AwaitingResponse;
        payload
    }

    /// Server role: received `PAIRING_REQ`. Returns the `PAIRING_RSP`
    /// payload: `server_device_id || server_public(33) || own_status(32)`,
    /// and moves straight to `AwaitingLocalVerdict` since the server's
    /// side of ECDH finishes in one step.
    pub fn handle_pairing_req(
        &mut self,
        own_device_id: u64,
        payload: &[u8],
    ) -> Result<Vec<u8>, PairingFailure> {
        if payload.len() != 8 + SIZE_X25519_CLIENT_PUBLIC + 4 + 32 {
            return Err(PairingFailure);
        }
        let remote_device_id = u64::from_be_bytes(payload[0..8].try_into().unwrap());
        let client_public = &payload[8..8 + SIZE_X25519_CLIENT_PUBLIC];
        let max_seq_no_offset = 8 + SIZE_X25519_CLIENT_PUBLIC;
        let max_seq_no =
            u32::from_be_bytes(payload[max_seq_no_offset..max_seq_no_offset + 4].try_into().unwrap());
        let remote_status: [u8; 32] = payload[max_seq_no_offset + 4..].try_into().unwrap();

        let server_ctx = ServerContext::new(client_public).map_err(|_| PairingFailure)?;
        let cipher_key = server_ctx.shared_secret();
        let own_status = crypto::random_array::<32>();

        let mut rsp = Vec::with_capacity(8 + SIZE_X25519_SERVER_PUBLIC + 32);
        rsp.extend_from_slice(&own_device_id.to_be_bytes());
        rsp.extend_from_slice(&server_ctx.public_bytes());
        rsp.extend_from_slice(&own_status);

        self.proto = Some(ProtoTicket {
            own_device_id,
            remote_device_id,
            cipher_key,
            own_status,
            remote_status_hash: crypto::sha256(&remote_status, 1),
            max_seq_no,
        });
        self.state = PairingState::AwaitingLocalVerdict;
        Ok(rsp)
    }

    /// Client role: received `PAIRING_RSP`. Completes its side of ECDH and
    /// moves to `AwaitingLocalVerdict`.
    pub fn handle_pairing_rsp(
        &mut self,
        payload: &[u8],
    ) -> Result<(), PairingFailure> {
        if payload.len() != 8 + SIZE_X25519_SERVER_PUBLIC + 32 {
            return Err(PairingFailure);
        }
        let remote_device_id = u64::from_be_bytes(payload[0..8].try_into().unwrap());
        let server_public = &payload[8..8 + SIZE_X25519_SERVER_PUBLIC];
        let remote_status: [u8; 32] = payload[8 + SIZE_X25519_SERVER_PUBLIC..].try_into().unwrap();

        let ctx = self.client_ctx.take().ok_or(PairingFailure)?;
        let cipher_key = ctx.derive_secret(server_public).map_err(|_| PairingFailure)?;

        let proto = self.proto.as_mut().ok_or(PairingFailure)?;
        proto.remote_device_id = remote_device_id;
        proto.cipher_key = cipher_key;
        proto.remote_status_hash = crypto::sha256(&remote_status, 1);

        self.state = PairingState::AwaitingLocalVerdict;
        Ok(())
    }

    /// The 6-decimal-digit verification digest (spec §4.5.2 step 4):
    /// `SHA-256(cipher_key || client_own_status || server_own_status)`
    /// truncated to 20 bits, modulo 1,000,000. Both sides must hash the two
    /// status nonces in the same (client-then-server) order regardless of
    /// local role.
    pub fn digest(&self, client_status: &[u8; 32], server_status: &[u8; 32]) -> Option<u32> {
        let proto = self.proto.as_ref()?;
        let mut material = Vec::with_capacity(32 + 32 + 32);
        material.extend_from_slice(&proto.cipher_key);
        material.extend_from_slice(client_status);
        material.extend_from_slice(server_status);
        let hash = crypto::sha256(&material, 1);
        let truncated = u32::from_be_bytes([0, hash[0] & 0x0F, hash[1], hash[2]]);
        Some(truncated % 1_000_000)
    }

    /// Host confirmed (`true`) or rejected (`false`) the displayed digest.
    /// Returns the `DIGEST_MATCH`/`DIGEST_ERR` kind to send.
    pub fn submit_local_verdict(&mut self, ok: bool) -> crate::message::MessageKind {
        self.own_verdict = Some(ok);
        self.state = PairingState::AwaitingPeerVerdict;
        self.maybe_finish();
        if ok {
            crate::message::MessageKind::DigestMatch
        } else {
            crate::message::MessageKind::DigestErr
        }
    }

    /// Peer's `DIGEST_MATCH` (`true`) or `DIGEST_ERR` (`false`) arrived.
    pub fn handle_peer_verdict(&mut self, ok: bool) {
        self.peer_verdict = Some(ok);
        self.maybe_finish();
    }

    fn maybe_finish(&mut self) {
        if let (Some(own), Some(peer)) = (self.own_verdict, self.peer_verdict) {
            self.state = if own && peer {
                PairingState::Complete
            } else {
                PairingState::Failed
            };
        }
    }

    /// Build the resulting ticket. Only meaningful once `state() ==
    /// Complete` (spec §4.5.2 step 7: ticket created only when both sides
    /// sent AND received `DIGEST_MATCH`).
    pub fn into_ticket(self) -> Option<Ticket> {
        if self.state != PairingState::Complete {
            return None;
        }
        let proto = self.proto?;
        Some(Ticket::new_paired(
            proto.own_device_id,
            proto.remote_device_id,
            proto.cipher_key,
            proto.own_status,
            proto.remote_status_hash,
            proto.max_seq_no,
        ))
    }

    /// 90 s elapsed without completing (spec §4.5.2 timeout).
    pub fn on_timeout(&mut self) {
        self.state = PairingState::Failed;
    }
}

impl Default for PairingTransaction {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PairingFailure;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_produces_matching_tickets() {
        let mut client = PairingTransaction::new();
        let req = client.start_as_client(1, 0xFFFF_FFFF);

        let mut server = PairingTransaction::new();
        let rsp = server.handle_pairing_req(0xF0, &req).unwrap();
        assert_eq!(server.state(), PairingState::AwaitingLocalVerdict);

        client.handle_pairing_rsp(&rsp).unwrap();
        assert_eq!(client.state(), PairingState::AwaitingLocalVerdict);

        let client_status = client.proto.as_ref().unwrap().own_status;
        let server_status = server.proto.as_ref().unwrap().own_status;

        let client_digest = client.digest(&client_status, &server_status).unwrap();
        let server_digest = server.digest(&client_status, &server_status).unwrap();
        assert_eq!(client_digest, server_digest);
        assert!(client_digest < 1_000_000);

        let client_verdict_kind = client.submit_local_verdict(true);
        let server_verdict_kind = server.submit_local_verdict(true);
        assert_eq!(client_verdict_kind, crate::message::MessageKind::DigestMatch);
        assert_eq!(server_verdict_kind, crate::message::MessageKind::DigestMatch);

        client.handle_peer_verdict(true);
        server.handle_peer_verdict(true);

        assert_eq!(client.state(), PairingState::Complete);
        assert_eq!(server.state(), PairingState::Complete);

        let client_ticket = client.into_ticket().unwrap();
        let server_ticket = server.into_ticket().unwrap();

        assert_eq!(client_ticket.cipher_key, server_ticket.cipher_key);
        assert_eq!(client_ticket.max_seq_no, server_ticket.max_seq_no);
        assert_eq!(
            client_ticket.remote_status_hash,
            crypto::sha256(&server_ticket.own_status, 1)
        );
        assert_eq!(
            server_ticket.remote_status_hash,
            crypto::sha256(&client_ticket.own_status, 1)
        );
        assert_eq!(client_ticket.tx_seq_no, 0);
        assert_eq!(client_ticket.rx_seq_no, 0);
    }

    #[test]
    fn digest_mismatch_discards_proto_ticket() {
        let mut client = PairingTransaction::new();
        let req = client.start_as_client(1, 0xFFFF_FFFF);
        let mut server = PairingTransaction::new();
        let rsp = server.handle_pairing_req(0xF0, &req).unwrap();
        client.handle_pairing_rsp(&rsp).unwrap();

        client.submit_local_verdict(false);
        server.submit_local_verdict(true);
        client.handle_peer_verdict(true);
        server.handle_peer_verdict(false);

        assert_eq!(client.state(), PairingState::Failed);
        assert_eq!(server.state(), PairingState::Failed);
        assert!(client.into_ticket().is_none());
        assert!(server.into_ticket().is_none());
    }

    #[test]
    fn rejects_malformed_pairing_req() {
        let mut server = PairingTransaction::new();
        assert!(server.handle_pairing_req(0xF0, &[0u8; 3]).is_err());
    }
}
