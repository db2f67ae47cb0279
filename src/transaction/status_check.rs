//! Status-check transaction (spec §4.5.3): mutual proof-of-possession,
//! rotates `own_status` on both sides without the key ever transiting the
//! wire.

use crate::crypto;
use crate::ticket::Ticket;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCheckState {
    Idle,
    /// Initiator: sent `STATUS_REQ`, waiting for `STATUS_RSP1`.
    AwaitingRsp1,
    /// Responder: sent `STATUS_RSP1`, waiting for `STATUS_RSP2`.
    AwaitingRsp2,
    Complete,
    Failed,
}

pub struct StatusCheckTransaction {
    state: StatusCheckState,
    own_new_status: Option<[u8; 32]>,
    peer_new_status: Option<[u8; 32]>,
}

impl StatusCheckTransaction {
    pub fn new() -> Self {
        Self {
            state: StatusCheckState::Idle,
            own_new_status: None,
            peer_new_status: None,
        }
    }

    pub fn state(&self) -> StatusCheckState {
        self.state
    }

    /// This side's freshly generated candidate status, set once a role
    /// has started (initiator via [`Self::start_as_initiator`] or
    /// responder via [`Self::handle_status_req`]).
    pub fn own_new_status(&self) -> Option<[u8; 32]> {
        self.own_new_status
    }

    /// Initiator role: begin. Returns the 32 random bytes to send as the
    /// `STATUS_REQ` payload (carried inside an authenticated message, so
    /// the frame codec/engine handle the HMAC — this module only deals in
    /// the status-check payloads themselves).
    pub fn start_as_initiator(&mut self) -> [u8; 32] {
        let candidate = crypto::random_array::<32>();
        self.own_new_status = Some(candidate);
        self.state = StatusCheckState::AwaitingRsp1;
        candidate
    }

    /// Responder role: received `STATUS_REQ` carrying the initiator's
    /// `new_status_candidate`. Returns the `STATUS_RSP1` payload:
    /// `SHA-256(initiator's proposed new_status || ticket.cipher_key)` —
    /// bound to the one value identical on both sides' tickets (SPEC_FULL
    /// §9.x); `own_status` is a private nonce and differs per side.
    pub fn handle_status_req(
        &mut self,
        initiator_candidate: [u8; 32],
        ticket: &Ticket,
    ) -> [u8; 32] {
        self.peer_new_status = Some(initiator_candidate);
        let own_candidate = crypto::random_array::<32>();
        self.own_new_status = Some(own_candidate);

        let mut material = Vec::with_capacity(64);
        material.extend_from_slice(&initiator_candidate);
        material.extend_from_slice(&ticket.cipher_key);
        self.state = StatusCheckState::AwaitingRsp2;
        crypto::sha256(&material, 1)
    }

    /// `STATUS_RSP1`'s payload is actually `(responder_candidate ||
    /// proof)`: the responder must also reveal its own candidate so the
    /// initiator can build `STATUS_RSP2`. Encode both together.
    pub fn encode_rsp1(responder_candidate: [u8; 32], proof: [u8; 32]) -> Vec<u8> {
        let mut out = Vec::with_capacity(64);
        out.extend_from_slice(&responder_candidate);
        out.extend_from_slice(&proof);
        out
    }

    /// Initiator role: received `STATUS_RSP1` payload (64 bytes: responder
    /// candidate || proof). Verifies the proof reconstructs, then returns
    /// the `STATUS_RSP2` payload: `SHA-256(responder's new_status_candidate
    /// || ticket.cipher_key)`.
    pub fn handle_status_rsp1(
        &mut self,
        payload: &[u8],
        ticket: &Ticket,
    ) -> Result<[u8; 32], StatusCheckFailure> {
        if payload.len() != 64 {
            return Err(StatusCheckFailure);
        }
        let responder_candidate: [u8; 32] = payload[..32].try_into().unwrap();
        let proof: [u8; 32] = payload[32..].try_into().unwrap();

        let own_candidate = self.own_new_status.ok_or(StatusCheckFailure)?;
        let mut material = Vec::with_capacity(64);
        material.extend_from_slice(&own_candidate);
        material.extend_from_slice(&ticket.cipher_key);
        if crypto::sha256(&material, 1) != proof {
            self.state = StatusCheckState::Failed;
            return Err(StatusCheckFailure);
        }

        self.peer_new_status = Some(responder_candidate);
        let mut rsp2_material = Vec::with_capacity(64);
        rsp2_material.extend_from_slice(&responder_candidate);
        rsp2_material.extend_from_slice(&ticket.cipher_key);
        self.state = StatusCheckState::Complete;
        Ok(crypto::sha256(&rsp2_material, 1))
    }

    /// Responder role: received `STATUS_RSP2`. Verifies it reconstructs
    /// the same proof the responder would have computed, then completes.
    pub fn handle_status_rsp2(
        &mut self,
        proof: [u8; 32],
        ticket: &Ticket,
    ) -> Result<(), StatusCheckFailure> {
        let own_candidate = self.own_new_status.ok_or(StatusCheckFailure)?;
        let mut material = Vec::with_capacity(64);
        material.extend_from_slice(&own_candidate);
        material.extend_from_slice(&ticket.cipher_key);
        if crypto::sha256(&material, 1) != proof {
            self.state = StatusCheckState::Failed;
            return Err(StatusCheckFailure);
        }
        self.state = StatusCheckState::Complete;
        Ok(())
    }

    /// New `(own_status, remote_status_hash)` to atomically apply to the
    /// ticket via [`Ticket::rotate_status`] (spec §4.5.3 step 4). `None`
    /// until `state() == Complete`.
    pub fn rotation(&self) -> Option<([u8; 32], [u8; 32])> {
        if self.state != StatusCheckState::Complete {
            return None;
        }
        let own = self.own_new_status?;
        let peer = self.peer_new_status?;
        Some((own, crypto::sha256(&peer, 1)))
    }

    /// 5 s elapsed without completing (spec §4.5.3 timeout) — ticket
    /// untouched.
    pub fn on_timeout(&mut self) {
        self.state = StatusCheckState::Failed;
    }
}

impl Default for StatusCheckTransaction {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusCheckFailure;

#[cfg(test)]
mod tests {
    use super::*;

    fn ticket_pair() -> (Ticket, Ticket) {
        let cipher_key = [0x99u8; 32];
        let initiator_status = [0x01u8; 32];
        let responder_status = [0x02u8; 32];
        let initiator = Ticket::new_paired(
            1,
            2,
            cipher_key,
            initiator_status,
            crypto::sha256(&responder_status, 1),
            100,
        );
        let responder = Ticket::new_paired(
            2,
            1,
            cipher_key,
            responder_status,
            crypto::sha256(&initiator_status, 1),
            100,
        );
        (initiator, responder)
    }

    #[test]
    fn happy_path_rotates_both_sides_consistently() {
        let (initiator_ticket, responder_ticket) = ticket_pair();

        let mut initiator = StatusCheckTransaction::new();
        let candidate = initiator.start_as_initiator();

        let mut responder = StatusCheckTransaction::new();
        let proof1 = responder.handle_status_req(candidate, &responder_ticket);
        let responder_candidate = responder.own_new_status.unwrap();
        let rsp1 = StatusCheckTransaction::encode_rsp1(responder_candidate, proof1);

        let proof2 = initiator.handle_status_rsp1(&rsp1, &initiator_ticket).unwrap();
        responder.handle_status_rsp2(proof2, &responder_ticket).unwrap();

        assert_eq!(initiator.state(), StatusCheckState::Complete);
        assert_eq!(responder.state(), StatusCheckState::Complete);

        let (initiator_own, initiator_remote_hash) = initiator.rotation().unwrap();
        let (responder_own, responder_remote_hash) = responder.rotation().unwrap();

        assert_eq!(initiator_own, candidate);
        assert_eq!(responder_own, responder_candidate);
        assert_eq!(initiator_remote_hash, crypto::sha256(&responder_candidate, 1));
        assert_eq!(responder_remote_hash, crypto::sha256(&candidate, 1));
    }

    #[test]
    fn corrupted_proof_fails_without_rotation() {
        let (initiator_ticket, responder_ticket) = ticket_pair();
        let mut initiator = StatusCheckTransaction::new();
        let candidate = initiator.start_as_initiator();

        let mut responder = StatusCheckTransaction::new();
        let proof1 = responder.handle_status_req(candidate, &responder_ticket);
        let responder_candidate = responder.own_new_status.unwrap();
        let mut rsp1 = StatusCheckTransaction::encode_rsp1(responder_candidate, proof1);
        rsp1[63] ^= 0xFF;

        let result = initiator.handle_status_rsp1(&rsp1, &initiator_ticket);
        assert!(result.is_err());
        assert!(initiator.rotation().is_none());
    }
}
