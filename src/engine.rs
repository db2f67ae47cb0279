//! Message engine (spec §4.4): build outbound messages, verify inbound
//! ones end-to-end, dispatch by kind. Ticket lookups go through the
//! host's [`TicketStore`] on every call — the engine caches nothing
//! across invocations (spec §4.2).

use crate::codec::DecodedFrame;
use crate::config::{EngineConfig, AUTH_CHECK_VALUE};
use crate::crypto::{self, HashAlg};
use crate::error::{Error, Result};
use crate::message::{Message, MessageKind};
use crate::ticket::{Ticket, TicketStore};

/// A message ready to hand to the frame codec: the header fields plus the
/// (possibly encrypted) payload.
pub struct BuiltMessage {
    pub kind: MessageKind,
    pub seq_no: u32,
    pub auth_tag: [u8; 32],
    pub device_id: u64,
    pub payload: Vec<u8>,
}

/// What to do with a successfully verified inbound message (spec §4.4
/// "Dispatch by kind").
pub enum Dispatch {
    /// `DATA` / `CIPHERTEXT` — hand to the host as an `RX_*` event.
    Deliver(Message),
    /// `PING` — engine already knows to reply with `RESPONSE`.
    AutoReply(Message),
    /// `RESET` — tear down transaction state; message carried for logging.
    Reset(Message),
    /// `PAIRING_*` / `DIGEST_*` / `STATUS_*` — feed a transaction state machine.
    Transaction(Message),
    /// `RESPONSE` itself — no further action beyond the event.
    Response(Message),
}

#[derive(Clone, Copy)]
pub struct MessageEngine {
    pub own_device_id: u64,
    pub config: EngineConfig,
}

impl MessageEngine {
    pub fn new(own_device_id: u64, config: EngineConfig) -> Self {
        Self {
            own_device_id,
            config,
        }
    }

    /// Build step (spec §4.4 "Building a message"). `ticket` is `None` for
    /// unauthenticated kinds (RESET, PING, PAIRING_*, DIGEST_*, RESPONSE);
    /// `Some` for DATA/CIPHERTEXT/STATUS_*.
    pub fn build(
        &self,
        kind: MessageKind,
        payload: &[u8],
        ticket: Option<&mut Ticket>,
        store: Option<&mut dyn TicketStore>,
    ) -> Result<BuiltMessage> {
        if kind.is_authenticated() {
            let ticket = ticket.ok_or(Error::InvalidState)?;
            if !ticket.can_send() {
                return Err(Error::SeqExhausted);
            }
            let seq_no = ticket.tx_seq_no;

            let wire_payload = if kind.is_encrypted() {
                let iv = derive_cbc_iv(&ticket.cipher_key, self.own_device_id, seq_no);
                let padded = crypto::pkcs7_pad(payload, 16);
                crypto::aes_cbc_encrypt(&ticket.cipher_key, &iv, &padded)?
            } else {
                payload.to_vec()
            };

            let auth_tag = compute_auth_tag(
                &ticket.cipher_key,
                kind,
                wire_payload.len() as u16,
                seq_no,
                self.own_device_id,
                &wire_payload,
            )?;

            ticket.tx_seq_no = ticket
                .tx_seq_no
                .checked_add(1)
                .ok_or(Error::SeqExhausted)?;
            if let Some(store) = store {
                store.update(ticket)?;
            }

            Ok(BuiltMessage {
                kind,
                seq_no,
                auth_tag,
                device_id: self.own_device_id,
                payload: wire_payload,
            })
        } else {
            Ok(BuiltMessage {
                kind,
                seq_no: 0,
                auth_tag: [AUTH_CHECK_VALUE; 32],
                device_id: self.own_device_id,
                payload: payload.to_vec(),
            })
        }
    }

    /// Verify step (spec §4.4 "Verifying an inbound message"). Returns the
    /// decoded [`Message`] plus what the caller should do with it. On
    /// success for authenticated kinds, `store` has already been updated
    /// with the new `rx_seq_no`.
    pub fn verify(
        &self,
        frame: DecodedFrame,
        peer_address: [u8; 6],
        rx_time_ms: u64,
        store: &mut dyn TicketStore,
    ) -> Result<Dispatch> {
        let kind = frame.kind;

        if !kind.is_authenticated() {
            if frame.auth_tag != [AUTH_CHECK_VALUE; 32] {
                log::warn!("unauthenticated kind {:?} carried a non-constant auth tag; accepting per spec", kind);
            }
            let message = frame.into_message(peer_address, rx_time_ms);
            return Ok(classify(message));
        }

        let mut ticket = store
            .read(frame.device_id)
            .map_err(|_| Error::UnknownPeer)?;

        let expected_tag = compute_auth_tag(
            &ticket.cipher_key,
            kind,
            frame.payload.len() as u16,
            frame.seq_no,
            frame.device_id,
            &frame.payload,
        )?;
        if expected_tag != frame.auth_tag {
            return Err(Error::AuthFail);
        }

        if !ticket.accepts_seq_no(frame.seq_no) {
            return Err(Error::Replay);
        }

        let plaintext = if kind.is_encrypted() {
            let iv = derive_cbc_iv(&ticket.cipher_key, frame.device_id, frame.seq_no);
            let decrypted = crypto::aes_cbc_decrypt(&ticket.cipher_key, &iv, &frame.payload)
                .map_err(|_| Error::DecryptFail)?;
            crypto::pkcs7_unpad(&decrypted, 16).map_err(|_| Error::DecryptFail)?
        } else {
            frame.payload.clone()
        };

        ticket.rx_seq_no = frame.seq_no;
        ticket.rx_initialized = true;
        store.update(&ticket)?;

        let message = Message {
            peer_address,
            rx_time_ms,
            device_id: frame.device_id,
            kind,
            seq_no: frame.seq_no,
            auth_tag: frame.auth_tag,
            payload: plaintext,
        };
        Ok(classify(message))
    }
}

fn classify(message: Message) -> Dispatch {
    match message.kind {
        MessageKind::Data | MessageKind::Ciphertext => Dispatch::Deliver(message),
        MessageKind::Ping => Dispatch::AutoReply(message),
        MessageKind::Reset => Dispatch::Reset(message),
        MessageKind::Response => Dispatch::Response(message),
        MessageKind::PairingReq
        | MessageKind::PairingRsp
        | MessageKind::DigestMatch
        | MessageKind::DigestErr
        | MessageKind::StatusReq
        | MessageKind::StatusRsp1
        | MessageKind::StatusRsp2 => Dispatch::Transaction(message),
    }
}

/// `auth_tag = HMAC-SHA-256(cipher_key, kind || length || seq_no || device_id || payload)`
/// (spec §4.4 step 3).
fn compute_auth_tag(
    cipher_key: &[u8; 32],
    kind: MessageKind,
    length: u16,
    seq_no: u32,
    device_id: u64,
    payload: &[u8],
) -> Result<[u8; 32]> {
    let mut prefix = Vec::with_capacity(15 + payload.len());
    prefix.push(kind.tag());
    prefix.extend_from_slice(&length.to_be_bytes());
    prefix.extend_from_slice(&seq_no.to_be_bytes());
    prefix.extend_from_slice(&device_id.to_be_bytes());
    prefix.extend_from_slice(payload);
    crypto::hmac(HashAlg::Sha256, cipher_key, &prefix).map_err(Into::into)
}

/// IV derived deterministically from `(cipher_key, device_id, seq_no)`,
/// truncated to the 16 bytes AES-CBC needs. `device_id` is the frame's
/// sender id, identical material on both ends of the link (SPEC_FULL
/// §9.x) — unlike `own_status`, which is a private nonce that differs
/// between the two tickets of a pair.
fn derive_cbc_iv(cipher_key: &[u8; 32], device_id: u64, seq_no: u32) -> [u8; 16] {
    let mut material = Vec::with_capacity(32 + 8 + 4);
    material.extend_from_slice(cipher_key);
    material.extend_from_slice(&device_id.to_be_bytes());
    material.extend_from_slice(&seq_no.to_be_bytes());
    let digest = crypto::sha256(&material, 1);
    let mut iv = [0u8; 16];
    iv.copy_from_slice(&digest[..16]);
    iv
}
