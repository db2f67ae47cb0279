//! Message data model (spec §3).

/// Closed set of wire-tagged message kinds. Discriminants are the on-wire
/// `kind` byte (spec §4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageKind {
    Response = 0x00,
    Reset = 0x01,
    Ping = 0x02,
    PairingReq = 0x03,
    PairingRsp = 0x04,
    DigestMatch = 0x05,
    DigestErr = 0x06,
    StatusReq = 0x07,
    StatusRsp1 = 0x08,
    StatusRsp2 = 0x09,
    Data = 0x0A,
    Ciphertext = 0x0B,
}

impl MessageKind {
    pub const COUNT: u8 = 12;

    pub fn from_tag(tag: u8) -> Option<Self> {
        Some(match tag {
            0x00 => Self::Response,
            0x01 => Self::Reset,
            0x02 => Self::Ping,
            0x03 => Self::PairingReq,
            0x04 => Self::PairingRsp,
            0x05 => Self::DigestMatch,
            0x06 => Self::DigestErr,
            0x07 => Self::StatusReq,
            0x08 => Self::StatusRsp1,
            0x09 => Self::StatusRsp2,
            0x0A => Self::Data,
            0x0B => Self::Ciphertext,
            _ => return None,
        })
    }

    pub fn tag(self) -> u8 {
        self as u8
    }

    /// Whether this kind carries a real HMAC (vs. the constant
    /// [`crate::config::AUTH_CHECK_VALUE`] fill). Spec §4.4 step 3 / glossary
    /// "Authenticated kind".
    pub fn is_authenticated(self) -> bool {
        matches!(
            self,
            Self::Data | Self::Ciphertext | Self::StatusReq | Self::StatusRsp1 | Self::StatusRsp2
        )
    }

    /// Whether the payload is AES-256-CBC encrypted on the wire.
    pub fn is_encrypted(self) -> bool {
        matches!(self, Self::Ciphertext)
    }
}

/// An owned byte sequence, replacing the clone-flagged buffer of the
/// source design (spec §9 design note).
pub type Payload = Vec<u8>;

/// One logical message, either freshly built for transmission or fully
/// decoded from the wire (spec §3 "Message").
#[derive(Debug, Clone)]
pub struct Message {
    /// BLE hardware address of the remote peer, `[0; 6]` for outbound
    /// messages not yet associated with a link.
    pub peer_address: [u8; 6],
    /// Local receive timestamp in monotonic milliseconds; `0` on outbound.
    pub rx_time_ms: u64,
    /// Logical identity of the sender.
    pub device_id: u64,
    pub kind: MessageKind,
    pub seq_no: u32,
    pub auth_tag: [u8; 32],
    pub payload: Payload,
}

impl Message {
    /// Payload length as it will be written to the wire's 16-bit length field.
    pub fn length(&self) -> u16 {
        self.payload.len() as u16
    }
}
