//! Frame codec (spec §4.1): bit-exact 47-byte header + payload, streaming
//! decoder driven by a `feed(&mut self, bytes: &[u8])` loop, matching this
//! codebase's length-prefixed frame decoder shape.

use core::fmt;

use crate::message::{Message, MessageKind};

/// Fixed header size: `kind(1) + length(2) + seq_no(4) + auth_tag(32) + device_id(8)`.
pub const HEADER_SIZE: usize = 47;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecError {
    InvalidKind,
    InvalidLength,
    Truncated,
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidKind => f.write_str("invalid frame kind tag"),
            Self::InvalidLength => f.write_str("invalid frame length"),
            Self::Truncated => f.write_str("frame truncated"),
        }
    }
}

/// One fully-decoded frame, prior to ticket lookup / HMAC verification.
#[derive(Debug, Clone)]
pub struct DecodedFrame {
    pub kind: MessageKind,
    pub seq_no: u32,
    pub auth_tag: [u8; 32],
    pub device_id: u64,
    pub payload: Vec<u8>,
}

/// Serialize one logical message to its on-wire frame bytes (spec §4.1).
/// Total length is `HEADER_SIZE + payload.len()`.
pub fn encode_frame(kind: MessageKind, seq_no: u32, auth_tag: &[u8; 32], device_id: u64, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_SIZE + payload.len());
    out.push(kind.tag());
    out.extend_from_slice(&(payload.len() as u16).to_be_bytes());
    out.extend_from_slice(&seq_no.to_be_bytes());
    out.extend_from_slice(auth_tag);
    out.extend_from_slice(&device_id.to_be_bytes());
    out.extend_from_slice(payload);
    out
}

/// Split a serialized frame into MTU-sized chunks, each a single GATT
/// attribute write (spec §4.1 "Fragmentation"). `mtu` is the negotiated
/// GATT MTU; the 3-byte ATT overhead is subtracted internally.
pub fn chunk_for_mtu(frame: &[u8], mtu: u16) -> Vec<&[u8]> {
    let chunk_size = (mtu.saturating_sub(3)).max(1) as usize;
    frame.chunks(chunk_size).collect()
}

/// Per-link parser state (spec §3 "Receive-assembly buffer").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DecoderState {
    AwaitingHeader { collected: usize },
    AwaitingBody { length: usize, collected: usize },
}

/// Streaming frame assembler: feed it raw bytes as they arrive from GATT
/// attribute writes; it emits one [`DecodedFrame`] per complete frame.
pub struct FrameAssembler {
    state: DecoderState,
    header_buf: [u8; HEADER_SIZE],
    payload_buf: Vec<u8>,
    max_length: u16,
}

impl FrameAssembler {
    pub fn new(max_length: u16) -> Self {
        Self {
            state: DecoderState::AwaitingHeader { collected: 0 },
            header_buf: [0u8; HEADER_SIZE],
            payload_buf: Vec::new(),
            max_length,
        }
    }

    /// Reset to the initial state, discarding any partial frame. Called on
    /// every codec error and on link disconnect (spec §4.1 "On any codec
    /// error the assembler clears its buffer").
    pub fn reset(&mut self) {
        self.state = DecoderState::AwaitingHeader { collected: 0 };
        self.payload_buf.clear();
    }

    /// Feed newly-arrived bytes. Returns `Ok(Some(frame))` once a complete
    /// frame has been assembled (any bytes past the frame boundary are
    /// dropped — exactly one frame per logical message, spec §4.1), `Ok(None)`
    /// if more bytes are still needed, or `Err` on a malformed header
    /// (the assembler has already reset itself when this returns `Err`).
    pub fn feed(&mut self, mut data: &[u8]) -> Result<Option<DecodedFrame>, CodecError> {
        loop {
            if data.is_empty() {
                return Ok(None);
            }
            match self.state {
                DecoderState::AwaitingHeader { collected } => {
                    let need = HEADER_SIZE - collected;
                    let take = need.min(data.len());
                    self.header_buf[collected..collected + take].copy_from_slice(&data[..take]);
                    data = &data[take..];
                    if take < need {
                        self.state = DecoderState::AwaitingHeader {
                            collected: collected + take,
                        };
                        return Ok(None);
                    }
                    let length = u16::from_be_bytes([self.header_buf[1], self.header_buf[2]]);
                    if MessageKind::from_tag(self.header_buf[0]).is_none() {
                        self.reset();
                        return Err(CodecError::InvalidKind);
                    }
                    if length > self.max_length {
                        self.reset();
                        return Err(CodecError::InvalidLength);
                    }
                    self.payload_buf.clear();
                    self.payload_buf.reserve(length as usize);
                    if length == 0 {
                        let frame = self.finish_frame();
                        self.reset();
                        return Ok(Some(frame));
                    }
                    self.state = DecoderState::AwaitingBody {
                        length: length as usize,
                        collected: 0,
                    };
                }
                DecoderState::AwaitingBody { length, collected } => {
                    let need = length - collected;
                    let take = need.min(data.len());
                    self.payload_buf.extend_from_slice(&data[..take]);
                    data = &data[take..];
                    if take < need {
                        self.state = DecoderState::AwaitingBody {
                            length,
                            collected: collected + take,
                        };
                        return Ok(None);
                    }
                    let frame = self.finish_frame();
                    self.reset();
                    return Ok(Some(frame));
                }
            }
        }
    }

    /// The link closed with a partial frame buffered (spec §4.1
    /// `TRUNCATED`). Call on disconnect; resets the assembler.
    pub fn truncate(&mut self) -> Option<CodecError> {
        let had_partial = !matches!(self.state, DecoderState::AwaitingHeader { collected: 0 });
        self.reset();
        had_partial.then_some(CodecError::Truncated)
    }

    fn finish_frame(&self) -> DecodedFrame {
        let kind = MessageKind::from_tag(self.header_buf[0]).expect("validated on header completion");
        let seq_no = u32::from_be_bytes(self.header_buf[3..7].try_into().unwrap());
        let mut auth_tag = [0u8; 32];
        auth_tag.copy_from_slice(&self.header_buf[7..39]);
        let device_id = u64::from_be_bytes(self.header_buf[39..47].try_into().unwrap());
        DecodedFrame {
            kind,
            seq_no,
            auth_tag,
            device_id,
            payload: self.payload_buf.clone(),
        }
    }
}

impl DecodedFrame {
    /// Build a bare [`Message`] from this frame, tagging it with the local
    /// receive timestamp and peer address once the link layer supplies
    /// them.
    pub fn into_message(self, peer_address: [u8; 6], rx_time_ms: u64) -> Message {
        Message {
            peer_address,
            rx_time_ms,
            device_id: self.device_id,
            kind: self.kind,
            seq_no: self.seq_no,
            auth_tag: self.auth_tag,
            payload: self.payload,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_then_decode_round_trip() {
        let payload = b"hello secure world".to_vec();
        let auth_tag = [0xAAu8; 32];
        let frame = encode_frame(MessageKind::Data, 7, &auth_tag, 0x1122_3344_5566_7788, &payload);
        assert_eq!(frame.len(), HEADER_SIZE + payload.len());

        let mut assembler = FrameAssembler::new(2048);
        let decoded = assembler.feed(&frame).unwrap().expect("complete frame");
        assert_eq!(decoded.kind, MessageKind::Data);
        assert_eq!(decoded.seq_no, 7);
        assert_eq!(decoded.auth_tag, auth_tag);
        assert_eq!(decoded.device_id, 0x1122_3344_5566_7788);
        assert_eq!(decoded.payload, payload);
    }

    #[test]
    fn feed_accepts_byte_at_a_time() {
        let frame = encode_frame(MessageKind::Ping, 0, &[0xA5; 32], 1, b"");
        let mut assembler = FrameAssembler::new(2048);
        let mut decoded = None;
        for &b in &frame {
            decoded = assembler.feed(&[b]).unwrap();
        }
        assert!(decoded.is_some());
    }

    #[test]
    fn zero_length_payload_completes_immediately_after_header() {
        let frame = encode_frame(MessageKind::Ping, 0, &[0xA5; 32], 1, b"");
        let mut assembler = FrameAssembler::new(2048);
        let decoded = assembler.feed(&frame).unwrap().unwrap();
        assert!(decoded.payload.is_empty());
    }

    #[test]
    fn rejects_invalid_kind_tag() {
        let mut frame = encode_frame(MessageKind::Ping, 0, &[0; 32], 1, b"");
        frame[0] = 0xFF;
        let mut assembler = FrameAssembler::new(2048);
        assert_eq!(assembler.feed(&frame), Err(CodecError::InvalidKind));
    }

    #[test]
    fn rejects_length_over_max() {
        let payload = vec![0u8; 10];
        let frame = encode_frame(MessageKind::Data, 0, &[0; 32], 1, &payload);
        let mut assembler = FrameAssembler::new(4);
        assert_eq!(assembler.feed(&frame), Err(CodecError::InvalidLength));
    }

    #[test]
    fn resets_after_error_and_can_decode_next_frame() {
        let mut bad = encode_frame(MessageKind::Ping, 0, &[0; 32], 1, b"");
        bad[0] = 0xFF;
        let good = encode_frame(MessageKind::Ping, 0, &[0xA5; 32], 1, b"");

        let mut assembler = FrameAssembler::new(2048);
        assert!(assembler.feed(&bad).is_err());
        let decoded = assembler.feed(&good).unwrap();
        assert!(decoded.is_some());
    }

    #[test]
    fn truncate_reports_partial_frame() {
        let frame = encode_frame(MessageKind::Data, 0, &[0; 32], 1, b"partial");
        let mut assembler = FrameAssembler::new(2048);
        assembler.feed(&frame[..HEADER_SIZE + 2]).unwrap();
        assert_eq!(assembler.truncate(), Some(CodecError::Truncated));
    }

    #[test]
    fn truncate_is_none_when_idle() {
        let mut assembler = FrameAssembler::new(2048);
        assert_eq!(assembler.truncate(), None);
    }

    #[test]
    fn chunking_splits_on_mtu_minus_overhead() {
        let frame = vec![0u8; 50];
        let chunks = chunk_for_mtu(&frame, 23);
        assert_eq!(chunks.len(), 3); // (23-3)=20 byte chunks -> 20,20,10
        assert_eq!(chunks[0].len(), 20);
        assert_eq!(chunks.last().unwrap().len(), 10);
    }
}
