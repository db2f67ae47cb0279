//! Closed error set surfaced by the core to the host (spec §7).

use core::fmt;

/// Every failure mode the core can report, as a return value or as a
/// [`crate::HostEvent::HandlingErr`] follow-up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// A caller-supplied argument was out of range or malformed.
    InvalidArg,
    /// The operation is not valid in the current connection/transaction state.
    InvalidState,
    /// A blocking operation exceeded its deadline.
    Timeout,
    /// A bounded queue was full after `QUEUE_TIMEOUT` elapsed.
    QueueFull,
    /// No ticket exists for the referenced `device_id`.
    UnknownPeer,
    /// HMAC verification failed.
    AuthFail,
    /// `seq_no` was not strictly greater than the ticket's `rx_seq_no`.
    Replay,
    /// AES-CBC decrypt or PKCS#7 unpad failed.
    DecryptFail,
    /// `tx_seq_no` would exceed `max_seq_no`; re-pairing is required.
    SeqExhausted,
    /// Frame `kind` tag fell outside the closed set.
    InvalidKind,
    /// Frame `length` field exceeded `max_length` or is otherwise invalid.
    InvalidLength,
    /// Link closed mid-frame; partial buffer discarded.
    Truncated,
    /// The BLE adapter reported a transport-level failure.
    TransportErr,
    /// The ticket-store callback reported a storage failure.
    StorageErr,
    /// A cryptographic primitive failed (should not occur outside of a
    /// fault-injected test; always fatal to the current message/transaction).
    CryptoErr,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::InvalidArg => "invalid argument",
            Self::InvalidState => "invalid state for this operation",
            Self::Timeout => "operation timed out",
            Self::QueueFull => "queue full",
            Self::UnknownPeer => "unknown peer",
            Self::AuthFail => "authentication failed",
            Self::Replay => "replayed or stale sequence number",
            Self::DecryptFail => "decrypt/unpad failed",
            Self::SeqExhausted => "sequence number space exhausted",
            Self::InvalidKind => "invalid message kind",
            Self::InvalidLength => "invalid payload length",
            Self::Truncated => "frame truncated",
            Self::TransportErr => "BLE transport error",
            Self::StorageErr => "ticket storage error",
            Self::CryptoErr => "cryptographic primitive failed",
        };
        f.write_str(s)
    }
}

pub type Result<T> = core::result::Result<T, Error>;

impl From<crate::codec::CodecError> for Error {
    fn from(e: crate::codec::CodecError) -> Self {
        match e {
            crate::codec::CodecError::InvalidKind => Self::InvalidKind,
            crate::codec::CodecError::InvalidLength => Self::InvalidLength,
            crate::codec::CodecError::Truncated => Self::Truncated,
        }
    }
}

impl From<crate::crypto::CryptoError> for Error {
    fn from(_: crate::crypto::CryptoError) -> Self {
        Self::CryptoErr
    }
}

impl From<crate::ticket::StorageError> for Error {
    fn from(_: crate::ticket::StorageError) -> Self {
        Self::StorageErr
    }
}
