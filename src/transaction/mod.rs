//! Transaction state machines (spec §4.5): Open, Pairing, Status-check.
//! Each is a small explicit state enum plus a `handle()`/`poll_timeout()`
//! pair, serialized by [`crate::connection::ConnectionState::transaction_sts`]
//! — at most one of the three runs at a time.

pub mod open;
pub mod pairing;
pub mod status_check;

pub use open::{OpenState, OpenTransaction};
pub use pairing::{PairingState, PairingTransaction};
pub use status_check::{StatusCheckState, StatusCheckTransaction};
