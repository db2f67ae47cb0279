//! Secure BLE messaging core.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │  Host application                                                    │
//! │    SecureLink::{tx_*, rx_msg, open_server, close, configure_*}       │
//! └───────────────────────────┬────────────────────────────────────────-┘
//!                             │
//! ┌───────────────────────────▼────────────────────────────────────────┐
//! │  engine::MessageEngine   — build / verify / dispatch by kind        │
//! ├───────────┬───────────────┬──────────────┬──────────────────────────┤
//! │  codec     │  ticket        │  crypto       │  transaction            │
//! │  (§ frame) │  (§ session)   │  (§ primitives)│  (open/pairing/status) │
//! └───────────┴───────────────┴──────────────┴──────────────────────────┘
//!                             │
//! ┌───────────────────────────▼────────────────────────────────────────┐
//! │  daemons — receive daemon / event daemon over bounded queues         │
//! ├──────────────────────────────────────────────────────────────────────┤
//! │  adapters::BleAdapter — narrow interface onto the underlying GATT   │
//! │  transport, supplied by the host (see adapters::sim for an example) │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The crate never talks to a BLE stack directly: GAP scanning,
//! advertising, connection management and MTU negotiation live on the
//! other side of [`adapters::BleAdapter`]. This crate owns only the
//! message framing, ticket lifecycle, transaction sequencing and the
//! authenticated-encryption envelope layered on top of it.

#![deny(unused_must_use)]

pub mod adapters;
pub mod codec;
pub mod config;
pub mod connection;
pub mod core;
pub mod crypto;
pub mod daemons;
pub mod engine;
pub mod error;
pub mod events;
pub mod message;
pub mod ticket;
pub mod transaction;

pub use config::EngineConfig;
pub use core::SecureLink;
pub use error::{Error, Result};
pub use events::HostEvent;
pub use message::{Message, MessageKind};
pub use ticket::{Ticket, TicketEvent, TicketStore};
