//! Protocol module - presence protocol messages and their wire form
//!
//! Every message is an envelope `{id, type, fields}` (plus `isr` when it is
//! a response) encoded with the tagged codec in [`crate::codec`]. Commands:
//! `search`, `alive`, `bye`, `data`.

mod message;

pub use message::*;

/// Shared broadcast port for control traffic (search/alive/bye).
pub const BROADCAST_PORT: u16 = 1901;

/// Default port for addressed data traffic.
pub const DATA_PORT: u16 = 1902;
