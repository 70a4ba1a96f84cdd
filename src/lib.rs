//! Spotnet - UDP broadcast presence discovery
//!
//! Points advertise themselves periodically over a shared broadcast port,
//! announce departure, can be searched for by kind, and exchange small
//! data payloads once discovered. Every message on the wire is encoded
//! with the compact tagged codec in [`codec`].
//!
//! The usual entry point is [`Spot`]: construct it over two bound
//! [`socket::DatagramSocket`]s, register listeners on [`Spot::events`],
//! and call [`Spot::start`].

pub mod codec;
pub mod config;
pub mod events;
pub mod protocol;
pub mod socket;
pub mod spot;

pub use events::{Emitter, EventKind, ListenerId, SpotEvent};
pub use protocol::{
    AlivePayload, ByePayload, Channel, DataBody, DataPayload, Envelope, Identity, MessageKind,
    PointKind, SearchRequest, SearchResponse, SearchTarget, BROADCAST_PORT, DATA_PORT,
};
pub use socket::{DatagramSocket, MemoryHost, MemoryHub, MemorySocket, UdpTransport};
pub use spot::{HostEntry, Spot, SpotError, SpotOptions, SpotResult, ADVERTISE_INTERVAL};
