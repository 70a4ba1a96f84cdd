//! Socket module - datagram transports for the engine
//!
//! The engine talks to the network through the [`DatagramSocket`] trait:
//! one socket bound to the shared broadcast port for control traffic, one
//! bound to a point-specific port for addressed data. Two backends are
//! provided: [`UdpTransport`] over real UDP, and [`MemorySocket`] on an
//! in-process hub for tests and loopback demos.
//!
//! Sockets are bound at construction and closed by dropping them.

mod memory;
mod udp;

pub use memory::{MemoryHost, MemoryHub, MemorySocket};
pub use udp::UdpTransport;

use std::io;
use std::net::SocketAddr;

use async_trait::async_trait;

/// A bound, connectionless datagram endpoint.
#[async_trait]
pub trait DatagramSocket: Send + Sync + 'static {
    /// Port this socket is bound to.
    fn local_port(&self) -> u16;

    /// Allow (or forbid) sends to the broadcast address.
    fn set_broadcast(&self, enabled: bool) -> io::Result<()>;

    /// Hop limit for outgoing datagrams.
    fn set_ttl(&self, ttl: u32) -> io::Result<()>;

    /// Fire-and-forget send. No retry, no acknowledgment.
    async fn send_to(&self, buf: &[u8], target: SocketAddr) -> io::Result<usize>;

    /// Wait for the next inbound datagram and its sender address.
    async fn recv_from(&self) -> io::Result<(Vec<u8>, SocketAddr)>;
}
