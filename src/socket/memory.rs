//! In-process datagram fabric.
//!
//! A [`MemoryHub`] stands in for a LAN segment: every [`MemoryHost`] gets
//! its own address on it, and sockets bound through a host behave like UDP
//! sockets on that machine. Broadcast delivers to every socket bound to the
//! target port, the sender's own included, so the engine's loopback filter
//! is exercised exactly as it is on a real network.

use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::DatagramSocket;

const EPHEMERAL_BASE: u16 = 49152;

type Datagram = (Vec<u8>, SocketAddr);

struct Endpoint {
    addr: SocketAddr,
    tx: mpsc::UnboundedSender<Datagram>,
}

#[derive(Default)]
struct HubState {
    next_host: u8,
    next_ephemeral: u16,
    endpoints: Vec<Endpoint>,
}

/// A simulated network segment.
pub struct MemoryHub {
    state: Mutex<HubState>,
}

impl MemoryHub {
    pub fn new() -> Arc<MemoryHub> {
        Arc::new(MemoryHub { state: Mutex::new(HubState::default()) })
    }

    /// Attach a new simulated machine to the segment.
    pub fn host(self: &Arc<Self>) -> MemoryHost {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.next_host += 1;
        MemoryHost {
            hub: self.clone(),
            ip: Ipv4Addr::new(10, 77, 0, state.next_host),
        }
    }

    fn register(&self, addr: SocketAddr) -> mpsc::UnboundedReceiver<Datagram> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.endpoints.push(Endpoint { addr, tx });
        rx
    }

    fn unregister(&self, addr: SocketAddr) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.endpoints.retain(|ep| ep.addr != addr);
    }

    fn ephemeral_port(&self) -> u16 {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.next_ephemeral += 1;
        EPHEMERAL_BASE + state.next_ephemeral
    }

    fn deliver(&self, buf: &[u8], target: SocketAddr, src: SocketAddr) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let broadcast = matches!(target.ip(), IpAddr::V4(ip) if ip.is_broadcast());
        // Sends to closed endpoints vanish, like any unanswered datagram.
        if broadcast {
            state.endpoints.retain(|ep| {
                ep.addr.port() != target.port() || ep.tx.send((buf.to_vec(), src)).is_ok()
            });
        } else {
            state
                .endpoints
                .retain(|ep| ep.addr != target || ep.tx.send((buf.to_vec(), src)).is_ok());
        }
    }
}

/// One simulated machine: an address on the hub to bind sockets under.
pub struct MemoryHost {
    hub: Arc<MemoryHub>,
    ip: Ipv4Addr,
}

impl MemoryHost {
    pub fn ip(&self) -> Ipv4Addr {
        self.ip
    }

    /// Bind a socket on this machine. Port 0 picks an ephemeral port.
    pub fn bind(&self, port: u16) -> MemorySocket {
        let port = if port == 0 { self.hub.ephemeral_port() } else { port };
        let addr = SocketAddr::new(IpAddr::V4(self.ip), port);
        let rx = self.hub.register(addr);
        MemorySocket {
            hub: self.hub.clone(),
            addr,
            broadcast: AtomicBool::new(false),
            rx: tokio::sync::Mutex::new(rx),
        }
    }
}

/// Datagram endpoint on a [`MemoryHub`].
pub struct MemorySocket {
    hub: Arc<MemoryHub>,
    addr: SocketAddr,
    broadcast: AtomicBool,
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Datagram>>,
}

impl MemorySocket {
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }
}

impl Drop for MemorySocket {
    fn drop(&mut self) {
        self.hub.unregister(self.addr);
    }
}

#[async_trait]
impl DatagramSocket for MemorySocket {
    fn local_port(&self) -> u16 {
        self.addr.port()
    }

    fn set_broadcast(&self, enabled: bool) -> io::Result<()> {
        self.broadcast.store(enabled, Ordering::SeqCst);
        Ok(())
    }

    fn set_ttl(&self, _ttl: u32) -> io::Result<()> {
        Ok(())
    }

    async fn send_to(&self, buf: &[u8], target: SocketAddr) -> io::Result<usize> {
        let is_broadcast = matches!(target.ip(), IpAddr::V4(ip) if ip.is_broadcast());
        if is_broadcast && !self.broadcast.load(Ordering::SeqCst) {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "broadcast not enabled on this socket",
            ));
        }
        self.hub.deliver(buf, target, self.addr);
        Ok(buf.len())
    }

    async fn recv_from(&self) -> io::Result<(Vec<u8>, SocketAddr)> {
        let mut rx = self.rx.lock().await;
        rx.recv()
            .await
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "endpoint closed"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn broadcast_to(port: u16) -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::BROADCAST), port)
    }

    #[tokio::test]
    async fn test_unicast_between_hosts() {
        let hub = MemoryHub::new();
        let a = hub.host().bind(1902);
        let b = hub.host().bind(1902);

        a.send_to(b"hi", b.local_addr()).await.unwrap();
        let (data, src) = b.recv_from().await.unwrap();
        assert_eq!(data, b"hi");
        assert_eq!(src, a.local_addr());
    }

    #[tokio::test]
    async fn test_broadcast_reaches_port_members_including_sender() {
        let hub = MemoryHub::new();
        let a = hub.host().bind(1901);
        let b = hub.host().bind(1901);
        let other_port = hub.host().bind(1902);
        a.set_broadcast(true).unwrap();

        a.send_to(b"who", broadcast_to(1901)).await.unwrap();

        let (data, _) = b.recv_from().await.unwrap();
        assert_eq!(data, b"who");
        // Broadcast loops back to the sender too.
        let (data, src) = a.recv_from().await.unwrap();
        assert_eq!(data, b"who");
        assert_eq!(src, a.local_addr());

        // Nothing lands on a different port.
        other_port
            .send_to(b"probe", other_port.local_addr())
            .await
            .unwrap();
        let (data, _) = other_port.recv_from().await.unwrap();
        assert_eq!(data, b"probe");
    }

    #[tokio::test]
    async fn test_broadcast_requires_flag() {
        let hub = MemoryHub::new();
        let a = hub.host().bind(1901);
        let err = a.send_to(b"x", broadcast_to(1901)).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::PermissionDenied);
    }

    #[tokio::test]
    async fn test_send_to_nowhere_is_dropped() {
        let hub = MemoryHub::new();
        let a = hub.host().bind(1902);
        let gone: SocketAddr = "10.77.0.99:5000".parse().unwrap();
        assert_eq!(a.send_to(b"lost", gone).await.unwrap(), 4);
    }

    #[tokio::test]
    async fn test_ephemeral_ports_are_distinct() {
        let hub = MemoryHub::new();
        let host = hub.host();
        let a = host.bind(0);
        let b = host.bind(0);
        assert_ne!(a.local_port(), b.local_port());
    }
}
