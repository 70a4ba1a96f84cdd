//! UDP transport over tokio sockets.

use std::io;
use std::net::SocketAddr;

use async_trait::async_trait;
use tokio::net::UdpSocket;

use super::DatagramSocket;

/// Largest datagram the transport will accept.
const MAX_DATAGRAM_SIZE: usize = 64 * 1024;

/// Datagram endpoint backed by a real UDP socket, bound on all interfaces.
pub struct UdpTransport {
    socket: UdpSocket,
    port: u16,
}

impl UdpTransport {
    /// Bind to a local port. Port 0 picks an ephemeral port.
    pub async fn bind(port: u16) -> io::Result<UdpTransport> {
        let socket = UdpSocket::bind(("0.0.0.0", port)).await?;
        let port = socket.local_addr()?.port();
        tracing::debug!("udp transport bound on port {}", port);
        Ok(UdpTransport { socket, port })
    }
}

#[async_trait]
impl DatagramSocket for UdpTransport {
    fn local_port(&self) -> u16 {
        self.port
    }

    fn set_broadcast(&self, enabled: bool) -> io::Result<()> {
        self.socket.set_broadcast(enabled)
    }

    fn set_ttl(&self, ttl: u32) -> io::Result<()> {
        self.socket.set_ttl(ttl)
    }

    async fn send_to(&self, buf: &[u8], target: SocketAddr) -> io::Result<usize> {
        self.socket.send_to(buf, target).await
    }

    async fn recv_from(&self) -> io::Result<(Vec<u8>, SocketAddr)> {
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
        let (len, src) = self.socket.recv_from(&mut buf).await?;
        buf.truncate(len);
        Ok((buf, src))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bind_and_unicast() {
        let a = UdpTransport::bind(0).await.unwrap();
        let b = UdpTransport::bind(0).await.unwrap();
        assert_ne!(a.local_port(), 0);

        let target: SocketAddr = format!("127.0.0.1:{}", b.local_port()).parse().unwrap();
        a.send_to(b"ping", target).await.unwrap();

        let (data, src) = b.recv_from().await.unwrap();
        assert_eq!(data, b"ping");
        assert_eq!(src.port(), a.local_port());
    }

    #[tokio::test]
    async fn test_broadcast_flag() {
        let socket = UdpTransport::bind(0).await.unwrap();
        socket.set_broadcast(true).unwrap();
        socket.set_broadcast(false).unwrap();
        socket.set_ttl(4).unwrap();
    }
}
