//! Async UDP socket abstraction.
//!
//! [`Socket`] is a thin wrapper around `tokio::net::UdpSocket` that hands out
//! owned datagrams.  All protocol logic lives elsewhere; this module owns
//! only byte I/O.

use std::io;
use std::net::SocketAddr;

use tokio::net::UdpSocket;

use crate::packet::MAX_DATAGRAM;

/// An async, datagram-oriented UDP socket.
///
/// All methods are `&self` so the socket can be shared across tasks behind
/// an `Arc`.
#[derive(Debug)]
pub struct Socket {
    /// Address this socket is bound to (filled in after OS assigns ephemeral port).
    pub local_addr: SocketAddr,
    inner: UdpSocket,
}

impl Socket {
    /// Bind a new socket to `local_addr`.
    ///
    /// Passing `0.0.0.0:0` lets the OS choose an ephemeral port.
    pub async fn bind(local_addr: SocketAddr) -> io::Result<Self> {
        let inner = UdpSocket::bind(local_addr).await?;
        let local_addr = inner.local_addr()?;
        Ok(Self { local_addr, inner })
    }

    /// Send `bytes` as a single UDP datagram to `dest`.
    pub async fn send_to(&self, bytes: &[u8], dest: SocketAddr) -> io::Result<()> {
        self.inner.send_to(bytes, dest).await?;
        Ok(())
    }

    /// Receive the next datagram.
    ///
    /// Returns `(bytes, sender_address)`.  Datagrams longer than
    /// [`MAX_DATAGRAM`] are truncated by the OS.
    pub async fn recv_from(&self) -> io::Result<(Vec<u8>, SocketAddr)> {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        let (n, addr) = self.inner.recv_from(&mut buf).await?;
        buf.truncate(n);
        Ok((buf, addr))
    }
}
