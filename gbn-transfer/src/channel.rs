//! The engines' view of the network.
//!
//! A [`Datagram`] channel is bound to exactly one remote endpoint for the
//! lifetime of one transfer.  It can send one datagram and wait for the next
//! one until a deadline.  It does not parse packets; that is the engines'
//! job.
//!
//! | Channel          | Used by                                            |
//! |------------------|----------------------------------------------------|
//! | [`PeerChannel`]  | the client: own socket, one server address         |
//! | [`RoutedChannel`]| the server: shared socket, per-transfer inbox      |
//! | [`MemoryChannel`]| in-process pairs (tests, simulations)              |

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::{sleep_until, timeout_at, Instant};

use crate::socket::Socket;

/// A datagram link to one peer.
#[async_trait]
pub trait Datagram: Send {
    /// Transmit one datagram.  Delivery is not guaranteed.
    async fn send(&mut self, bytes: &[u8]) -> io::Result<()>;

    /// Wait for the next datagram from the peer.
    ///
    /// Returns `Ok(None)` once `deadline` passes with nothing received.
    async fn recv_until(&mut self, deadline: Instant) -> io::Result<Option<Vec<u8>>>;
}

// ---------------------------------------------------------------------------
// PeerChannel
// ---------------------------------------------------------------------------

/// A socket paired with one remote address.
///
/// Datagrams from any other source are dropped.
#[derive(Debug, Clone)]
pub struct PeerChannel {
    socket: Arc<Socket>,
    peer: SocketAddr,
}

impl PeerChannel {
    pub fn new(socket: Arc<Socket>, peer: SocketAddr) -> Self {
        Self { socket, peer }
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }
}

#[async_trait]
impl Datagram for PeerChannel {
    async fn send(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.socket.send_to(bytes, self.peer).await
    }

    async fn recv_until(&mut self, deadline: Instant) -> io::Result<Option<Vec<u8>>> {
        loop {
            match timeout_at(deadline, self.socket.recv_from()).await {
                Err(_elapsed) => return Ok(None),
                Ok(Err(e)) => return Err(e),
                Ok(Ok((bytes, addr))) if addr == self.peer => return Ok(Some(bytes)),
                Ok(Ok((_, addr))) => {
                    log::debug!("[channel] dropping datagram from foreign {addr}");
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// RoutedChannel
// ---------------------------------------------------------------------------

/// Server-side channel: sends on the shared listening socket, receives
/// whatever the dispatcher routes to this transfer's inbox.
#[derive(Debug)]
pub struct RoutedChannel {
    socket: Arc<Socket>,
    peer: SocketAddr,
    inbox: mpsc::Receiver<Vec<u8>>,
}

impl RoutedChannel {
    pub fn new(socket: Arc<Socket>, peer: SocketAddr, inbox: mpsc::Receiver<Vec<u8>>) -> Self {
        Self {
            socket,
            peer,
            inbox,
        }
    }
}

#[async_trait]
impl Datagram for RoutedChannel {
    async fn send(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.socket.send_to(bytes, self.peer).await
    }

    async fn recv_until(&mut self, deadline: Instant) -> io::Result<Option<Vec<u8>>> {
        match timeout_at(deadline, self.inbox.recv()).await {
            Err(_elapsed) => Ok(None),
            Ok(Some(bytes)) => Ok(Some(bytes)),
            Ok(None) => Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "dispatcher closed the transfer inbox",
            )),
        }
    }
}

// ---------------------------------------------------------------------------
// MemoryChannel
// ---------------------------------------------------------------------------

/// One end of an in-process datagram link.  See [`memory_pair`].
///
/// Sending to a dropped peer silently succeeds and receiving from one waits
/// out the deadline, the same way UDP behaves when nobody is listening.
#[derive(Debug)]
pub struct MemoryChannel {
    tx: mpsc::UnboundedSender<Vec<u8>>,
    rx: mpsc::UnboundedReceiver<Vec<u8>>,
}

/// Create two connected in-process endpoints.
pub fn memory_pair() -> (MemoryChannel, MemoryChannel) {
    let (a_tx, b_rx) = mpsc::unbounded_channel();
    let (b_tx, a_rx) = mpsc::unbounded_channel();
    (
        MemoryChannel { tx: a_tx, rx: a_rx },
        MemoryChannel { tx: b_tx, rx: b_rx },
    )
}

#[async_trait]
impl Datagram for MemoryChannel {
    async fn send(&mut self, bytes: &[u8]) -> io::Result<()> {
        let _ = self.tx.send(bytes.to_vec());
        Ok(())
    }

    async fn recv_until(&mut self, deadline: Instant) -> io::Result<Option<Vec<u8>>> {
        match timeout_at(deadline, self.rx.recv()).await {
            Err(_elapsed) => Ok(None),
            Ok(Some(bytes)) => Ok(Some(bytes)),
            Ok(None) => {
                sleep_until(deadline).await;
                Ok(None)
            }
        }
    }
}
