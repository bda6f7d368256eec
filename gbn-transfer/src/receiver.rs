//! Go-Back-N receiver.
//!
//! [`ReceiveCursor`] implements the acceptance rule:
//!
//! - Only the **next expected** chunk with a valid checksum is accepted.
//! - Duplicates (`seq < expected`) are re-ACKed with their own sequence so
//!   a sender that lost the original ACK still advances.
//! - Corrupt and out-of-order chunks are **discarded**, never buffered, and
//!   answered with an ACK for the last good chunk (`expected - 1`) to pull
//!   the sender back.
//!
//! [`receive`] drives the cursor against a [`Datagram`] channel and writes
//! accepted payloads to a [`TransferSink`].
//!
//! ```text
//!  AWAITING_PACKET ──DATA (any verdict)──▶ AWAITING_PACKET
//!        │
//!        ├──END──────────────▶ DONE      (sink finished)
//!        ├──ERROR────────────▶ ABORTED   (sink discarded)
//!        └──idle timeout─────▶ ABORTED   (sink kept)
//! ```

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use tokio::time::Instant;

use crate::channel::Datagram;
use crate::error::TransferError;
use crate::packet::{self, Packet, PacketType};

// ---------------------------------------------------------------------------
// ReceiveCursor
// ---------------------------------------------------------------------------

/// What the cursor decided about one DATA packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// In order and intact; the payload belongs in the output.
    Accepted(u32),
    /// Already accepted earlier.
    Duplicate(u32),
    /// Ahead of `expected`; an earlier chunk is missing.
    OutOfOrder(u32),
    /// Checksum mismatch.
    Corrupt(u32),
}

/// Receive-side state for one transfer.
#[derive(Debug, Default)]
pub struct ReceiveCursor {
    /// Sequence number of the next chunk that may be accepted.
    ///
    /// Advances by exactly one per accepted chunk, never otherwise.
    pub expected: u32,
}

impl ReceiveCursor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Classify a DATA packet, advancing `expected` on acceptance.
    pub fn on_data(&mut self, seq: u32, intact: bool) -> Verdict {
        if !intact {
            return Verdict::Corrupt(seq);
        }
        if seq == self.expected {
            self.expected += 1;
            Verdict::Accepted(seq)
        } else if seq < self.expected {
            Verdict::Duplicate(seq)
        } else {
            Verdict::OutOfOrder(seq)
        }
    }

    /// Highest chunk accepted so far, if any.
    pub fn last_good(&self) -> Option<u32> {
        self.expected.checked_sub(1)
    }

    /// Sequence number to acknowledge after `verdict`.
    ///
    /// `None` when a corrupt or out-of-order chunk arrives before anything
    /// was accepted: there is no last good chunk to point the sender at.
    pub fn ack_for(&self, verdict: Verdict) -> Option<u32> {
        match verdict {
            Verdict::Accepted(seq) | Verdict::Duplicate(seq) => Some(seq),
            Verdict::OutOfOrder(_) | Verdict::Corrupt(_) => self.last_good(),
        }
    }
}

// ---------------------------------------------------------------------------
// Sinks
// ---------------------------------------------------------------------------

/// Destination of the reconstructed byte stream.
#[async_trait]
pub trait TransferSink: Send {
    /// Append one accepted chunk.
    async fn write_chunk(&mut self, chunk: &[u8]) -> io::Result<()>;

    /// Complete the output.  Called on END.
    async fn finish(&mut self) -> io::Result<()>;

    /// Flush whatever was written so far and leave it in place.  Called on
    /// idle timeout.
    async fn keep(&mut self) -> io::Result<()>;

    /// Throw away everything written so far.  Called when the peer aborts.
    async fn discard(&mut self) -> io::Result<()>;
}

#[async_trait]
impl TransferSink for Vec<u8> {
    async fn write_chunk(&mut self, chunk: &[u8]) -> io::Result<()> {
        self.extend_from_slice(chunk);
        Ok(())
    }

    async fn finish(&mut self) -> io::Result<()> {
        Ok(())
    }

    async fn keep(&mut self) -> io::Result<()> {
        Ok(())
    }

    async fn discard(&mut self) -> io::Result<()> {
        self.clear();
        Ok(())
    }
}

/// A file written on demand.
///
/// The file (and its parent directory) is created by the first accepted
/// chunk, or by [`finish`](TransferSink::finish) for an empty transfer, so an
/// aborted or timed-out transfer that never delivered data leaves nothing
/// behind.
#[derive(Debug)]
pub struct FileSink {
    path: PathBuf,
    file: Option<File>,
}

impl FileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            file: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn open(&mut self) -> io::Result<&mut File> {
        let file = match self.file.take() {
            Some(file) => file,
            None => {
                if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    fs::create_dir_all(parent).await?;
                }
                File::create(&self.path).await?
            }
        };
        Ok(self.file.insert(file))
    }
}

#[async_trait]
impl TransferSink for FileSink {
    async fn write_chunk(&mut self, chunk: &[u8]) -> io::Result<()> {
        self.open().await?.write_all(chunk).await
    }

    async fn finish(&mut self) -> io::Result<()> {
        self.open().await?.flush().await
    }

    async fn keep(&mut self) -> io::Result<()> {
        match self.file.as_mut() {
            Some(file) => file.flush().await,
            None => Ok(()),
        }
    }

    async fn discard(&mut self) -> io::Result<()> {
        let opened = self.file.take().is_some();
        if opened {
            match fs::remove_file(&self.path).await {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// receive
// ---------------------------------------------------------------------------

/// Counters describing a completed receive.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReceiveReport {
    /// Chunks accepted; equals the final `expected`.
    pub chunks: u32,
    /// Payload bytes written to the sink.
    pub bytes: u64,
    pub duplicates: u32,
    pub out_of_order: u32,
    pub corrupt: u32,
}

/// Reconstruct the peer's byte stream into `sink`.
///
/// Returns once the peer sends END.  Fails with
/// [`TransferError::PeerReportedError`] (sink discarded) when the peer sends
/// ERROR, and with [`TransferError::PeerTimeout`] (sink kept) when nothing
/// arrives for `idle_timeout`.
pub async fn receive<C, S>(
    channel: &mut C,
    sink: &mut S,
    idle_timeout: Duration,
) -> Result<ReceiveReport, TransferError>
where
    C: Datagram,
    S: TransferSink + ?Sized,
{
    let mut cursor = ReceiveCursor::new();
    let mut report = ReceiveReport::default();

    loop {
        let deadline = Instant::now() + idle_timeout;
        let Some(bytes) = channel.recv_until(deadline).await? else {
            log::warn!(
                "[recv] peer silent for {idle_timeout:?}; keeping {} chunk(s)",
                cursor.expected
            );
            sink.keep().await?;
            return Err(TransferError::PeerTimeout(idle_timeout));
        };

        let pkt = match packet::decode(&bytes) {
            Ok(pkt) => pkt,
            Err(e) => {
                log::debug!("[recv] dropping datagram: {e}");
                continue;
            }
        };

        match pkt.kind {
            PacketType::Error => {
                let message = pkt.message();
                log::warn!("[recv] ← ERROR: {message}");
                sink.discard().await?;
                return Err(TransferError::PeerReportedError(message));
            }
            PacketType::End => {
                sink.finish().await?;
                report.chunks = cursor.expected;
                log::debug!("[recv] ← END after {} chunk(s)", report.chunks);
                return Ok(report);
            }
            PacketType::Data => {
                let verdict = cursor.on_data(pkt.seq, pkt.is_intact());
                match verdict {
                    Verdict::Accepted(_) => {
                        sink.write_chunk(&pkt.payload).await?;
                        report.bytes += pkt.payload.len() as u64;
                    }
                    Verdict::Duplicate(_) => report.duplicates += 1,
                    Verdict::OutOfOrder(_) => report.out_of_order += 1,
                    Verdict::Corrupt(_) => report.corrupt += 1,
                }

                let ack = cursor.ack_for(verdict);
                if let Some(ack) = ack {
                    channel.send(&Packet::ack(ack).encode()).await?;
                }
                log::debug!("[recv] ← DATA {verdict:?}; → ACK {ack:?}");
            }
            other => log::debug!("[recv] ignoring {other} seq={}", pkt.seq),
        }
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    use crate::channel::memory_pair;
    use crate::packet::decode;

    #[test]
    fn initial_state() {
        let c = ReceiveCursor::new();
        assert_eq!(c.expected, 0);
        assert_eq!(c.last_good(), None);
    }

    #[test]
    fn in_order_chunks_accepted() {
        let mut c = ReceiveCursor::new();
        assert_eq!(c.on_data(0, true), Verdict::Accepted(0));
        assert_eq!(c.on_data(1, true), Verdict::Accepted(1));
        assert_eq!(c.expected, 2);
        assert_eq!(c.ack_for(Verdict::Accepted(1)), Some(1));
    }

    #[test]
    fn out_of_order_chunk_discarded() {
        let mut c = ReceiveCursor::new();
        c.on_data(0, true);
        let v = c.on_data(3, true);
        assert_eq!(v, Verdict::OutOfOrder(3));
        assert_eq!(c.expected, 1);
        assert_eq!(c.ack_for(v), Some(0));
    }

    #[test]
    fn duplicate_reacked_with_own_sequence() {
        let mut c = ReceiveCursor::new();
        c.on_data(0, true);
        c.on_data(1, true);
        let v = c.on_data(0, true);
        assert_eq!(v, Verdict::Duplicate(0));
        assert_eq!(c.expected, 2);
        assert_eq!(c.ack_for(v), Some(0));
    }

    #[test]
    fn corrupt_chunk_never_advances() {
        let mut c = ReceiveCursor::new();
        c.on_data(0, true);
        let v = c.on_data(1, false);
        assert_eq!(v, Verdict::Corrupt(1));
        assert_eq!(c.expected, 1);
        assert_eq!(c.ack_for(v), Some(0));
    }

    #[test]
    fn nothing_to_ack_before_first_acceptance() {
        let mut c = ReceiveCursor::new();
        let v = c.on_data(2, true);
        assert_eq!(c.ack_for(v), None);
        let v = c.on_data(0, false);
        assert_eq!(c.ack_for(v), None);
    }

    #[tokio::test]
    async fn vec_sink_discard_clears() {
        let mut sink = Vec::new();
        sink.write_chunk(b"partial").await.unwrap();
        sink.discard().await.unwrap();
        assert!(sink.is_empty());
    }

    #[tokio::test]
    async fn file_sink_lifecycle() {
        let dir = std::env::temp_dir().join(format!("gbn_sink_test_{}", std::process::id()));
        let path = dir.join("nested").join("out.bin");

        let mut sink = FileSink::new(&path);
        sink.write_chunk(b"hello ").await.unwrap();
        sink.write_chunk(b"world").await.unwrap();
        sink.finish().await.unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"hello world");

        let mut sink = FileSink::new(&path);
        sink.write_chunk(b"doomed").await.unwrap();
        sink.discard().await.unwrap();
        assert!(!path.exists());

        let mut sink = FileSink::new(&path);
        sink.finish().await.unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"");

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_before_any_data_leaves_no_file() {
        let dir = std::env::temp_dir().join(format!("gbn_sink_silent_{}", std::process::id()));
        let path = dir.join("never.bin");
        let (mut chan, _peer) = memory_pair();

        let mut sink = FileSink::new(&path);
        let err = receive(&mut chan, &mut sink, Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::PeerTimeout(_)));
        assert_eq!(sink.path(), path.as_path());
        assert!(!path.exists());
        assert!(!dir.exists());
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_after_data_keeps_partial_file() {
        let dir = std::env::temp_dir().join(format!("gbn_sink_partial_{}", std::process::id()));
        let path = dir.join("partial.bin");
        let (mut chan, mut peer) = memory_pair();
        peer.send(&Packet::data(0, b"half".to_vec()).encode()).await.unwrap();

        let mut sink = FileSink::new(&path);
        let err = receive(&mut chan, &mut sink, Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::PeerTimeout(_)));
        assert_eq!(std::fs::read(&path).unwrap(), b"half");

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_and_ack_packets_are_ignored() {
        let (mut chan, mut peer) = memory_pair();
        let task = tokio::spawn(async move {
            let mut out = Vec::new();
            let report = receive(&mut chan, &mut out, Duration::from_secs(1)).await;
            (report, out)
        });

        let mut odd = packet::encode(PacketType::Data, 0, b"zz");
        odd[0] = 42;
        peer.send(&odd).await.unwrap();
        peer.send(&Packet::ack(7).encode()).await.unwrap();
        peer.send(b"tiny").await.unwrap();
        peer.send(&Packet::data(0, b"ok".to_vec()).encode()).await.unwrap();
        peer.send(&Packet::end().encode()).await.unwrap();

        let (report, out) = task.await.unwrap();
        let report = report.unwrap();
        assert_eq!(out, b"ok");
        assert_eq!(report.chunks, 1);

        // Exactly one ACK came back, for the accepted chunk.
        let ack = peer.recv_until(Instant::now()).await.unwrap().unwrap();
        assert_eq!(decode(&ack).unwrap().seq, 0);
        assert_eq!(peer.recv_until(Instant::now()).await.unwrap(), None);
    }
}
