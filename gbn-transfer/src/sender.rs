//! Go-Back-N sender.
//!
//! [`SendWindow`] holds the send-side state of one transfer: up to
//! `window_capacity` framed DATA packets that have been sent but not yet
//! acknowledged.  [`send`] drives it against a [`Datagram`] channel.
//!
//! # Protocol contract
//!
//! - DATA sequence numbers start at 0 and count chunks, never bytes.
//! - ACKs are **cumulative**: `ack = K` confirms every chunk `<= K`.
//! - Each round transmits the **whole** window, so anything still
//!   unacknowledged is resent alongside newly framed chunks.
//! - A round that sees no advancing ACK within `packet_timeout` counts as a
//!   timeout; `max_retries` consecutive timeouts abort the transfer.
//!
//! ```text
//!    base            next_seq
//!      │                  │
//!  ────┼──────────────────┼──────────────────▶ chunk index
//!      │ <── in flight ──▶│ <── unread ─────▶
//! ```

use std::collections::BTreeMap;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::time::Instant;

use crate::channel::Datagram;
use crate::config::TransferConfig;
use crate::error::TransferError;
use crate::packet::{self, Packet, PacketType};

/// Diagnostic carried by the ERROR packet sent when retries run out.
pub const RETRY_LIMIT_MESSAGE: &str = "retry limit exceeded";

// ---------------------------------------------------------------------------
// SendWindow
// ---------------------------------------------------------------------------

/// Go-Back-N send-side state for one transfer.
#[derive(Debug)]
pub struct SendWindow {
    /// Sequence number of the **oldest** unacked chunk (left window edge).
    pub base: u32,

    /// Sequence number for the **next** chunk framed from the source.
    pub next_seq: u32,

    /// Consecutive timeouts since the window last moved.
    pub retry_count: u32,

    /// Maximum number of chunks in flight.
    capacity: usize,

    /// Encoded DATA packets keyed by sequence number.  Holds exactly the
    /// keys `base..next_seq`.
    in_flight: BTreeMap<u32, Vec<u8>>,
}

impl SendWindow {
    /// Create an empty window.  `capacity` must be at least 1.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity >= 1, "window capacity must be at least 1");
        Self {
            base: 0,
            next_seq: 0,
            retry_count: 0,
            capacity,
            in_flight: BTreeMap::new(),
        }
    }

    /// `true` when there is room for at least one more chunk.
    pub fn can_send(&self) -> bool {
        self.in_flight.len() < self.capacity
    }

    /// Number of chunks awaiting acknowledgement.
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    pub fn has_unacked(&self) -> bool {
        !self.in_flight.is_empty()
    }

    /// Frame `payload` as the next DATA packet and place it in the window.
    ///
    /// Returns the sequence number assigned.
    pub fn push(&mut self, payload: &[u8]) -> u32 {
        debug_assert!(
            self.can_send(),
            "push on a full window ({} / {})",
            self.in_flight.len(),
            self.capacity
        );
        let seq = self.next_seq;
        self.in_flight
            .insert(seq, packet::encode(PacketType::Data, seq, payload));
        self.next_seq += 1;
        seq
    }

    /// Process a cumulative ACK.
    ///
    /// Drops every in-flight chunk `<= ack`, moves `base` to `ack + 1` and
    /// clears the retry counter.  Returns the number of chunks released; `0`
    /// for a stale ACK (`ack < base`) or one for a chunk never sent
    /// (`ack >= next_seq`), neither of which touches any state.
    pub fn on_ack(&mut self, ack: u32) -> usize {
        if ack < self.base || ack >= self.next_seq {
            return 0;
        }
        let before = self.in_flight.len();
        self.in_flight = self.in_flight.split_off(&(ack + 1));
        self.base = ack + 1;
        self.retry_count = 0;
        before - self.in_flight.len()
    }

    /// Record a round without progress; returns the updated retry count.
    pub fn on_timeout(&mut self) -> u32 {
        self.retry_count += 1;
        self.retry_count
    }

    /// Encoded in-flight packets, oldest first.
    pub fn frames(&self) -> impl Iterator<Item = &[u8]> {
        self.in_flight.values().map(Vec::as_slice)
    }
}

// ---------------------------------------------------------------------------
// send
// ---------------------------------------------------------------------------

/// Counters describing a completed send.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SendReport {
    /// DATA chunks framed from the source.
    pub chunks: u32,
    /// Payload bytes read from the source.
    pub bytes: u64,
    /// Datagrams put on the wire, retransmissions and END included.
    pub datagrams_sent: u64,
    /// Rounds that ended without an advancing ACK.
    pub timeouts: u32,
}

/// Deliver everything readable from `source` to the peer behind `channel`.
///
/// Ends with an END packet on success.  On retry exhaustion an ERROR packet
/// is sent to the peer before returning
/// [`TransferError::RetryLimitExceeded`].
pub async fn send<C, R>(
    channel: &mut C,
    source: &mut R,
    config: &TransferConfig,
) -> Result<SendReport, TransferError>
where
    C: Datagram,
    R: AsyncRead + Unpin + Send,
{
    config.validate()?;

    let mut window = SendWindow::new(config.window_capacity);
    let mut report = SendReport::default();
    let mut exhausted = false;

    loop {
        while !exhausted && window.can_send() {
            let chunk = read_chunk(source, config.chunk_size).await?;
            exhausted = chunk.len() < config.chunk_size;
            if !chunk.is_empty() {
                window.push(&chunk);
                report.chunks += 1;
                report.bytes += chunk.len() as u64;
            }
        }

        if exhausted && !window.has_unacked() {
            break;
        }

        for frame in window.frames() {
            channel.send(frame).await?;
            report.datagrams_sent += 1;
        }
        log::debug!(
            "[send] → window base={} next_seq={} in_flight={}",
            window.base,
            window.next_seq,
            window.in_flight()
        );

        let deadline = Instant::now() + config.packet_timeout;
        match await_ack(channel, &mut window, deadline).await? {
            Some(released) => {
                log::debug!("[send] ← ACK base={} (slid {released})", window.base);
            }
            None => {
                report.timeouts += 1;
                let retries = window.on_timeout();
                log::debug!(
                    "[send] timeout {retries}/{}; resending from base {}",
                    config.max_retries,
                    window.base
                );
                if retries >= config.max_retries {
                    log::warn!("[send] giving up at base {} after {retries} timeouts", window.base);
                    channel.send(&Packet::error(RETRY_LIMIT_MESSAGE).encode()).await?;
                    return Err(TransferError::RetryLimitExceeded { retries });
                }
            }
        }
    }

    channel.send(&Packet::end().encode()).await?;
    report.datagrams_sent += 1;
    log::debug!("[send] → END after {} chunk(s)", report.chunks);
    Ok(report)
}

/// Wait until `deadline` for an ACK that moves the window.
///
/// Returns `Some(released)` on progress and `None` on timeout.  Stale,
/// corrupted and unrelated packets are skipped without extending the
/// deadline.
async fn await_ack<C: Datagram>(
    channel: &mut C,
    window: &mut SendWindow,
    deadline: Instant,
) -> Result<Option<usize>, TransferError> {
    while let Some(bytes) = channel.recv_until(deadline).await? {
        let pkt = match packet::decode(&bytes) {
            Ok(pkt) => pkt,
            Err(e) => {
                log::debug!("[send] dropping datagram: {e}");
                continue;
            }
        };
        match pkt.kind {
            PacketType::Ack if pkt.is_intact() => {
                let released = window.on_ack(pkt.seq);
                if released > 0 {
                    return Ok(Some(released));
                }
                log::debug!("[send] ← stale ACK {} (base={})", pkt.seq, window.base);
            }
            PacketType::Error => {
                let message = pkt.message();
                log::warn!("[send] ← ERROR: {message}");
                return Err(TransferError::PeerReportedError(message));
            }
            other => log::debug!("[send] ignoring {other} seq={}", pkt.seq),
        }
    }
    Ok(None)
}

/// Read up to `size` bytes; a short chunk means the source is exhausted.
async fn read_chunk<R>(source: &mut R, size: usize) -> std::io::Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let mut chunk = Vec::with_capacity(size);
    source.take(size as u64).read_to_end(&mut chunk).await?;
    Ok(chunk)
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::channel::memory_pair;
    use crate::packet::decode;

    fn filled(capacity: usize, count: u32) -> SendWindow {
        let mut w = SendWindow::new(capacity);
        for i in 0..count {
            w.push(&[i as u8; 4]);
        }
        w
    }

    #[test]
    fn initial_state() {
        let w = SendWindow::new(4);
        assert_eq!(w.base, 0);
        assert_eq!(w.next_seq, 0);
        assert!(w.can_send());
        assert!(!w.has_unacked());
        assert_eq!(w.in_flight(), 0);
    }

    #[test]
    fn push_assigns_consecutive_sequences() {
        let mut w = SendWindow::new(4);
        assert_eq!(w.push(b"abc"), 0);
        assert_eq!(w.push(b"def"), 1);
        assert_eq!(w.next_seq, 2);
        assert_eq!(w.base, 0);

        let seqs: Vec<u32> = w.frames().map(|f| decode(f).unwrap().seq).collect();
        assert_eq!(seqs, vec![0, 1]);
    }

    #[test]
    fn window_full_blocks_send() {
        let w = filled(2, 2);
        assert!(!w.can_send());
        assert_eq!(w.in_flight(), 2);
    }

    #[test]
    fn cumulative_ack_slides_multiple() {
        let mut w = filled(5, 5);
        assert_eq!(w.on_ack(2), 3);
        assert_eq!(w.base, 3);
        assert_eq!(w.in_flight(), 2);

        let seqs: Vec<u32> = w.frames().map(|f| decode(f).unwrap().seq).collect();
        assert_eq!(seqs, vec![3, 4]);
    }

    #[test]
    fn stale_ack_is_ignored_and_keeps_retry_count() {
        let mut w = filled(4, 3);
        w.on_ack(1);
        w.on_timeout();
        w.on_timeout();

        assert_eq!(w.on_ack(0), 0);
        assert_eq!(w.base, 2);
        assert_eq!(w.retry_count, 2);
    }

    #[test]
    fn ack_beyond_next_seq_ignored() {
        let mut w = filled(4, 2);
        assert_eq!(w.on_ack(2), 0);
        assert_eq!(w.on_ack(u32::MAX), 0);
        assert_eq!(w.base, 0);
        assert_eq!(w.in_flight(), 2);
    }

    #[test]
    fn progress_resets_retry_count() {
        let mut w = filled(4, 2);
        assert_eq!(w.on_timeout(), 1);
        assert_eq!(w.on_timeout(), 2);
        w.on_ack(0);
        assert_eq!(w.retry_count, 0);
    }

    #[test]
    fn sequences_are_not_reused_after_ack() {
        let mut w = filled(2, 2);
        w.on_ack(1);
        assert_eq!(w.push(b"next"), 2);
        assert_eq!(w.base, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_source_sends_only_end() {
        let (mut chan, mut peer) = memory_pair();
        let config = TransferConfig::new(4, Duration::from_millis(100), 3);

        let report = send(&mut chan, &mut &b""[..], &config).await.unwrap();
        assert_eq!(report.chunks, 0);
        assert_eq!(report.datagrams_sent, 1);

        let bytes = peer
            .recv_until(Instant::now() + Duration::from_secs(1))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(decode(&bytes).unwrap().kind, PacketType::End);
    }

    #[tokio::test(start_paused = true)]
    async fn silent_peer_exhausts_retries_and_gets_error() {
        let (mut chan, mut peer) = memory_pair();
        let config = TransferConfig::new(2, Duration::from_millis(100), 3).with_chunk_size(4);

        let err = send(&mut chan, &mut &b"abcdefgh"[..], &config)
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::RetryLimitExceeded { retries: 3 }));

        // Three rounds of the full window, then the ERROR.
        let mut kinds = Vec::new();
        while let Some(bytes) = peer.recv_until(Instant::now()).await.unwrap() {
            kinds.push(decode(&bytes).unwrap().kind);
        }
        assert_eq!(kinds.len(), 7);
        assert_eq!(kinds.last(), Some(&PacketType::Error));
    }

    #[tokio::test(start_paused = true)]
    async fn stale_acks_neither_extend_the_round_nor_reset_retries() {
        let (mut chan, mut peer) = memory_pair();
        let timeout = Duration::from_millis(100);
        let config = TransferConfig::new(2, timeout, 3).with_chunk_size(4);
        let mut source: &[u8] = b"abcdefgh";

        // Chunk 0 is acknowledged once; every DATA after that gets ACK 0 again.
        let stale_peer = async {
            let mut data_seqs = Vec::new();
            loop {
                let deadline = Instant::now() + Duration::from_secs(1);
                let Some(bytes) = peer.recv_until(deadline).await.unwrap() else {
                    break;
                };
                let pkt = decode(&bytes).unwrap();
                match pkt.kind {
                    PacketType::Data => {
                        data_seqs.push(pkt.seq);
                        peer.send(&Packet::ack(0).encode()).await.unwrap();
                    }
                    PacketType::Error => break,
                    _ => {}
                }
            }
            data_seqs
        };

        let start = Instant::now();
        let (result, data_seqs) = tokio::join!(send(&mut chan, &mut source, &config), stale_peer);
        let elapsed = Instant::now() - start;

        assert!(matches!(result, Err(TransferError::RetryLimitExceeded { retries: 3 })));
        // The first round, then chunk 1 alone for each of the three timed-out rounds.
        assert_eq!(data_seqs, vec![0, 1, 1, 1, 1]);
        assert!(elapsed >= timeout * 3, "gave up early: {elapsed:?}");
        assert!(elapsed < timeout * 4, "stale ACKs extended the rounds: {elapsed:?}");
    }
}
