//! Error types.
//!
//! Corruption and reordering never show up here: the engines recover from
//! them by retransmission.  Only the outcomes that end a transfer are
//! surfaced to the caller as a [`TransferError`].

use std::time::Duration;

use thiserror::Error;

/// A datagram that cannot be parsed at all.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PacketError {
    #[error("malformed packet: {len} bytes is shorter than the header")]
    Malformed { len: usize },
}

/// Terminal outcome of a failed transfer.
#[derive(Error, Debug)]
pub enum TransferError {
    /// The sender saw `retries` consecutive timeouts without progress.  The
    /// peer has been sent an ERROR packet.
    #[error("retry limit exceeded after {retries} consecutive timeouts")]
    RetryLimitExceeded { retries: u32 },

    /// The receiver heard nothing for the whole idle timeout.  Partial
    /// output is kept.
    #[error("peer silent for {0:?}")]
    PeerTimeout(Duration),

    /// The peer aborted with an ERROR packet.  Partial output is discarded.
    #[error("peer reported error: {0}")]
    PeerReportedError(String),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Rejected configuration values.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("window capacity must be at least 1")]
    ZeroWindow,
    #[error("chunk size must be between 1 and {max} bytes, got {got}")]
    ChunkSize { got: usize, max: usize },
    #[error("max retries must be at least 1")]
    ZeroRetries,
    #[error("{0} must be non-zero")]
    ZeroTimeout(&'static str),
}
