//! Transfer and server configuration.
//!
//! Every engine instance receives its parameters explicitly; nothing here is
//! process-wide.  The defaults are the protocol's historical constants.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigError;
use crate::packet::MAX_PAYLOAD;

/// Default number of DATA packets allowed in flight.
pub const DEFAULT_WINDOW: usize = 5;
/// Default time to wait for an ACK before retransmitting the window.
pub const DEFAULT_PACKET_TIMEOUT: Duration = Duration::from_secs(2);
/// Default consecutive-timeout budget for the sender.
pub const DEFAULT_MAX_RETRIES: u32 = 5;
/// Default UDP port of the file server.
pub const DEFAULT_PORT: u16 = 5005;

/// Parameters for one transfer, shared by both engines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferConfig {
    /// Maximum number of unacknowledged DATA packets.
    pub window_capacity: usize,
    /// How long the sender waits for an ACK each round.
    pub packet_timeout: Duration,
    /// Consecutive timeouts after which the sender gives up.
    pub max_retries: u32,
    /// Payload bytes per DATA packet.
    pub chunk_size: usize,
    /// How long the receiver waits for any packet before giving up.
    pub idle_timeout: Duration,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW, DEFAULT_PACKET_TIMEOUT, DEFAULT_MAX_RETRIES)
    }
}

impl TransferConfig {
    /// Build a config with the default chunk size and an idle timeout long
    /// enough for the sender to exhaust its retries first.
    pub fn new(window_capacity: usize, packet_timeout: Duration, max_retries: u32) -> Self {
        Self {
            window_capacity,
            packet_timeout,
            max_retries,
            chunk_size: MAX_PAYLOAD,
            idle_timeout: packet_timeout.saturating_mul(max_retries.saturating_add(1)),
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.window_capacity == 0 {
            return Err(ConfigError::ZeroWindow);
        }
        if self.chunk_size == 0 || self.chunk_size > MAX_PAYLOAD {
            return Err(ConfigError::ChunkSize {
                got: self.chunk_size,
                max: MAX_PAYLOAD,
            });
        }
        if self.max_retries == 0 {
            return Err(ConfigError::ZeroRetries);
        }
        if self.packet_timeout.is_zero() {
            return Err(ConfigError::ZeroTimeout("packet timeout"));
        }
        if self.idle_timeout.is_zero() {
            return Err(ConfigError::ZeroTimeout("idle timeout"));
        }
        Ok(())
    }
}

/// File server settings.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: SocketAddr,
    /// Directory holding uploaded files and serving downloads.
    pub storage_dir: PathBuf,
    pub transfer: TransferConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            storage_dir: PathBuf::from("server_files"),
            transfer: TransferConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_protocol_constants() {
        let c = TransferConfig::default();
        assert_eq!(c.window_capacity, 5);
        assert_eq!(c.packet_timeout, Duration::from_secs(2));
        assert_eq!(c.max_retries, 5);
        assert_eq!(c.chunk_size, 1019);
        assert_eq!(c.idle_timeout, Duration::from_secs(12));
        assert_eq!(c.validate(), Ok(()));
    }

    #[test]
    fn idle_timeout_outlasts_sender_retries() {
        let c = TransferConfig::new(4, Duration::from_millis(100), 3);
        assert!(c.idle_timeout > c.packet_timeout * c.max_retries);
    }

    #[test]
    fn huge_retry_budget_saturates_idle_timeout() {
        let c = TransferConfig::new(5, Duration::from_secs(2), u32::MAX);
        assert_eq!(c.idle_timeout, Duration::from_secs(2).saturating_mul(u32::MAX));
        assert!(c.validate().is_ok());

        let c = TransferConfig::new(5, Duration::MAX, 3);
        assert_eq!(c.idle_timeout, Duration::MAX);
    }

    #[test]
    fn zero_window_rejected() {
        let c = TransferConfig::new(0, Duration::from_secs(1), 1);
        assert_eq!(c.validate(), Err(ConfigError::ZeroWindow));
    }

    #[test]
    fn oversized_chunk_rejected() {
        let c = TransferConfig::default().with_chunk_size(MAX_PAYLOAD + 1);
        assert!(matches!(c.validate(), Err(ConfigError::ChunkSize { .. })));
    }

    #[test]
    fn zero_timeouts_rejected() {
        let c = TransferConfig::new(1, Duration::ZERO, 1);
        assert_eq!(c.validate(), Err(ConfigError::ZeroTimeout("packet timeout")));
        let c = TransferConfig::default().with_idle_timeout(Duration::ZERO);
        assert_eq!(c.validate(), Err(ConfigError::ZeroTimeout("idle timeout")));
    }
}
