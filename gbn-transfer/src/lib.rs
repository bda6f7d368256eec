//! `gbn-transfer`: file transfer over UDP with a Go-Back-N reliable transport.
//!
//! # Architecture
//!
//! ```text
//!  ┌──────────┐    DATA     ┌──────────┐
//!  │  sender  │────────────▶│ receiver │
//!  └────┬─────┘             └─────┬────┘
//!       │◀──────── ACK ───────────┘
//!       │
//!  ┌────▼──────────────────────────────┐
//!  │        Datagram channel           │
//!  │  (one peer, deadline-bound recv)  │
//!  └────┬──────────────────────────────┘
//!       │ raw UDP datagrams
//!  ┌────▼──────┐
//!  │  Socket   │  (thin async wrapper around tokio UdpSocket)
//!  └───────────┘
//! ```
//!
//! Each module has a single responsibility:
//! - [`packet`]     : wire format and CRC-32 (encode / decode)
//! - [`sender`]     : Go-Back-N send window and send loop
//! - [`receiver`]   : in-order acceptance, cumulative ACKs, output sinks
//! - [`channel`]    : the engines' view of one peer
//! - [`socket`]     : async UDP socket abstraction
//! - [`simulator`]  : seeded loss/duplication/corruption/reorder injection
//! - [`session`]    : request router (server) and requester (client)
//! - [`config`]     : per-transfer and server parameters
//! - [`error`]      : terminal transfer failures

pub mod channel;
pub mod config;
pub mod error;
pub mod packet;
pub mod receiver;
pub mod sender;
pub mod session;
pub mod simulator;
pub mod socket;

pub use config::{ServerConfig, TransferConfig};
pub use error::TransferError;
pub use receiver::{receive, ReceiveReport};
pub use sender::{send, SendReport};
