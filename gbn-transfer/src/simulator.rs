//! Fault-injecting channel for deterministic testing.
//!
//! Real networks drop, reorder, duplicate and corrupt datagrams.  To exercise
//! the recovery paths without depending on actual network conditions,
//! [`Simulator`] wraps any [`Datagram`] channel and applies a fault model to
//! everything **sent** through it:
//!
//! | Fault            | Description                                           |
//! |------------------|-------------------------------------------------------|
//! | Packet loss      | Drop a datagram with probability `loss_rate`.         |
//! | Scripted loss    | Drop the first datagram of a given type and sequence. |
//! | Duplication      | Deliver a datagram twice.                             |
//! | Corruption       | Flip one payload bit; the header stays intact.        |
//! | Reordering       | Hold a DATA datagram back until the next send.        |
//!
//! The random faults come from a seeded RNG, so a failing run replays
//! identically.  Receives pass straight through.

use std::io;

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::time::Instant;

use crate::channel::Datagram;
use crate::packet::{self, PacketType, HEADER_LEN};

/// Configuration for the fault-injection model.
///
/// All probabilities are in the range `[0.0, 1.0]`.
#[derive(Debug, Clone)]
pub struct SimulatorConfig {
    /// Probability that any given datagram is silently dropped.
    pub loss_rate: f64,
    /// Probability that a datagram is delivered twice.
    pub duplicate_rate: f64,
    /// Probability that one payload bit is flipped.
    pub corrupt_rate: f64,
    /// Probability that a DATA datagram is overtaken by the next one.
    pub reorder_rate: f64,
    /// RNG seed.
    pub seed: u64,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        // No faults by default; the simulator is a transparent pass-through.
        Self {
            loss_rate: 0.0,
            duplicate_rate: 0.0,
            corrupt_rate: 0.0,
            reorder_rate: 0.0,
            seed: 0,
        }
    }
}

/// What the simulator has done so far.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FaultStats {
    pub dropped: u32,
    pub duplicated: u32,
    pub corrupted: u32,
    pub reordered: u32,
}

/// A fault-injecting wrapper around another channel.
#[derive(Debug)]
pub struct Simulator<C> {
    inner: C,
    config: SimulatorConfig,
    rng: StdRng,
    /// One-shot drops, consumed on first match.
    scripted_drops: Vec<(PacketType, u32)>,
    /// Reordered datagram waiting to follow the next send.
    held: Option<Vec<u8>>,
    stats: FaultStats,
}

impl<C: Datagram> Simulator<C> {
    pub fn new(inner: C, config: SimulatorConfig) -> Self {
        let rng = StdRng::seed_from_u64(config.seed);
        Self {
            inner,
            config,
            rng,
            scripted_drops: Vec::new(),
            held: None,
            stats: FaultStats::default(),
        }
    }

    /// A simulator that injects no random faults.
    pub fn passthrough(inner: C) -> Self {
        Self::new(inner, SimulatorConfig::default())
    }

    /// Drop the first outgoing packet of type `kind` with sequence `seq`.
    pub fn drop_once(mut self, kind: PacketType, seq: u32) -> Self {
        self.scripted_drops.push((kind, seq));
        self
    }

    pub fn stats(&self) -> &FaultStats {
        &self.stats
    }

    fn roll(&mut self, probability: f64) -> bool {
        self.rng.gen_bool(probability.clamp(0.0, 1.0))
    }

    fn take_scripted_drop(&mut self, kind: PacketType, seq: u32) -> bool {
        match self
            .scripted_drops
            .iter()
            .position(|&(k, s)| k == kind && s == seq)
        {
            Some(idx) => {
                self.scripted_drops.swap_remove(idx);
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl<C: Datagram> Datagram for Simulator<C> {
    async fn send(&mut self, bytes: &[u8]) -> io::Result<()> {
        let header = packet::decode(bytes).ok().map(|p| (p.kind, p.seq));

        if let Some((kind, seq)) = header {
            if self.take_scripted_drop(kind, seq) {
                log::debug!("[sim] scripted drop of {kind} seq={seq}");
                self.stats.dropped += 1;
                return Ok(());
            }
        }

        if self.roll(self.config.loss_rate) {
            self.stats.dropped += 1;
            return Ok(());
        }

        let mut datagram = bytes.to_vec();
        if datagram.len() > HEADER_LEN && self.roll(self.config.corrupt_rate) {
            let bit = self.rng.gen_range(0..(datagram.len() - HEADER_LEN) * 8);
            datagram[HEADER_LEN + bit / 8] ^= 1 << (bit % 8);
            self.stats.corrupted += 1;
        }

        let is_data = matches!(header, Some((PacketType::Data, _)));
        if is_data && self.held.is_none() && self.roll(self.config.reorder_rate) {
            self.held = Some(datagram);
            self.stats.reordered += 1;
            return Ok(());
        }

        self.inner.send(&datagram).await?;
        if self.roll(self.config.duplicate_rate) {
            self.inner.send(&datagram).await?;
            self.stats.duplicated += 1;
        }
        if let Some(held) = self.held.take() {
            self.inner.send(&held).await?;
        }
        Ok(())
    }

    async fn recv_until(&mut self, deadline: Instant) -> io::Result<Option<Vec<u8>>> {
        self.inner.recv_until(deadline).await
    }
}
