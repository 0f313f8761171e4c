//! Explicit configuration threaded through the generator, state machine and
//! network bootstrap.

use std::{fmt, net::SocketAddr, time::Duration};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::algebra::Share;

/// Default upper bound for sampled randomness.
pub const DEFAULT_BOUND: Share = 69_696_969;

/// Fewest random bits a record half must carry for the reuse guard to tell
/// honest records apart.
pub const MIN_GUARD_BITS: u32 = 32;

/// The three roles of a session.
///
/// P0 and P1 run the exact same code, the only difference being which
/// of them listens for the peer connection.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum,
)]
pub enum Role {
    Dealer,
    P0,
    P1,
}

impl Role {
    /// Index of a compute party, `None` for the dealer.
    pub fn party(self) -> Option<usize> {
        match self {
            Role::Dealer => None,
            Role::P0 => Some(0),
            Role::P1 => Some(1),
        }
    }

    /// Does this role accept the peer connection (rather than initiate it)?
    pub fn listens_for_peer(self) -> bool {
        self == Role::P1
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Role::Dealer => "dealer",
            Role::P0 => "p0",
            Role::P1 => "p1",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be at least one")]
    Empty(&'static str),
    #[error("Randomness bound must be positive, got {0}")]
    Bound(Share),
    #[error(
        "Bound {bound} leaves records with {bits} random bits, the reuse guard needs {}",
        MIN_GUARD_BITS
    )]
    WeakGuard { bound: Share, bits: u32 },
}

/// Model and randomness parameters.
///
/// * `features`: number of latent features (k)
/// * `users`: rows of the user matrix
/// * `items`: rows of the item matrix
/// * `bound`: upper bound for sampled randomness
/// * `guard_reuse`: reject a query record seen before by a compute party
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Params {
    pub features: usize,
    pub users: usize,
    pub items: usize,
    pub bound: Share,
    pub guard_reuse: bool,
}

impl Default for Params {
    fn default() -> Self {
        Self {
            features: 3,
            users: 3,
            items: 3,
            bound: DEFAULT_BOUND,
            guard_reuse: true,
        }
    }
}

impl Params {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.features == 0 {
            return Err(ConfigError::Empty("features"));
        }
        if self.users == 0 {
            return Err(ConfigError::Empty("users"));
        }
        if self.items == 0 {
            return Err(ConfigError::Empty("items"));
        }
        if self.bound < 1 {
            return Err(ConfigError::Bound(self.bound));
        }
        if self.guard_reuse && self.record_bits() < MIN_GUARD_BITS {
            return Err(ConfigError::WeakGuard {
                bound: self.bound,
                bits: self.record_bits(),
            });
        }
        Ok(())
    }

    /// Values the dealer samples for one half of a query record.
    pub fn record_samples(&self) -> usize {
        let (k, n) = (self.features, self.items);
        n + k * (2 * n + 1) + (2 * k + 1) + 3 * k + 1
    }

    /// Random bits in one half of a query record, rounded down.
    pub fn record_bits(&self) -> u32 {
        let per_sample = (self.bound.max(1) as f64).log2();
        (self.record_samples() as f64 * per_sample) as u32
    }

    /// Shape of the user matrix.
    pub fn user_shape(&self) -> (usize, usize) {
        (self.users, self.features)
    }

    /// Shape of the item matrix.
    pub fn item_shape(&self) -> (usize, usize) {
        (self.items, self.features)
    }
}

/// Addresses for the three point-to-point links.
///
/// * `dealer`: where the dealer listens for both compute parties
/// * `peer`: where P1 listens and P0 connects
/// * `connect_retries`: failed attempts tolerated on an outgoing connection,
///   `None` keeps retrying until the other end is up
/// * `retry_delay_ms`: pause between attempts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetConfig {
    pub dealer: SocketAddr,
    pub peer: SocketAddr,
    pub connect_retries: Option<u32>,
    pub retry_delay_ms: u64,
}

impl Default for NetConfig {
    fn default() -> Self {
        Self {
            dealer: SocketAddr::from(([127, 0, 0, 1], 9002)),
            peer: SocketAddr::from(([127, 0, 0, 1], 9001)),
            connect_retries: None,
            retry_delay_ms: 100,
        }
    }
}

impl NetConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    /// May another attempt follow `failed` failed ones?
    pub fn may_retry(&self, failed: u32) -> bool {
        self.connect_retries.map_or(true, |max| failed < max)
    }
}
