//! Secret sharing schemes.
//!
//! Only two-party additive sharing over `Z_2^64` is needed here, where a share
//! has the same type as the value it hides.

pub mod additive;

use rand::Rng;

use crate::algebra::{MathError, Share};

/// For a value of type `Self` the value can be split into two additive shares
/// and put back together again.
pub trait Shared: Sized {
    /// Split `self` into two shares, the first sampled uniformly from `[1, bound]`.
    ///
    /// * `bound`: upper bound on sampled randomness
    /// * `rng`: random number generator to use
    fn share(&self, bound: Share, rng: &mut impl Rng) -> [Self; 2];

    /// Sum two shares back into the secret.
    fn recombine(shares: &[Self; 2]) -> Result<Self, MathError>;
}
