//! Du-Atallah correlated randomness.
//!
//! Both triple kinds satisfy `Z0 + Z1 = X0·Y1 + X1·Y0`. The dealer samples
//! `X0, X1, Y0, Y1` and a mask `T`, then hands out `Z0 = X0·Y1 + T` and
//! `Z1 = X1·Y0 - T`.

use std::{
    collections::{hash_map::DefaultHasher, HashSet},
    hash::{Hash, Hasher},
};

use rand::Rng;

use crate::{
    algebra::{Share, Vector},
    protocols::ProtocolError,
    schemes::additive::{sample, sample_vector},
};

/// One party's half of a scalar multiplication triple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MultTriple {
    pub x: Share,
    pub y: Share,
    pub z: Share,
}

impl MultTriple {
    /// Sample both halves of a fresh triple.
    pub fn deal(bound: Share, rng: &mut impl Rng) -> [Self; 2] {
        let x0 = sample(bound, rng);
        let x1 = sample(bound, rng);
        let y0 = sample(bound, rng);
        let y1 = sample(bound, rng);
        let t = sample(bound, rng);
        [
            Self {
                x: x0,
                y: y0,
                z: x0.wrapping_mul(y1).wrapping_add(t),
            },
            Self {
                x: x1,
                y: y1,
                z: x1.wrapping_mul(y0).wrapping_sub(t),
            },
        ]
    }
}

/// One party's half of a dot-product triple.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DotTriple {
    pub x: Vector,
    pub y: Vector,
    pub z: Share,
}

fn inner(a: &[Share], b: &[Share]) -> Share {
    a.iter()
        .zip(b)
        .fold(0, |acc: Share, (&a, &b)| acc.wrapping_add(a.wrapping_mul(b)))
}

impl DotTriple {
    /// Sample both halves of a fresh triple over vectors of length `len`.
    pub fn deal(len: usize, bound: Share, rng: &mut impl Rng) -> [Self; 2] {
        let x0 = sample_vector(len, bound, rng);
        let x1 = sample_vector(len, bound, rng);
        let y0 = sample_vector(len, bound, rng);
        let y1 = sample_vector(len, bound, rng);
        let t = sample(bound, rng);
        let z0 = inner(&x0, &y1).wrapping_add(t);
        let z1 = inner(&x1, &y0).wrapping_sub(t);
        [
            Self {
                x: x0,
                y: y0,
                z: z0,
            },
            Self {
                x: x1,
                y: y1,
                z: z1,
            },
        ]
    }

    pub fn len(&self) -> usize {
        self.x.len()
    }

    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }
}

/// Bookkeeping of consumed triples.
///
/// With the guard enabled every consumed query record is fingerprinted as a
/// whole and a second consumption of the same record is refused. Individual
/// triples may legitimately repeat when the bound is small, whole records
/// may not.
#[derive(Debug, Default)]
pub struct TripleLedger {
    consumed: u64,
    seen: Option<HashSet<u64>>,
}

impl TripleLedger {
    pub fn new(guard: bool) -> Self {
        Self {
            consumed: 0,
            seen: guard.then(HashSet::new),
        }
    }

    /// Mark the `triples` carried by `record` as consumed.
    pub fn consume(&mut self, record: &impl Hash, triples: usize) -> Result<(), ProtocolError> {
        if let Some(seen) = &mut self.seen {
            let mut hasher = DefaultHasher::new();
            record.hash(&mut hasher);
            let fingerprint = hasher.finish();
            if !seen.insert(fingerprint) {
                return Err(ProtocolError::RecordReused(fingerprint));
            }
        }
        self.consumed += triples as u64;
        Ok(())
    }

    /// Number of triples consumed so far.
    pub fn consumed(&self) -> u64 {
        self.consumed
    }
}

#[cfg(test)]
mod test {
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    use super::*;
    use crate::config::DEFAULT_BOUND;

    #[test]
    fn mult_correlation() {
        let mut rng = ChaCha20Rng::seed_from_u64(10);
        for _ in 0..1000 {
            let [t0, t1] = MultTriple::deal(DEFAULT_BOUND, &mut rng);
            let lhs = t0.z.wrapping_add(t1.z);
            let rhs = t0.x.wrapping_mul(t1.y).wrapping_add(t1.x.wrapping_mul(t0.y));
            assert_eq!(lhs, rhs);
        }
    }

    #[test]
    fn dot_correlation() {
        let mut rng = ChaCha20Rng::seed_from_u64(11);
        for i in 0..1000 {
            let len = i % 16 + 1;
            let [t0, t1] = DotTriple::deal(len, DEFAULT_BOUND, &mut rng);
            assert_eq!(t0.len(), len);
            assert_eq!(t1.y.len(), len);
            let lhs = t0.z.wrapping_add(t1.z);
            let rhs = t0
                .x
                .dot(&t1.y)
                .unwrap()
                .wrapping_add(t1.x.dot(&t0.y).unwrap());
            assert_eq!(lhs, rhs);
        }
    }

    #[test]
    fn ledger_refuses_reuse() {
        let mut rng = ChaCha20Rng::seed_from_u64(12);
        let [t0, _] = DotTriple::deal(4, DEFAULT_BOUND, &mut rng);
        let [m0, _] = MultTriple::deal(DEFAULT_BOUND, &mut rng);

        let mut ledger = TripleLedger::new(true);
        ledger.consume(&(&t0, &m0), 2).unwrap();
        ledger.consume(&(&m0, &t0), 2).unwrap();
        assert!(matches!(
            ledger.consume(&(&t0, &m0), 2),
            Err(ProtocolError::RecordReused(_))
        ));
        assert_eq!(ledger.consumed(), 4);

        let mut unguarded = TripleLedger::new(false);
        unguarded.consume(&t0, 1).unwrap();
        unguarded.consume(&t0, 1).unwrap();
        assert_eq!(unguarded.consumed(), 2);
    }

    #[test]
    fn equal_triples_in_distinct_records() {
        // with a bound of one every triple half holds the same values
        let mut rng = ChaCha20Rng::seed_from_u64(13);
        let [a, _] = MultTriple::deal(1, &mut rng);
        let [b, _] = MultTriple::deal(1, &mut rng);
        assert_eq!(a, b);

        let mut ledger = TripleLedger::new(true);
        ledger.consume(&(0u8, a), 1).unwrap();
        ledger.consume(&(1u8, b), 1).unwrap();
        assert_eq!(ledger.consumed(), 2);
    }
}
