//! Two-party additive secret sharing.
//!
//! A value `v` is shared as `(s0, s1)` with `s0 + s1 = v` under wraparound.
//! `s0` is uniformly random in `[1, bound]`, `s1 = v - s0`.

use rand::Rng;

use crate::{
    algebra::{math, MathError, Matrix, Share, Vector},
    schemes::Shared,
};

/// Sample a single element uniformly from `[1, bound]`.
pub fn sample(bound: Share, rng: &mut impl Rng) -> Share {
    rng.gen_range(1..=bound.max(1))
}

/// Sample a vector of `len` elements from `[1, bound]`.
pub fn sample_vector(len: usize, bound: Share, rng: &mut impl Rng) -> Vector {
    (0..len).map(|_| sample(bound, rng)).collect()
}

/// Sample a `rows x cols` matrix from `[1, bound]`.
pub fn sample_matrix(rows: usize, cols: usize, bound: Share, rng: &mut impl Rng) -> Matrix {
    Matrix::from_fn(rows, cols, |_, _| sample(bound, rng))
}

impl Shared for Share {
    fn share(&self, bound: Share, rng: &mut impl Rng) -> [Self; 2] {
        let s0 = sample(bound, rng);
        [s0, self.wrapping_sub(s0)]
    }

    fn recombine(shares: &[Self; 2]) -> Result<Self, MathError> {
        Ok(shares[0].wrapping_add(shares[1]))
    }
}

impl Shared for Vector {
    fn share(&self, bound: Share, rng: &mut impl Rng) -> [Self; 2] {
        let s0 = sample_vector(self.len(), bound, rng);
        let s1 = self.iter().zip(s0.iter()).map(|(&v, &r)| v.wrapping_sub(r)).collect();
        [s0, s1]
    }

    fn recombine(shares: &[Self; 2]) -> Result<Self, MathError> {
        shares[0].add(&shares[1])
    }
}

impl Shared for Matrix {
    fn share(&self, bound: Share, rng: &mut impl Rng) -> [Self; 2] {
        let (rows, cols) = self.shape();
        let s0 = sample_matrix(rows, cols, bound, rng);
        let (v, r) = (self.as_slice(), s0.as_slice());
        let s1 = Matrix::from_fn(rows, cols, |i, j| v[i * cols + j].wrapping_sub(r[i * cols + j]));
        [s0, s1]
    }

    fn recombine(shares: &[Self; 2]) -> Result<Self, MathError> {
        shares[0].add(&shares[1])
    }
}

/// Share the standard basis vector `e_index` of length `len`.
///
/// The shares are checked to recombine into a bit vector before being returned.
pub fn one_hot(
    len: usize,
    index: usize,
    bound: Share,
    rng: &mut impl Rng,
) -> Result<[Vector; 2], MathError> {
    if index >= len {
        return Err(MathError::OutOfBounds { index, len });
    }
    let mut e = Vector::zeros(len);
    e[index] = 1;
    let [s0, s1] = e.share(bound, rng);
    math::check_additive_bits(&s0, &s1)?;
    Ok([s0, s1])
}

#[cfg(test)]
mod test {
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    use super::*;

    const BOUND: Share = 69_696_969;

    #[test]
    fn scalar() {
        let mut rng = ChaCha20Rng::seed_from_u64(1);
        for v in [0, 1, -1, 42, i64::MAX, i64::MIN] {
            let shares = v.share(BOUND, &mut rng);
            assert!((1..=BOUND).contains(&shares[0]));
            assert_eq!(Share::recombine(&shares).unwrap(), v);
        }
    }

    #[test]
    fn matrix() {
        let mut rng = ChaCha20Rng::seed_from_u64(2);
        let m = Matrix::from_rows(&[[1i64, 2, 3], [4, 5, 6], [7, 8, 9]]).unwrap();
        let shares = m.share(BOUND, &mut rng);
        assert_ne!(shares[0], m);
        assert_eq!(Matrix::recombine(&shares).unwrap(), m);
    }

    #[test]
    fn one_hot_selection() {
        let mut rng = ChaCha20Rng::seed_from_u64(3);
        for n in [1, 4, 16] {
            for idx in 0..n {
                let [s0, s1] = one_hot(n, idx, BOUND, &mut rng).unwrap();
                assert_eq!(s0.len(), n);
                for j in 0..n {
                    let sum = s0[j].wrapping_add(s1[j]);
                    assert_eq!(sum, (j == idx) as Share);
                }
            }
        }
    }

    #[test]
    fn one_hot_out_of_range() {
        let mut rng = ChaCha20Rng::seed_from_u64(4);
        assert_eq!(
            one_hot(3, 3, BOUND, &mut rng),
            Err(MathError::OutOfBounds { index: 3, len: 3 })
        );
    }
}
