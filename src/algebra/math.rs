//! Module for share arithmetic over vectors and matrices.
//!
//! Every value is a `Share`, a signed 64-bit integer, and all arithmetic wraps
//! around on overflow. The ring is thus `Z_2^64` and no modular reduction is
//! ever performed.
//!
//! `Vector` is backed by a boxed slice, since we don't want to grow or shrink
//! our mathematical vectors. `Matrix` is stored row-major in a single boxed slice.
//!
//! Binary operations require equal dimensions and report a `MathError` otherwise.
//! A mismatch always means the protocol is out of step, so callers are expected
//! to abort rather than recover.

use std::fmt;

use rayon::prelude::*;
use thiserror::Error;

/// A single additive share (or a plain value) in `Z_2^64`.
pub type Share = i64;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MathError {
    #[error("Dimension mismatch: {left:?} against {right:?}")]
    DimensionMismatch {
        left: (usize, usize),
        right: (usize, usize),
    },
    #[error("Index {index} out of bounds for dimension {len}")]
    OutOfBounds { index: usize, len: usize },
    #[error("Row {row} has {found} columns, expected {expected}")]
    Ragged {
        row: usize,
        found: usize,
        expected: usize,
    },
    #[error("Shares at position {position} reconstruct to {value}, not a bit")]
    NotABit { position: usize, value: Share },
}

fn ensure_len(left: usize, right: usize) -> Result<(), MathError> {
    if left == right {
        Ok(())
    } else {
        Err(MathError::DimensionMismatch {
            left: (1, left),
            right: (1, right),
        })
    }
}

/// Represention of a mathematical vector of shares.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct Vector(Box<[Share]>);

impl Vector {
    pub fn from_vec(v: Vec<Share>) -> Self {
        Self(v.into_boxed_slice())
    }

    pub fn from_array<const N: usize>(v: [Share; N]) -> Self {
        Self(Box::new(v))
    }

    pub fn zeros(len: usize) -> Self {
        Self(vec![0; len].into_boxed_slice())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<Share> {
        self.0.iter()
    }

    pub fn into_vec(self) -> Vec<Share> {
        self.0.into_vec()
    }

    fn zip_with(
        &self,
        other: &Self,
        op: impl Fn(Share, Share) -> Share + Sync + Send,
    ) -> Result<Self, MathError> {
        ensure_len(self.len(), other.len())?;
        let internal = if cfg!(feature = "rayon") {
            self.0
                .par_iter()
                .zip(other.0.par_iter())
                .map(|(&a, &b)| op(a, b))
                .collect()
        } else {
            self.0
                .iter()
                .zip(other.0.iter())
                .map(|(&a, &b)| op(a, b))
                .collect()
        };
        Ok(Self(internal))
    }

    /// Elementwise wrapping addition
    pub fn add(&self, other: &Self) -> Result<Self, MathError> {
        self.zip_with(other, Share::wrapping_add)
    }

    /// Elementwise wrapping subtraction
    pub fn sub(&self, other: &Self) -> Result<Self, MathError> {
        self.zip_with(other, Share::wrapping_sub)
    }

    /// Elementwise XOR, only meaningful for boolean shares.
    pub fn xor(&self, other: &Self) -> Result<Self, MathError> {
        self.zip_with(other, |a, b| a ^ b)
    }

    /// In-place elementwise addition.
    pub fn add_assign(&mut self, other: &Self) -> Result<(), MathError> {
        ensure_len(self.len(), other.len())?;
        self.0
            .iter_mut()
            .zip(other.0.iter())
            .for_each(|(a, &b)| *a = a.wrapping_add(b));
        Ok(())
    }

    /// Inner product under wraparound.
    pub fn dot(&self, other: &Self) -> Result<Share, MathError> {
        ensure_len(self.len(), other.len())?;
        let sum = self
            .0
            .iter()
            .zip(other.0.iter())
            .fold(0, |acc: Share, (&a, &b)| acc.wrapping_add(a.wrapping_mul(b)));
        Ok(sum)
    }
}

impl std::ops::Deref for Vector {
    type Target = [Share];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl std::ops::DerefMut for Vector {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl FromIterator<Share> for Vector {
    fn from_iter<T: IntoIterator<Item = Share>>(iter: T) -> Self {
        let boxed = iter.into_iter().collect();
        Self(boxed)
    }
}

impl IntoIterator for Vector {
    type Item = Share;

    type IntoIter = std::vec::IntoIter<Share>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_vec().into_iter()
    }
}

impl AsRef<[Share]> for Vector {
    fn as_ref(&self) -> &[Share] {
        &self.0
    }
}

/// Dense row-major matrix of shares.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct Matrix {
    rows: usize,
    cols: usize,
    data: Box<[Share]>,
}

impl Matrix {
    /// Construct a matrix from row-major data.
    ///
    /// * `rows`: number of rows
    /// * `cols`: number of columns
    /// * `data`: `rows * cols` elements, row after row
    pub fn new(rows: usize, cols: usize, data: Vec<Share>) -> Result<Self, MathError> {
        if rows.checked_mul(cols) != Some(data.len()) {
            return Err(MathError::DimensionMismatch {
                left: (rows, cols),
                right: (1, data.len()),
            });
        }
        Ok(Self {
            rows,
            cols,
            data: data.into_boxed_slice(),
        })
    }

    /// Construct a matrix by evaluating `f(row, col)` in row-major order.
    pub fn from_fn(rows: usize, cols: usize, mut f: impl FnMut(usize, usize) -> Share) -> Self {
        let mut data = Vec::with_capacity(rows * cols);
        for r in 0..rows {
            for c in 0..cols {
                data.push(f(r, c));
            }
        }
        Self {
            rows,
            cols,
            data: data.into_boxed_slice(),
        }
    }

    pub fn zeros(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            data: vec![0; rows * cols].into_boxed_slice(),
        }
    }

    /// Construct a matrix from a list of rows which must all be equally long.
    pub fn from_rows<R: AsRef<[Share]>>(rows: &[R]) -> Result<Self, MathError> {
        let cols = rows.first().map_or(0, |r| r.as_ref().len());
        let mut data = Vec::with_capacity(rows.len() * cols);
        for (i, row) in rows.iter().enumerate() {
            let row = row.as_ref();
            if row.len() != cols {
                return Err(MathError::Ragged {
                    row: i,
                    found: row.len(),
                    expected: cols,
                });
            }
            data.extend_from_slice(row);
        }
        Ok(Self {
            rows: rows.len(),
            cols,
            data: data.into_boxed_slice(),
        })
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Row-major view of all elements.
    pub fn as_slice(&self) -> &[Share] {
        &self.data
    }

    pub fn get(&self, row: usize, col: usize) -> Option<Share> {
        if row < self.rows && col < self.cols {
            Some(self.data[row * self.cols + col])
        } else {
            None
        }
    }

    pub fn row(&self, i: usize) -> Result<&[Share], MathError> {
        if i >= self.rows {
            return Err(MathError::OutOfBounds {
                index: i,
                len: self.rows,
            });
        }
        Ok(&self.data[i * self.cols..(i + 1) * self.cols])
    }

    pub fn row_mut(&mut self, i: usize) -> Result<&mut [Share], MathError> {
        if i >= self.rows {
            return Err(MathError::OutOfBounds {
                index: i,
                len: self.rows,
            });
        }
        Ok(&mut self.data[i * self.cols..(i + 1) * self.cols])
    }

    /// Copy out column `i`.
    pub fn column(&self, i: usize) -> Result<Vector, MathError> {
        if i >= self.cols {
            return Err(MathError::OutOfBounds {
                index: i,
                len: self.cols,
            });
        }
        Ok((0..self.rows).map(|r| self.data[r * self.cols + i]).collect())
    }

    pub fn iter_rows(&self) -> impl Iterator<Item = &[Share]> {
        // chunks_exact panics on zero
        self.data.chunks_exact(self.cols.max(1)).take(self.rows)
    }

    pub fn transpose(&self) -> Self {
        let mut data = vec![0; self.data.len()];
        for r in 0..self.rows {
            for c in 0..self.cols {
                data[c * self.rows + r] = self.data[r * self.cols + c];
            }
        }
        Self {
            rows: self.cols,
            cols: self.rows,
            data: data.into_boxed_slice(),
        }
    }

    fn ensure_shape(&self, other: &Self) -> Result<(), MathError> {
        if self.shape() == other.shape() {
            Ok(())
        } else {
            Err(MathError::DimensionMismatch {
                left: self.shape(),
                right: other.shape(),
            })
        }
    }

    fn zip_with(
        &self,
        other: &Self,
        op: impl Fn(Share, Share) -> Share + Sync + Send,
    ) -> Result<Self, MathError> {
        self.ensure_shape(other)?;
        let data = if cfg!(feature = "rayon") {
            self.data
                .par_iter()
                .zip(other.data.par_iter())
                .map(|(&a, &b)| op(a, b))
                .collect()
        } else {
            self.data
                .iter()
                .zip(other.data.iter())
                .map(|(&a, &b)| op(a, b))
                .collect()
        };
        Ok(Self {
            rows: self.rows,
            cols: self.cols,
            data,
        })
    }

    pub fn add(&self, other: &Self) -> Result<Self, MathError> {
        self.zip_with(other, Share::wrapping_add)
    }

    pub fn sub(&self, other: &Self) -> Result<Self, MathError> {
        self.zip_with(other, Share::wrapping_sub)
    }

    pub fn xor(&self, other: &Self) -> Result<Self, MathError> {
        self.zip_with(other, |a, b| a ^ b)
    }

    /// Matrix-vector product `self * v`.
    pub fn mul_vec(&self, v: &Vector) -> Result<Vector, MathError> {
        if v.len() != self.cols {
            return Err(MathError::DimensionMismatch {
                left: self.shape(),
                right: (v.len(), 1),
            });
        }
        let dot = |row: &[Share]| {
            row.iter()
                .zip(v.iter())
                .fold(0, |acc: Share, (&a, &b)| acc.wrapping_add(a.wrapping_mul(b)))
        };
        let out: Vec<Share> = if cfg!(feature = "rayon") {
            self.data
                .par_chunks_exact(self.cols.max(1))
                .take(self.rows)
                .map(dot)
                .collect()
        } else {
            self.iter_rows().map(dot).collect()
        };
        Ok(Vector::from_vec(out))
    }
}

impl fmt::Display for Matrix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for row in self.iter_rows() {
            let line = itertools::join(row, " ");
            writeln!(f, "{line}")?;
        }
        Ok(())
    }
}

/// Check that two vectors are additive shares of a bit vector.
///
/// Returns the reconstructed vector.
pub fn check_additive_bits(a: &Vector, b: &Vector) -> Result<Vector, MathError> {
    let sum = a.add(b)?;
    check_bits(&sum)?;
    Ok(sum)
}

/// Check that two vectors are XOR shares of a bit vector.
///
/// Returns the reconstructed vector.
pub fn check_xor_bits(a: &Vector, b: &Vector) -> Result<Vector, MathError> {
    let xor = a.xor(b)?;
    check_bits(&xor)?;
    Ok(xor)
}

fn check_bits(v: &Vector) -> Result<(), MathError> {
    match v.iter().position(|&x| x != 0 && x != 1) {
        Some(position) => Err(MathError::NotABit {
            position,
            value: v[position],
        }),
        None => Ok(()),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn add() {
        let a = Vector::from_array([1, 2]);
        let b = Vector::from_array([3, 4]);
        let c = a.add(&b).unwrap();
        assert_eq!(c, Vector::from_array([4, 6]));
    }

    #[test]
    fn sub_wraps() {
        let a = Vector::from_array([i64::MIN, 4]);
        let b = Vector::from_array([1, 2]);
        let c = a.sub(&b).unwrap();
        assert_eq!(c, Vector::from_array([i64::MAX, 2]));
    }

    #[test]
    fn mismatch() {
        let a = Vector::from_array([1, 2, 3]);
        let b = Vector::from_array([1, 2]);
        assert_eq!(
            a.dot(&b),
            Err(MathError::DimensionMismatch {
                left: (1, 3),
                right: (1, 2)
            })
        );
        assert!(a.add(&b).is_err());
        assert!(a.xor(&b).is_err());
    }

    #[test]
    fn dot_wraps() {
        let a = Vector::from_array([i64::MAX, 2]);
        let b = Vector::from_array([2, 3]);
        // (2^63 - 1) * 2 = -2 in Z_2^64
        assert_eq!(a.dot(&b).unwrap(), 4);
    }

    #[test]
    fn matrix_ops() {
        let m = Matrix::from_rows(&[[1i64, 2, 3], [4, 5, 6]]).unwrap();
        assert_eq!(m.shape(), (2, 3));
        assert_eq!(m.row(1).unwrap(), &[4, 5, 6]);
        assert_eq!(m.column(2).unwrap(), Vector::from_array([3, 6]));
        assert!(m.column(3).is_err());

        let t = m.transpose();
        assert_eq!(t, Matrix::from_rows(&[[1i64, 4], [2, 5], [3, 6]]).unwrap());

        let v = Vector::from_array([1, 0, 2]);
        assert_eq!(m.mul_vec(&v).unwrap(), Vector::from_array([7, 16]));
        assert!(t.mul_vec(&v).is_err());

        let sum = m.add(&m).unwrap();
        assert_eq!(sum.get(1, 2), Some(12));
        assert_eq!(sum.sub(&m).unwrap(), m);
        assert!(m.xor(&m).unwrap().as_slice().iter().all(|&x| x == 0));
        assert!(m.add(&t).is_err());
    }

    #[test]
    fn ragged() {
        let rows: Vec<Vec<Share>> = vec![vec![1, 2], vec![3]];
        assert_eq!(
            Matrix::from_rows(&rows),
            Err(MathError::Ragged {
                row: 1,
                found: 1,
                expected: 2
            })
        );
    }

    #[test]
    fn bit_checks() {
        let a = Vector::from_array([5, -3, 9]);
        let b = Vector::from_array([-5, 4, -9]);
        assert_eq!(
            check_additive_bits(&a, &b).unwrap(),
            Vector::from_array([0, 1, 0])
        );

        let c = Vector::from_array([5, 4, 9]);
        assert_eq!(
            check_additive_bits(&a, &c),
            Err(MathError::NotABit {
                position: 0,
                value: 10
            })
        );

        let x = Vector::from_array([0b1010, 0b0111]);
        let y = Vector::from_array([0b1011, 0b0111]);
        assert_eq!(check_xor_bits(&x, &y).unwrap(), Vector::from_array([1, 0]));
        assert!(check_xor_bits(&x, &a).is_err());
    }
}
