//! Distance functions used to score candidates.
use crate::data::Numeric;
use ndarray::prelude::*;

/// Distance metric used by the scanner.
///
/// The hash is trained for Euclidean similarity, but scoring is
/// metric-agnostic. Squared L2 is monotone in L2 and therefore valid for
/// ranking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metric {
    /// Squared Euclidean distance.
    SquaredL2,
    /// Manhattan distance.
    L1,
}

impl Metric {
    /// Distance between two vectors of equal length.
    ///
    /// # Panics
    ///
    /// Panics if `a.len() != b.len()`.
    pub fn distance<N: Numeric>(&self, a: &[N], b: &[N]) -> f32 {
        match self {
            Metric::SquaredL2 => squared_l2(a, b),
            Metric::L1 => l1(a, b),
        }
    }
}

/// Squared L2 distance between two vectors.
///
/// # Examples
///
/// ```
/// use itq_lsh::dist::squared_l2;
/// let a = vec![1., -1.];
/// let b = vec![0.2, 1.2];
/// let d = squared_l2(&a, &b);
/// ```
pub fn squared_l2<N: Numeric>(a: &[N], b: &[N]) -> f32 {
    let d = &aview1(a) - &aview1(b);
    d.dot(&d).to_f32().unwrap()
}

/// L1 (Manhattan) distance between two vectors.
///
/// # Examples
///
/// ```
/// use itq_lsh::dist::l1;
/// let a = vec![1., -1.];
/// let b = vec![0.2, 1.2];
/// let d = l1(&a, &b);
/// ```
pub fn l1<N: Numeric>(a: &[N], b: &[N]) -> f32 {
    a.iter()
        .zip(b)
        .fold(N::zero(), |acc, (&x, &y)| acc + (x - y).abs())
        .to_f32()
        .unwrap()
}
