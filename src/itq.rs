//! Per-table ITQ hash function: PCA projection plus a learned rotation.
//!
//! For more information on iterative quantization based hashing, see:
//!
//! ```text
//! Gong Y, Lazebnik S, Gordo A, et al. Iterative quantization: A
//! procrustean approach to learning binary codes for large-scale image
//! retrieval. IEEE TPAMI, 2013, 35(12): 2916-2929.
//! ```
use crate::code::Code;
use crate::data::Numeric;
use crate::index::Params;
use crate::source::VectorSource;
use crate::utils::create_rng;
use crate::{Error, Result};
use nalgebra::{DMatrix, SymmetricEigen};
use ndarray::prelude::*;
use ndarray_rand::RandomExt;
use rand_distr::StandardNormal;
use tracing::debug;

/// One table's learned hash: `code_i = (v · P · R)_i > 0`.
///
/// Both matrices are learned once by [`ItqHash::fit`] and immutable
/// afterwards. They are always `f32`, whatever the element type of the
/// data they were trained on.
#[derive(Debug, Clone)]
pub struct ItqHash {
    /// `dim × n_bits`; column i is the i-th retained principal component.
    projection: Array2<f32>,
    /// `n_bits × n_bits` orthogonal rotation.
    rotation: Array2<f32>,
}

impl ItqHash {
    /// Learn a projection and rotation from a sample of `source`.
    ///
    /// Samples `params.train_size` distinct keys with the seeded RNG, runs
    /// PCA on the sample covariance, and refines a random orthogonal
    /// rotation for `params.train_iters` Procrustes iterations.
    pub fn fit<N, S>(source: &S, params: &Params, seed: u64) -> Result<ItqHash>
    where
        N: Numeric,
        S: VectorSource<N>,
    {
        let s = params.train_size;
        let d = params.dim;
        let n = params.n_bits;
        if source.dim() != d {
            return Err(Error::Param(format!(
                "data dimension {} does not match the configured dimension {}",
                source.dim(),
                d
            )));
        }
        if s > source.size() {
            return Err(Error::Param(format!(
                "train sample of {} exceeds the {} vectors available",
                s,
                source.size()
            )));
        }
        let mut rng = create_rng(seed);

        let mut keys = rand::seq::index::sample(&mut rng, source.size(), s).into_vec();
        keys.sort_unstable();

        let mut x = DMatrix::<f32>::zeros(s, d);
        for (row, &key) in keys.iter().enumerate() {
            let v = source.get(key as u32)?;
            for (col, &val) in v.as_ref().iter().enumerate() {
                x[(row, col)] = val.to_f32().unwrap();
            }
        }

        debug!(sample = s, dim = d, "computing principal components");
        let mean = x.row_mean();
        let centered = DMatrix::from_fn(s, d, |i, j| x[(i, j)] - mean[j]);
        let cov = (centered.transpose() * &centered).unscale(s as f32 - 1.0);

        // nalgebra returns eigenpairs in no particular order; take the n
        // of largest eigenvalue.
        let eig = SymmetricEigen::new(cov);
        let mut order: Vec<usize> = (0..d).collect();
        order.sort_by(|&a, &b| eig.eigenvalues[b].total_cmp(&eig.eigenvalues[a]));
        let pca = DMatrix::from_fn(d, n, |i, j| eig.eigenvectors[(i, order[j])]);

        let projected = &x * &pca;

        // initial rotation: left singular vectors of a random Gaussian matrix
        let gaussian: Array2<f32> = Array::random_using((n, n), StandardNormal, &mut rng);
        let svd = DMatrix::from_fn(n, n, |i, j| gaussian[(i, j)]).svd(true, true);
        let mut rotation = svd
            .u
            .ok_or_else(|| Error::Numeric("SVD of the rotation seed failed".to_string()))?;

        debug!(iterations = params.train_iters, "refining rotation");
        for _ in 0..params.train_iters {
            let z = &projected * &rotation;
            let b = z.map(|x| if x > 0.0 { 1.0f32 } else { -1.0 });
            let svd = (b.transpose() * &projected).svd(true, true);
            let (u, v_t) = match (svd.u, svd.v_t) {
                (Some(u), Some(v_t)) => (u, v_t),
                _ => return Err(Error::Numeric("Procrustes SVD failed".to_string())),
            };
            rotation = v_t.transpose() * u.transpose();
        }

        if !rotation.iter().all(|x| x.is_finite()) || !pca.iter().all(|x| x.is_finite()) {
            return Err(Error::Numeric(
                "training produced non-finite projection or rotation values".to_string(),
            ));
        }

        Ok(ItqHash {
            projection: Array2::from_shape_fn((d, n), |(i, j)| pca[(i, j)]),
            rotation: Array2::from_shape_fn((n, n), |(i, j)| rotation[(i, j)]),
        })
    }

    pub(crate) fn from_parts(projection: Array2<f32>, rotation: Array2<f32>) -> ItqHash {
        ItqHash {
            projection,
            rotation,
        }
    }

    /// Hash a vector to its bucket code: bit i is `(v · P · R)_i > 0`.
    pub fn hash<N: Numeric>(&self, v: &[N]) -> Code {
        let v: Array1<f32> = v.iter().map(|x| x.to_f32().unwrap()).collect();
        let c = v.dot(&self.projection).dot(&self.rotation);
        let mut code = Code::zeros(self.n_bits());
        for (i, &x) in c.iter().enumerate() {
            code.set(i, x > 0.0);
        }
        code
    }

    pub fn dim(&self) -> usize {
        self.projection.nrows()
    }

    pub fn n_bits(&self) -> usize {
        self.projection.ncols()
    }

    pub(crate) fn projection(&self) -> &Array2<f32> {
        &self.projection
    }

    pub(crate) fn rotation(&self) -> &Array2<f32> {
        &self.rotation
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::source::MemorySource;
    use approx::assert_relative_eq;
    use rand::Rng;

    fn sample_source(size: usize, dim: usize, seed: u64) -> MemorySource<f32> {
        let mut rng = create_rng(seed);
        let data: Vec<f32> = (0..size * dim).map(|_| rng.gen::<f32>() - 0.5).collect();
        MemorySource::from_vec(dim, data).unwrap()
    }

    fn params(dim: usize, n_bits: usize, train_size: usize) -> Params {
        Params {
            n_hash_tables: 1,
            n_bits,
            dim,
            train_size,
            train_iters: 10,
        }
    }

    #[test]
    fn test_fit_is_deterministic() {
        let source = sample_source(100, 8, 7);
        let p = params(8, 4, 50);
        let a = ItqHash::fit(&source, &p, 3).unwrap();
        let b = ItqHash::fit(&source, &p, 3).unwrap();
        for (x, y) in a.projection.iter().zip(b.projection.iter()) {
            assert_relative_eq!(*x, *y, max_relative = 1e-5);
        }
        for (x, y) in a.rotation.iter().zip(b.rotation.iter()) {
            assert_relative_eq!(*x, *y, max_relative = 1e-5);
        }
    }

    #[test]
    fn test_rotation_is_orthogonal() {
        let source = sample_source(200, 10, 11);
        let hash = ItqHash::fit(&source, &params(10, 6, 100), 5).unwrap();
        let r = hash.rotation();
        let identity = r.t().dot(r);
        for i in 0..6 {
            for j in 0..6 {
                let expect = if i == j { 1.0 } else { 0.0 };
                assert!((identity[(i, j)] - expect).abs() < 1e-4);
            }
        }
    }

    #[test]
    fn test_hash_depends_only_on_parameters() {
        let source = sample_source(100, 8, 13);
        let hash = ItqHash::fit(&source, &params(8, 4, 60), 9).unwrap();
        let clone = ItqHash::from_parts(hash.projection().clone(), hash.rotation().clone());

        let mut rng = create_rng(17);
        for _ in 0..20 {
            let v: Vec<f32> = (0..8).map(|_| rng.gen()).collect();
            assert_eq!(hash.hash(&v), clone.hash(&v));
        }
    }

    #[test]
    fn test_close_vectors_share_codes_more_often() {
        let source = sample_source(500, 16, 19);
        let hash = ItqHash::fit(&source, &params(16, 8, 250), 21).unwrap();

        let mut rng = create_rng(23);
        let mut near = 0;
        let mut far = 0;
        for _ in 0..100 {
            let v: Vec<f32> = (0..16).map(|_| rng.gen::<f32>() - 0.5).collect();
            let close: Vec<f32> = v.iter().map(|x| x + 1e-4).collect();
            let distant: Vec<f32> = v.iter().map(|x| -x).collect();
            near += hash.hash(&v).hamming(&hash.hash(&close));
            far += hash.hash(&v).hamming(&hash.hash(&distant));
        }
        assert!(near < far);
    }
}
