#![allow(non_snake_case)]

use anyhow::{format_err, Error};
use ndarray::{s, Array1, Array2, ArrayView2};
use ndarray_linalg::svddc::JobSvd;
use ndarray_linalg::{SVDDCInto, QR};
use ndarray_rand::RandomExt;
use rand::SeedableRng;
use rand_distr::Normal;
use rand_pcg::Pcg64Mcg;

type SvdResult = (Array2<f64>, Array1<f64>, Array2<f64>);

/// Settings for the randomized truncated SVD
pub struct RandSvd {
    /// Extra projection dimensions beyond the requested rank
    pub oversample: usize,
    /// Number of power iterations
    pub n_iter: usize,
    pub seed: u64,
}

impl RandSvd {
    pub fn new() -> RandSvd {
        RandSvd {
            oversample: 10,
            n_iter: 4,
            seed: 0,
        }
    }

    /// Rank `k` SVD of `A` without centering. Returns `(U, s, V)` with `A ≈ U diag(s) Vᵀ` and
    /// the singular values in decreasing order.
    pub fn run(&self, A: &ArrayView2<f64>, k: usize) -> Result<SvdResult, Error> {
        let (m, n) = A.dim();
        if k == 0 || k > m.min(n) {
            return Err(format_err!("rank {} is out of range for a {}x{} matrix", k, m, n));
        }
        let l = (k + self.oversample).min(m.min(n));

        let mut rng = Pcg64Mcg::seed_from_u64(self.seed);
        let dist = Normal::new(0.0, 1.0).map_err(|e| format_err!("{e}"))?;

        if m >= n {
            let omega = Array2::random_using((n, l), dist, &mut rng);
            let mut Q: Array2<f64> = A.dot(&omega).qr()?.0;
            for _ in 0..self.n_iter {
                Q = Q.t().dot(A).reversed_axes().qr()?.0;
                Q = A.dot(&Q).qr()?.0;
            }

            let B = Q.t().dot(A);
            let (U, sigma, Vt) = truncated_svd(B, k)?;
            Ok((Q.dot(&U), sigma, Vt.reversed_axes()))
        } else {
            let omega = Array2::random_using((l, m), dist, &mut rng);
            let mut Q: Array2<f64> = omega.dot(A).reversed_axes().qr()?.0;
            for _ in 0..self.n_iter {
                Q = A.dot(&Q).qr()?.0;
                Q = Q.t().dot(A).reversed_axes().qr()?.0;
            }

            let B = A.dot(&Q);
            let (U, sigma, Vt) = truncated_svd(B, k)?;
            Ok((U, sigma, Q.dot(&Vt.t())))
        }
    }
}

impl Default for RandSvd {
    fn default() -> Self {
        Self::new()
    }
}

/// Leading `k` singular triplets of the small projected matrix `B`.
fn truncated_svd(B: Array2<f64>, k: usize) -> Result<SvdResult, Error> {
    let (U, sigma, Vt) = B.svddc_into(JobSvd::Some)?;
    let U = U.ok_or_else(|| format_err!("SVD returned no left singular vectors"))?;
    let Vt = Vt.ok_or_else(|| format_err!("SVD returned no right singular vectors"))?;
    Ok((
        U.slice(s![.., ..k]).to_owned(),
        sigma.slice(s![..k]).to_owned(),
        Vt.slice(s![..k, ..]).to_owned(),
    ))
}

#[cfg(test)]
mod test {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;
    use rand_distr::Distribution;

    #[test]
    fn test_diagonal_svd() {
        let mut a = Array2::<f64>::zeros((6, 4));
        for (i, v) in [3.0, 5.0, 1.0, 2.0].iter().enumerate() {
            a[(i, i)] = *v;
        }
        let (_, s, _) = RandSvd::new().run(&a.view(), 2).unwrap();
        assert_abs_diff_eq!(s, array![5.0, 3.0], epsilon = 1e-8);

        // wide input takes the other projection
        let (u, s, v) = RandSvd::new().run(&a.t(), 2).unwrap();
        assert_abs_diff_eq!(s, array![5.0, 3.0], epsilon = 1e-8);
        assert_eq!(u.dim(), (4, 2));
        assert_eq!(v.dim(), (6, 2));
    }

    #[test]
    fn test_low_rank_reconstruction() {
        let mut rng = Pcg64Mcg::seed_from_u64(7);
        let dist = Normal::new(0.0, 1.0).unwrap();
        let left = Array2::from_shape_simple_fn((50, 3), || dist.sample(&mut rng));
        let right = Array2::from_shape_simple_fn((3, 20), || dist.sample(&mut rng));

        for a in [left.dot(&right), right.t().dot(&left.t())] {
            let (u, s, v) = RandSvd::new().run(&a.view(), 3).unwrap();
            assert_eq!(u.dim(), (a.nrows(), 3));
            assert_eq!(v.dim(), (a.ncols(), 3));
            assert!(s[0] >= s[1] && s[1] >= s[2]);

            let rebuilt = (&u * &s).dot(&v.t());
            assert_abs_diff_eq!(rebuilt, a, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_rank_out_of_range() {
        let a = Array2::<f64>::ones((3, 2));
        assert!(RandSvd::new().run(&a.view(), 3).is_err());
        assert!(RandSvd::new().run(&a.view(), 0).is_err());
    }
}
