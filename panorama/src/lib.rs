//! # panorama: batch integration by mutual-nearest-neighbour stitching
//!
//! Cells of all batches are scaled to unit length and jointly reduced with a truncated SVD.
//! Batches are then merged one at a time into a growing panorama: each new batch is matched to
//! the cells already placed through mutual nearest neighbours in the reduced space, and moved
//! by a Gaussian-weighted average of the matched displacement vectors. The same displacement
//! is applied to the reduced embedding and to the normalized expression values.

use ann_types::AnnMatrix;
use anyhow::{bail, Error};
use fxhash::FxHashSet;
use log::{info, warn};
use ndarray::{concatenate, s, Array2, ArrayView2, Axis, Zip};

/// Randomized truncated SVD
pub mod dim_red;

/// Nearest-neighbour search
pub mod nn;

use dim_red::RandSvd;
use nn::mutual_nn;

/// Settings for [`correct`]
#[derive(Clone, Debug)]
pub struct PanoramaParams {
    /// Width of the joint embedding
    pub dimred: usize,
    /// Neighbours searched when matching cells across batches
    pub knn: usize,
    /// Bandwidth of the Gaussian kernel used to smooth correction vectors
    pub sigma: f64,
    /// Minimum matched fraction of a batch needed to correct it
    pub alpha: f64,
    pub seed: u64,
}

impl PanoramaParams {
    pub fn new() -> PanoramaParams {
        PanoramaParams {
            dimred: 100,
            knn: 20,
            sigma: 15.0,
            alpha: 0.10,
            seed: 0,
        }
    }
}

impl Default for PanoramaParams {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-batch output of [`correct`], in input order.
#[derive(Clone, Debug)]
pub struct Panorama {
    pub embeddings: Vec<Array2<f64>>,
    pub corrected: Vec<AnnMatrix>,
}

/// Scale every row to unit Euclidean norm. All-zero rows are left alone.
pub fn l2_normalize_rows(x: &ArrayView2<f64>) -> Array2<f64> {
    let mut out = x.to_owned();
    for mut row in out.rows_mut() {
        let norm = row.dot(&row).sqrt();
        if norm > 0.0 {
            row.mapv_inplace(|v| v / norm);
        }
    }
    out
}

/// Integrate `batches`, returning a joint embedding and batch-corrected expression for each.
pub fn correct(batches: &[AnnMatrix], params: &PanoramaParams) -> Result<Panorama, Error> {
    let Some(first) = batches.first() else {
        bail!("no batches to integrate")
    };
    for (i, b) in batches.iter().enumerate() {
        if b.var_names() != first.var_names() {
            bail!("batch {} does not share the features of batch 0", i);
        }
        if b.n_obs() == 0 {
            bail!("batch {} has no observations", i);
        }
        if b.x.iter().any(|v| !v.is_finite()) {
            bail!("batch {} contains non-finite expression values", i);
        }
    }

    let sizes: Vec<usize> = batches.iter().map(AnnMatrix::n_obs).collect();
    let mut expression: Vec<Array2<f64>> = batches.iter().map(|b| l2_normalize_rows(&b.view())).collect();
    let views: Vec<_> = expression.iter().map(Array2::view).collect();
    let all = concatenate(Axis(0), &views)?;

    let max_rank = all.nrows().min(all.ncols());
    if max_rank == 0 {
        bail!("cannot integrate a matrix with no features");
    }
    let dimred = if params.dimred > max_rank {
        warn!("reducing to {} dimensions instead of {}", max_rank, params.dimred);
        max_rank
    } else {
        params.dimred
    };

    info!("reducing {} cells to {} dimensions", all.nrows(), dimred);
    let svd = RandSvd {
        seed: params.seed,
        ..RandSvd::new()
    };
    let (u, sv, _) = svd.run(&all.view(), dimred)?;
    let reduced = &u * &sv;

    let mut embeddings = Vec::with_capacity(batches.len());
    let mut start = 0;
    for &n in &sizes {
        embeddings.push(reduced.slice(s![start..start + n, ..]).to_owned());
        start += n;
    }

    for j in 1..batches.len() {
        let ref_emb = stack(&embeddings[..j])?;
        let ref_expr = stack(&expression[..j])?;
        let matches = mutual_nn(&embeddings[j].view(), &ref_emb.view(), params.knn)?;

        let query_frac = matched_fraction(matches.iter().map(|m| m.0), sizes[j]);
        let ref_frac = matched_fraction(matches.iter().map(|m| m.1), ref_emb.nrows());
        let score = query_frac.max(ref_frac);
        if matches.is_empty() || score < params.alpha {
            warn!(
                "batch {} aligns to the panorama with score {:.3} < {:.3}, leaving it uncorrected",
                j, score, params.alpha
            );
            continue;
        }
        info!("stitching batch {} with {} matched pairs (score {:.3})", j, matches.len(), score);

        let (emb_shift, expr_shift) = correction_vectors(
            &embeddings[j].view(),
            &ref_emb.view(),
            &expression[j].view(),
            &ref_expr.view(),
            &matches,
            params.sigma,
        );
        embeddings[j] += &emb_shift;
        expression[j] += &expr_shift;
    }

    let corrected = batches
        .iter()
        .zip(expression)
        .map(|(b, x)| b.with_x(x))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Panorama { embeddings, corrected })
}

fn stack(parts: &[Array2<f64>]) -> Result<Array2<f64>, Error> {
    let views: Vec<_> = parts.iter().map(Array2::view).collect();
    Ok(concatenate(Axis(0), &views)?)
}

fn matched_fraction(idx: impl Iterator<Item = usize>, n: usize) -> f64 {
    let distinct: FxHashSet<usize> = idx.collect();
    distinct.len() as f64 / n as f64
}

/// Displacements moving each query cell towards the reference, as a Gaussian-weighted average
/// of `ref - query` over the matched pairs. Weights are computed in the embedding space.
fn correction_vectors(
    query_emb: &ArrayView2<f64>,
    ref_emb: &ArrayView2<f64>,
    query_expr: &ArrayView2<f64>,
    ref_expr: &ArrayView2<f64>,
    matches: &[(usize, usize)],
    sigma: f64,
) -> (Array2<f64>, Array2<f64>) {
    let q_idx: Vec<usize> = matches.iter().map(|m| m.0).collect();
    let r_idx: Vec<usize> = matches.iter().map(|m| m.1).collect();

    let anchors = query_emb.select(Axis(0), &q_idx);
    let emb_bias = &ref_emb.select(Axis(0), &r_idx) - &anchors;
    let expr_bias = &ref_expr.select(Axis(0), &r_idx) - &query_expr.select(Axis(0), &q_idx);

    let gamma = 0.5 * sigma;
    let mut weights = Array2::<f64>::zeros((query_emb.nrows(), matches.len()));
    Zip::from(weights.rows_mut())
        .and(query_emb.rows())
        .par_for_each(|mut w, cell| {
            for (wl, anchor) in w.iter_mut().zip(anchors.rows()) {
                let d = &cell - &anchor;
                *wl = d.dot(&d);
            }
            // shift by the closest anchor so the kernel never underflows to all zeros
            let closest = w.iter().copied().fold(f64::INFINITY, f64::min);
            w.mapv_inplace(|d| (-gamma * (d - closest)).exp());
            let total = w.sum();
            w.mapv_inplace(|v| v / total);
        });

    (weights.dot(&emb_bias), weights.dot(&expr_bias))
}
