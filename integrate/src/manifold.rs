use crate::assemble::{concat_embeddings, concat_matrices};
use crate::split::split_batches;
use crate::validate::{check_adata, check_batch};
use ann_types::AnnMatrix;
use anyhow::{bail, Error};
use log::info;
use ndarray::Array2;

/// Per-batch output of a manifold-alignment engine, in the order the batches were given.
#[derive(Clone, Debug)]
pub struct Alignment {
    /// Low-dimensional embedding of each batch
    pub embeddings: Vec<Array2<f64>>,
    /// Batch-corrected expression of each batch
    pub corrected: Vec<AnnMatrix>,
}

/// A batch-correction engine that aligns an ordered list of batches in one call.
pub trait ManifoldAligner {
    /// Align `batches`, returning one embedding and one corrected matrix per batch.
    fn align(&self, batches: &[AnnMatrix]) -> Result<Alignment, Error>;
}

#[cfg(feature = "panorama")]
impl ManifoldAligner for panorama::PanoramaParams {
    fn align(&self, batches: &[AnnMatrix]) -> Result<Alignment, Error> {
        let panorama::Panorama { embeddings, corrected } = panorama::correct(batches, self)?;
        Ok(Alignment { embeddings, corrected })
    }
}

/// Integrate the batches of `adata` labelled by obs column `batch` with the default
/// mutual-nearest-neighbour engine. Returns the joint embedding and the corrected matrix,
/// both ordered batch by batch in first-appearance order.
#[cfg(feature = "panorama")]
pub fn run_manifold_alignment(adata: &AnnMatrix, batch: &str) -> Result<(Array2<f64>, AnnMatrix), Error> {
    run_manifold_alignment_with(&panorama::PanoramaParams::new(), adata, batch)
}

/// Integrate the batches of `adata` labelled by obs column `batch` with the default
/// mutual-nearest-neighbour engine. This build has no engine, so valid inputs fail with
/// [`IntegrationError::BackendUnavailable`](crate::IntegrationError::BackendUnavailable).
#[cfg(not(feature = "panorama"))]
pub fn run_manifold_alignment(adata: &AnnMatrix, batch: &str) -> Result<(Array2<f64>, AnnMatrix), Error> {
    check_adata(adata)?;
    check_batch(batch, &adata.obs)?;
    Err(crate::IntegrationError::BackendUnavailable("panorama").into())
}

/// [`run_manifold_alignment`] with an explicit engine. `adata` is only read.
pub fn run_manifold_alignment_with<A>(
    aligner: &A,
    adata: &AnnMatrix,
    batch: &str,
) -> Result<(Array2<f64>, AnnMatrix), Error>
where
    A: ManifoldAligner + ?Sized,
{
    check_adata(adata)?;
    check_batch(batch, &adata.obs)?;
    let split = split_batches(adata, batch)?;

    let Alignment { embeddings, corrected } = aligner.align(&split)?;
    if embeddings.len() != split.len() || corrected.len() != split.len() {
        bail!(
            "engine returned {} embeddings and {} matrices for {} batches",
            embeddings.len(),
            corrected.len(),
            split.len()
        );
    }

    let corrected = concat_matrices(&corrected)?;
    let embedding = concat_embeddings(&embeddings)?;
    info!(
        "integrated {} batches into a {} x {} embedding",
        split.len(),
        embedding.nrows(),
        embedding.ncols()
    );
    Ok((embedding, corrected))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::IntegrationError;
    use ann_types::Column;
    use anyhow::format_err;
    use std::cell::Cell;

    /// Records calls and hands back each batch's own rows, first column as the embedding
    struct Recorder {
        calls: Cell<usize>,
        fail: bool,
    }

    impl Recorder {
        fn new() -> Recorder {
            Recorder {
                calls: Cell::new(0),
                fail: false,
            }
        }
    }

    impl ManifoldAligner for Recorder {
        fn align(&self, batches: &[AnnMatrix]) -> Result<Alignment, Error> {
            self.calls.set(self.calls.get() + 1);
            if self.fail {
                return Err(format_err!("engine exploded"));
            }
            Ok(Alignment {
                embeddings: batches.iter().map(|b| b.x.slice(ndarray::s![.., 0..1]).to_owned()).collect(),
                corrected: batches.to_vec(),
            })
        }
    }

    fn two_batches() -> AnnMatrix {
        let x = Array2::from_shape_fn((6, 4), |(i, j)| (10 * i + j) as f64);
        let mut m = AnnMatrix::from_array(x);
        m.obs
            .insert(
                "method",
                Column::Str(["s1", "s2", "s1", "s2", "s2", "s1"].map(String::from).to_vec()),
            )
            .unwrap();
        m
    }

    #[test]
    fn test_row_counts_and_order() {
        let adata = two_batches();
        let engine = Recorder::new();
        let (emb, corrected) = run_manifold_alignment_with(&engine, &adata, "method").unwrap();
        assert_eq!(engine.calls.get(), 1);
        assert_eq!(emb.nrows(), adata.n_obs());
        assert_eq!(corrected.n_obs(), adata.n_obs());
        assert_eq!(emb.column(0).to_vec(), vec![0.0, 20.0, 50.0, 10.0, 30.0, 40.0]);
        assert_eq!(
            corrected.obs.get("method").unwrap().levels(),
            vec!["s1".to_string(), "s2".to_string()]
        );
    }

    #[test]
    fn test_missing_batch_before_engine() {
        let engine = Recorder::new();
        let err = run_manifold_alignment_with(&engine, &two_batches(), "batch").unwrap_err();
        assert_eq!(
            err.downcast_ref::<IntegrationError>(),
            Some(&IntegrationError::MissingColumn {
                column: "batch".to_string()
            })
        );
        assert_eq!(engine.calls.get(), 0);
    }

    #[test]
    fn test_unlabeled_rows_before_engine() {
        let engine = Recorder::new();
        let mut adata = two_batches();
        adata
            .obs
            .insert("lane", Column::Float(vec![1.0, 2.0, f64::NAN, 1.0, 2.0, 1.0]))
            .unwrap();
        let err = run_manifold_alignment_with(&engine, &adata, "lane").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<IntegrationError>(),
            Some(IntegrationError::UnlabeledRows { rows: 1, .. })
        ));
        assert_eq!(engine.calls.get(), 0);
    }

    #[test]
    fn test_invalid_matrix_before_engine() {
        let engine = Recorder::new();
        let mut adata = two_batches();
        adata.var.index.push("extra".to_string());
        let err = run_manifold_alignment_with(&engine, &adata, "method").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<IntegrationError>(),
            Some(IntegrationError::NotAnnotatedMatrix(_))
        ));
        assert_eq!(engine.calls.get(), 0);
    }

    #[test]
    fn test_engine_error_propagates() {
        let engine = Recorder {
            fail: true,
            ..Recorder::new()
        };
        let err = run_manifold_alignment_with(&engine, &two_batches(), "method").unwrap_err();
        assert_eq!(err.to_string(), "engine exploded");
        assert_eq!(engine.calls.get(), 1);
    }

    #[test]
    fn test_caller_matrix_untouched() {
        let adata = two_batches();
        let before = adata.clone();
        run_manifold_alignment_with(&Recorder::new(), &adata, "method").unwrap();
        assert_eq!(adata, before);
    }

    #[cfg(feature = "panorama")]
    #[test]
    fn test_default_engine_two_batches() {
        use rand::SeedableRng;
        use rand_distr::{Distribution, Normal};
        use rand_pcg::Pcg64Mcg;

        let mut rng = Pcg64Mcg::seed_from_u64(11);
        let noise = Normal::new(0.0, 0.2).unwrap();
        let x = Array2::from_shape_fn((40, 8), |(i, j)| {
            let marker = if j % 2 == i % 2 { 3.0 } else { 0.5 };
            let shift = if i < 20 { 0.0 } else { 0.4 };
            marker + shift + noise.sample(&mut rng)
        });
        let mut adata = AnnMatrix::from_array(x);
        let labels = (0..40).map(|i| if i < 20 { "a" } else { "b" }.to_string()).collect();
        adata.obs.insert("method", Column::Str(labels)).unwrap();

        let (emb, corrected) = run_manifold_alignment(&adata, "method").unwrap();
        assert_eq!(emb.dim(), (40, 8));
        assert_eq!(corrected.shape(), (40, 8));
    }

    #[cfg(feature = "panorama")]
    #[test]
    fn test_default_engine_nan_is_an_error() {
        let mut adata = two_batches();
        adata.x[(2, 1)] = f64::NAN;
        let err = run_manifold_alignment(&adata, "method").unwrap_err();
        assert!(err.downcast_ref::<IntegrationError>().is_none());
        assert!(err.to_string().contains("non-finite"));
    }
}
