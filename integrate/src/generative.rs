use crate::error::IntegrationError;
use crate::validate::{check_adata, check_batch};
use ann_types::{AnnMatrix, Frame};
use anyhow::Error;
use log::info;
use std::path::{Path, PathBuf};

/// obs column holding the cell type seen by the generative engine
pub const CELL_TYPE_KEY: &str = "cell_type";
/// obs column holding the batch seen by the generative engine
pub const BATCH_KEY: &str = "batch";

/// A trained-in-place generative model. Dropping it releases whatever session it holds.
pub trait GenerativeModel {
    /// Fit the model to `adata` for `n_epochs` epochs.
    fn train(&mut self, adata: &AnnMatrix, n_epochs: usize) -> Result<(), Error>;

    /// Batch-corrected copy of `adata`. Reads the canonical `cell_type` and `batch` columns.
    fn batch_removal(&self, adata: &AnnMatrix) -> Result<AnnMatrix, Error>;
}

/// Builds [`GenerativeModel`]s.
pub trait GenerativeBackend {
    /// Model type produced by this backend
    type Model: GenerativeModel;

    /// Untrained model over `x_dimension` features, persisting to `model_path`.
    fn build(&self, x_dimension: usize, model_path: &Path) -> Result<Self::Model, Error>;
}

/// Arguments of a generative correction run
#[derive(Clone, Debug)]
pub struct GenerativeRun {
    /// obs column copied into `cell_type` when that column is absent
    pub cell_type: String,
    /// obs column copied into `batch` when that column is absent
    pub batch: String,
    /// directory of the model artifact
    pub model_path: PathBuf,
    /// training epochs
    pub epochs: usize,
}

impl GenerativeRun {
    /// Defaults: `louvain` cell types, `method` batches, `./models/batch`, 100 epochs
    pub fn new() -> GenerativeRun {
        GenerativeRun {
            cell_type: "louvain".to_string(),
            batch: "method".to_string(),
            model_path: PathBuf::from("./models/batch"),
            epochs: 100,
        }
    }
}

impl Default for GenerativeRun {
    fn default() -> Self {
        Self::new()
    }
}

/// Add the canonical `cell_type` and `batch` columns to `obs`, copying them from `cell_type`
/// and `batch` where they are absent. Existing canonical columns are left alone.
pub fn canonicalize_obs(obs: &mut Frame, cell_type: &str, batch: &str) -> Result<(), Error> {
    for (canonical, source) in [(CELL_TYPE_KEY, cell_type), (BATCH_KEY, batch)] {
        if obs.contains(canonical) {
            continue;
        }
        let column = obs
            .get(source)
            .ok_or_else(|| IntegrationError::MissingColumn {
                column: source.to_string(),
            })?
            .clone();
        obs.insert(canonical, column)?;
    }
    Ok(())
}

/// Correct `adata` with the default latent-arithmetic engine.
#[cfg(feature = "latent")]
pub fn run_generative_correction(adata: &AnnMatrix, run: &GenerativeRun) -> Result<AnnMatrix, Error> {
    run_generative_correction_with(&latent_backend::LatentBackend::default(), adata, run)
}

/// Correct `adata` with the default latent-arithmetic engine. This build has no engine, so
/// valid inputs fail with [`IntegrationError::BackendUnavailable`].
#[cfg(not(feature = "latent"))]
pub fn run_generative_correction(adata: &AnnMatrix, run: &GenerativeRun) -> Result<AnnMatrix, Error> {
    check_adata(adata)?;
    let mut prepared = adata.clone();
    canonicalize_obs(&mut prepared.obs, &run.cell_type, &run.batch)?;
    check_batch(BATCH_KEY, &prepared.obs)?;
    Err(IntegrationError::BackendUnavailable("latent").into())
}

/// Train a model from `backend` on `adata` and return the batch-corrected matrix.
///
/// `adata` is not modified: the canonical columns are added to a private copy and show up in
/// the returned matrix's obs. The model, and with it any session it holds, is dropped before
/// returning, whether training succeeded or not.
pub fn run_generative_correction_with<B: GenerativeBackend>(
    backend: &B,
    adata: &AnnMatrix,
    run: &GenerativeRun,
) -> Result<AnnMatrix, Error> {
    check_adata(adata)?;
    let mut prepared = adata.clone();
    canonicalize_obs(&mut prepared.obs, &run.cell_type, &run.batch)?;
    check_batch(BATCH_KEY, &prepared.obs)?;

    let mut model = backend.build(prepared.n_vars(), &run.model_path)?;
    model.train(&prepared, run.epochs)?;
    let corrected = model.batch_removal(&prepared)?;
    info!("corrected {} cells with the generative model", corrected.n_obs());
    Ok(corrected)
}

#[cfg(feature = "latent")]
mod latent_backend {
    use super::{GenerativeBackend, GenerativeModel, BATCH_KEY, CELL_TYPE_KEY};
    use ann_types::AnnMatrix;
    use anyhow::Error;
    use latent_arith::{LatentArith, LatentParams};
    use std::path::Path;

    #[derive(Default)]
    pub(super) struct LatentBackend {
        params: LatentParams,
    }

    impl GenerativeBackend for LatentBackend {
        type Model = LatentArith;

        fn build(&self, x_dimension: usize, model_path: &Path) -> Result<LatentArith, Error> {
            LatentArith::with_params(x_dimension, model_path, self.params.clone())
        }
    }

    impl GenerativeModel for LatentArith {
        fn train(&mut self, adata: &AnnMatrix, n_epochs: usize) -> Result<(), Error> {
            LatentArith::train(self, &adata.view(), n_epochs)?;
            Ok(())
        }

        fn batch_removal(&self, adata: &AnnMatrix) -> Result<AnnMatrix, Error> {
            latent_arith::batch_removal(self, adata, BATCH_KEY, CELL_TYPE_KEY)
        }
    }
}
