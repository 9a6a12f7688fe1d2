use crate::error::IntegrationError;
use ann_types::{AnnMatrix, Column, Frame};
use log::info;

/// Fail with [`IntegrationError::NotAnnotatedMatrix`] unless `adata` is well formed.
pub fn check_adata(adata: &AnnMatrix) -> Result<(), IntegrationError> {
    adata
        .validate()
        .map_err(|e| IntegrationError::NotAnnotatedMatrix(e.to_string()))
}

/// Fail with [`IntegrationError::MissingColumn`] unless `batch` is a column of `obs`, and with
/// [`IntegrationError::UnlabeledRows`] if any of its values is missing.
/// Reports and returns the number of distinct batches.
pub fn check_batch(batch: &str, obs: &Frame) -> Result<usize, IntegrationError> {
    let column = labeled_column(batch, obs)?;
    let n_batch = column.levels().len();
    info!("Object contains {} batches.", n_batch);
    Ok(n_batch)
}

pub(crate) fn labeled_column<'a>(batch: &str, obs: &'a Frame) -> Result<&'a Column, IntegrationError> {
    let column = obs.get(batch).ok_or_else(|| IntegrationError::MissingColumn {
        column: batch.to_string(),
    })?;
    match column.n_missing() {
        0 => Ok(column),
        rows => Err(IntegrationError::UnlabeledRows {
            column: batch.to_string(),
            rows,
        }),
    }
}
