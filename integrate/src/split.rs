use crate::error::IntegrationError;
use crate::validate::labeled_column;
use ann_types::{AnnMatrix, BatchIndex};

/// Row groups of `adata` by the values of `batch`, in first-appearance order.
/// Every row must carry a label, so the groups cover all rows.
pub fn batch_index(adata: &AnnMatrix, batch: &str) -> Result<BatchIndex, IntegrationError> {
    let column = labeled_column(batch, &adata.obs)?;
    Ok(BatchIndex::from_column(column))
}

/// One sub-matrix per distinct value of `batch`, in the order the values first appear.
/// Each keeps its rows in their original relative order, with all features and metadata.
pub fn split_batches(adata: &AnnMatrix, batch: &str) -> Result<Vec<AnnMatrix>, IntegrationError> {
    let index = batch_index(adata, batch)?;
    Ok(index.iter().map(|(_, rows)| adata.select_obs(rows)).collect())
}
