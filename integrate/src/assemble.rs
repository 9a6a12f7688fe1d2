use ann_types::AnnMatrix;
use anyhow::{format_err, Error};
use ndarray::{concatenate, Array2, Axis};

/// Stack per-batch embeddings row-wise, in the given order.
pub fn concat_embeddings(parts: &[Array2<f64>]) -> Result<Array2<f64>, Error> {
    if parts.is_empty() {
        return Err(format_err!("no embeddings to concatenate"));
    }
    let views: Vec<_> = parts.iter().map(Array2::view).collect();
    Ok(concatenate(Axis(0), &views)?)
}

/// Concatenate per-batch matrices: the first one, followed by the rest in order.
pub fn concat_matrices(parts: &[AnnMatrix]) -> Result<AnnMatrix, Error> {
    let (first, rest) = parts
        .split_first()
        .ok_or_else(|| format_err!("no matrices to concatenate"))?;
    first.concatenate(rest)
}
