use crate::model::LatentArith;
use ann_types::{AnnMatrix, BatchIndex};
use anyhow::{format_err, Error};
use log::{debug, info};
use ndarray::{Array1, Array2, Axis};

fn mean_of(latent: &Array2<f64>, rows: &[usize]) -> Result<Array1<f64>, Error> {
    latent
        .select(Axis(0), rows)
        .mean_axis(Axis(0))
        .ok_or_else(|| format_err!("cannot average an empty group"))
}

/// Remove batch effects from `adata` with a trained model.
///
/// Cells are encoded, and within every cell type found in two or more batches, each batch's
/// latent codes are shifted so their mean matches the mean of the largest batch of that cell
/// type. The shifted codes are decoded back to feature space. Cell types seen in a single
/// batch, and cells with a missing label, are only passed through the model. Row order and
/// metadata are preserved.
pub fn batch_removal(
    model: &LatentArith,
    adata: &AnnMatrix,
    batch_key: &str,
    cell_type_key: &str,
) -> Result<AnnMatrix, Error> {
    let batches = adata
        .obs
        .get(batch_key)
        .ok_or_else(|| format_err!("obs has no '{}' column", batch_key))?;
    let cell_types = adata
        .obs
        .get(cell_type_key)
        .ok_or_else(|| format_err!("obs has no '{}' column", cell_type_key))?;

    let mut latent = model.encode(&adata.view())?;
    let by_type = BatchIndex::from_column(cell_types);
    let mut shifted = 0;

    for (cell_type, rows) in by_type.iter() {
        let groups = BatchIndex::from_column(&batches.select(rows));
        if groups.len() < 2 {
            debug!("cell type {} occurs in a single batch, not shifting", cell_type);
            continue;
        }

        let global = |g: usize| -> Vec<usize> { groups.group(g).iter().map(|&i| rows[i]).collect() };
        let mut largest = 0;
        for g in 1..groups.len() {
            if groups.group(g).len() > groups.group(largest).len() {
                largest = g;
            }
        }
        let target = mean_of(&latent, &global(largest))?;

        for g in (0..groups.len()).filter(|&g| g != largest) {
            let members = global(g);
            let delta = &target - &mean_of(&latent, &members)?;
            for &r in &members {
                let mut row = latent.row_mut(r);
                row += &delta;
            }
            shifted += members.len();
        }
    }
    info!("shifted {} of {} cells in latent space", shifted, adata.n_obs());

    let corrected = model.decode(&latent.view())?;
    adata.with_x(corrected)
}
