//! # integrate: single-cell batch integration wrappers
//!
//! Validates an annotated matrix, splits it by a batch label, hands the batches to a
//! correction engine and stitches the results back together. Two engines are wired in:
//! mutual-nearest-neighbour manifold alignment (`panorama` feature) and latent-space
//! arithmetic on a trained autoencoder (`latent` feature).

/// Annotated matrix types
pub use ann_types;

/// Reassembly of per-batch results
pub mod assemble;

/// Error conditions raised by the wrappers
pub mod error;

/// Generative-model correction
pub mod generative;

/// anndata `.h5ad` input
#[cfg(feature = "h5ad")]
pub mod h5ad;

/// Dataset loading
pub mod io;

/// Manifold-alignment correction
pub mod manifold;

/// Batch splitting
pub mod split;

/// Input checks
pub mod validate;

pub use error::IntegrationError;
pub use generative::{
    canonicalize_obs, run_generative_correction, run_generative_correction_with, GenerativeBackend,
    GenerativeModel, GenerativeRun,
};
pub use manifold::{run_manifold_alignment, run_manifold_alignment_with, Alignment, ManifoldAligner};
pub use split::split_batches;
pub use validate::{check_adata, check_batch};
