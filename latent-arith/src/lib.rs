//! # latent-arith: batch removal by latent-space arithmetic
//!
//! A linear autoencoder is trained on all cells. Batch effects are removed by shifting the
//! latent codes of each batch, per cell type, onto those of the best-represented batch and
//! decoding the result.

/// Training progress and cancellation
pub mod monitor;

/// Autoencoder model, training and persistence
pub mod model;

/// Latent-space batch removal
pub mod removal;

/// Exclusive hold on a model directory
pub mod session;

pub use model::{LatentArith, LatentParams, MODEL_FILE};
pub use removal::batch_removal;
pub use session::{Session, LOCK_FILE};
