//! Annotated matrix types shared by the integration crates

pub mod batch_index;
pub mod frame;
pub mod matrix;

pub use batch_index::BatchIndex;
pub use frame::{Column, Frame};
pub use matrix::AnnMatrix;
