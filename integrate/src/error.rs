use thiserror::Error;

/// Conditions raised by the integration wrappers themselves. Failures of the correction engines
/// are passed through untouched as `anyhow::Error`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IntegrationError {
    /// The input does not satisfy the annotated-matrix invariants
    #[error("Input is not a valid annotated matrix: {0}")]
    NotAnnotatedMatrix(String),

    /// A required metadata column is absent from obs
    #[error("Selected batch column '{column}' is not in obs")]
    MissingColumn {
        /// name that was looked up
        column: String,
    },

    /// Some rows carry no value in the batch column
    #[error("Batch column '{column}' has {rows} rows without a label")]
    UnlabeledRows { column: String, rows: usize },

    /// The engine was not compiled in
    #[error("integration backend '{0}' is not available, rebuild with the `{0}` feature")]
    BackendUnavailable(&'static str),
}
