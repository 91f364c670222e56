use std::path::PathBuf;

/// Errors returned by the training run and the weight export.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Reading or writing a file failed.
    #[error("I/O error on '{path}': {source}")]
    Io {
        /// The file being accessed.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },
    /// Tensor data could not be read back as host values.
    #[error("Unable to read tensor data: {0}")]
    TensorData(String),
    /// The scale factor used for binarization is not a positive finite number.
    #[error("Scale factor H must be positive and finite, got {0}")]
    InvalidScale(f64),
    /// Loading or saving the training configuration failed.
    #[error("Configuration error: {0}")]
    Config(String),
    /// Loading or saving the model record failed.
    #[error("Model record error: {0}")]
    Record(String),
    /// The learning rate schedule could not be built.
    #[error("Invalid learning rate schedule: {0}")]
    Schedule(String),
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Result alias used across the crate.
pub type Result<T> = core::result::Result<T, Error>;
