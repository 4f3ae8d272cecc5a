use thiserror::Error;

/// Every failure is fatal to a run: nothing in the crate retries or recovers.
#[derive(Debug, Error)]
pub enum Error {
    /// A tensor does not have the shape a layer (or the network) expects.
    #[error("shape error in {context}: expected {expected}, got {got:?}")]
    Shape {
        context: &'static str,
        expected: String,
        got: Vec<usize>,
    },

    /// A dataset partition is missing or malformed.
    #[error("data error: {0}")]
    Data(String),

    /// Training diverged (non-finite loss or statistics).
    #[error("numerical error: {0}")]
    Numerical(String),

    /// API misuse, e.g. backward before forward or an update without gradients.
    #[error("invalid state: {0}")]
    Invalid(&'static str),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub(crate) fn shape(context: &'static str, expected: impl Into<String>, got: &[usize]) -> Self {
        Error::Shape {
            context,
            expected: expected.into(),
            got: got.to_vec(),
        }
    }
}
