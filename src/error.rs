use thiserror::Error;

/// Failures raised by grid construction and the tools.
///
/// Cancellation is reported through [`crate::parallel::Completion`], never here.
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid construction parameter, such as an empty range or a bad voxel size.
    #[error("invalid value: {0}")]
    Value(String),
    /// Operator applied to a grid of the wrong class.
    #[error("wrong grid type: {0}")]
    Type(String),
    /// Structural precondition violated at call time.
    #[error("runtime error: {0}")]
    Runtime(String),
    #[error("failed to encode tree archive: {0}")]
    Encode(#[from] bincode::error::EncodeError),
    #[error("failed to decode tree archive: {0}")]
    Decode(#[from] bincode::error::DecodeError),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    pub(crate) fn value(msg: impl Into<String>) -> Self {
        Self::Value(msg.into())
    }
    pub(crate) fn type_mismatch(msg: impl Into<String>) -> Self {
        Self::Type(msg.into())
    }
    pub(crate) fn runtime(msg: impl Into<String>) -> Self {
        Self::Runtime(msg.into())
    }
}
