use thiserror::Error;

/// Failures raised while a kernel runs.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum KernelError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("computation cancelled")]
    Cancelled,

    #[error("kernel panicked: {0}")]
    Panicked(String),
}
