use std::time::Duration;

use thiserror::Error;

/// Every way a submitted job can fail to produce an output.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DispatchError {
    /// The execution context died while the request was outstanding.
    #[error("execution context fault: {0}")]
    ContextFault(String),

    #[error("request timed out after {}ms", .0.as_millis())]
    RequestTimeout(Duration),

    #[error("malformed response: {0}")]
    MalformedResponse(String),

    /// The kernel itself failed (bad input, cancellation or panic).
    #[error("computation failed: {message}")]
    ComputationError {
        message: String,
        trace: Option<String>,
    },

    #[error("execution context unavailable: {0}")]
    ContextUnavailable(String),

    #[error("failed to encode request: {0}")]
    Encode(String),
}

impl DispatchError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, DispatchError::RequestTimeout(_))
    }
}
