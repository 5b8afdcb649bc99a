/// Error taxonomy shared by the router, registry, and orchestrator. Mirrors
/// the coded strings carried by `ERROR` wire frames so that any layer can be
/// converted directly into one without re-deriving the code.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("not registered")]
    NotRegistered,

    #[error("duplicate submission")]
    Duplicate,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("processing error: {0}")]
    Processing(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    pub fn code(&self) -> &'static str {
        match self {
            GatewayError::NotRegistered => "not_registered",
            GatewayError::Duplicate => "duplicate",
            GatewayError::NotFound(_) => "not_found",
            GatewayError::Processing(_) => "processing_error",
            GatewayError::Internal(_) => "internal_error",
        }
    }

    /// Whether the originating adapter may usefully retry.
    pub fn recoverable(&self) -> bool {
        !matches!(self, GatewayError::Internal(_))
    }
}

pub type GatewayResult<T> = Result<T, GatewayError>;
