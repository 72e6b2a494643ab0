use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Verification timed out: {0}")]
    VerificationTimeout(String),

    #[error("Missing secret: {0}")]
    MissingSecret(String),

    #[error("Invalid comparator: {0}")]
    InvalidComparator(String),

    #[error("Invalid date: {0}")]
    InvalidDate(String),

    #[error("Invalid variable kind: {0}")]
    InvalidVariableKind(String),

    #[error("Transport failure: {0}")]
    TransportFailure(String),

    #[error("Window not found: {0}")]
    WindowNotFound(String),

    #[error("Input lock acquisition timed out: {0}")]
    AcquisitionTimeout(String),

    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    #[error("Invalid command: {0}")]
    InvalidCommand(String),

    #[error("Unknown operation: {0}")]
    UnknownOperation(String),

    #[error("Invalid catalog: {0}")]
    InvalidCatalog(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Platform-specific error: {0}")]
    Platform(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl EngineError {
    /// Only verification timeouts are recovered locally (relaunch and restart).
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::VerificationTimeout(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, EngineError::Cancelled(_))
    }
}
