use thiserror::Error;

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("recovery already attempted")]
    RecoveryAlreadyAttempted,

    #[error("recovery failed: {0}")]
    Recovery(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("checkpoint encoding error: {0}")]
    Encoding(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, AgentError>;
