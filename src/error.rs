use thiserror::Error;

use crate::ber::BerError;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("BER error: {0}")]
    Ber(#[from] BerError),

    #[error("Malformed request: {0}")]
    Decode(String),

    /// A packet arrived with no elements at all, which is what plain LDAP
    /// sees when a TLS client (or something else entirely) connects.
    #[error("Error decoding BER packet: wrong port?")]
    WrongProtocol,

    #[error("Credential verification error: {0}")]
    Credential(String),

    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<deadpool_redis::PoolError> for AppError {
    fn from(err: deadpool_redis::PoolError) -> Self {
        AppError::Pool(format!("Connection pool error: {}", err))
    }
}

impl AppError {
    /// Short label used for metrics and structured logs.
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::Storage(_)
            | AppError::Redis(_)
            | AppError::Pool(_)
            | AppError::Serialization(_) => "storage",
            AppError::Ber(_) | AppError::Decode(_) => "decode",
            AppError::WrongProtocol => "wrong_protocol",
            AppError::Credential(_) => "credential",
            AppError::Schema(_) => "schema",
            AppError::InvalidInput(_) => "invalid_input",
            AppError::Io(_) => "io",
            AppError::Internal(_) => "internal",
        }
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
