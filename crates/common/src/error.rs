use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Gateway error: {0}")]
    Gateway(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid parameter '{name}': {reason}")]
    InvalidParameter { name: String, reason: String },

    #[error("Order rejected: {reason}")]
    OrderRejected { reason: String },

    #[error("Evaluation error: {0}")]
    Evaluation(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn invalid_parameter(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::InvalidParameter {
            name: name.into(),
            reason: reason.into(),
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
