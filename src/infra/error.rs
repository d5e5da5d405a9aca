use thiserror::Error;

use crate::cache::TriggerError;

#[derive(Debug, Error)]
pub enum InfraError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("telemetry initialization failed: {0}")]
    Telemetry(String),
    #[error("configuration error: {message}")]
    Configuration { message: String },
    #[error("http client error: {message}")]
    HttpClient { message: String },
}

impl InfraError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn telemetry(message: impl Into<String>) -> Self {
        Self::Telemetry(message.into())
    }

    pub fn http_client(message: impl Into<String>) -> Self {
        Self::HttpClient {
            message: message.into(),
        }
    }
}

impl From<TriggerError> for InfraError {
    fn from(err: TriggerError) -> Self {
        match err {
            TriggerError::InvalidUrl { .. } => Self::configuration(err.to_string()),
            TriggerError::Client(_) => Self::http_client(err.to_string()),
        }
    }
}
