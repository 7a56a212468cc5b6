use thiserror::Error;

#[derive(Debug, Error)]
pub enum FetcherError {
    #[error("authentication rejected by provider: {0}")]
    Auth(String),

    #[error("provider rejected the request: {0}")]
    InvalidRequest(String),

    #[error("provider unavailable after {attempts} attempts: {message}")]
    Transient { attempts: u32, message: String },

    #[error("failed to decode provider response: {0}")]
    Decode(String),

    #[error("invalid parameter: {0}")]
    InvalidParam(String),
}

pub type Result<T> = std::result::Result<T, FetcherError>;
