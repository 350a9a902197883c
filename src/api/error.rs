#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApiError {
    #[error("config error: {0}")]
    Config(String),
    #[error("request failed: {0}")]
    Request(String),
    #[error("request timeout: {0}")]
    Timeout(String),
    #[error("server returned status {status}: {message}")]
    Status { status: u16, message: String },
    #[error("server rejected the mutation: {0}")]
    Rejected(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl ApiError {
    /// Transport-level failures and server errors are worth another attempt;
    /// client errors and rejections are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Request(_) | Self::Timeout(_) => true,
            Self::Status { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(value: reqwest::Error) -> Self {
        if value.is_timeout() {
            return Self::Timeout(value.to_string());
        }
        if value.is_decode() {
            return Self::InvalidResponse(value.to_string());
        }
        Self::Request(value.to_string())
    }
}
