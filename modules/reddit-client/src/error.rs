use thiserror::Error;

pub type Result<T> = std::result::Result<T, RedditError>;

#[derive(Debug, Error)]
pub enum RedditError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    /// Reddit accepted the request but refused it, e.g. `USER_DOESNT_EXIST`.
    #[error("Rejected ({code}): {message}")]
    Rejected { code: String, message: String },

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Parse error: {0}")]
    Parse(String),
}

impl RedditError {
    /// Machine-readable reason code, when Reddit supplied one.
    pub fn code(&self) -> Option<&str> {
        match self {
            RedditError::Rejected { code, .. } => Some(code),
            RedditError::Api { status: 429, .. } => Some("RATELIMIT"),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for RedditError {
    fn from(err: reqwest::Error) -> Self {
        RedditError::Network(err.to_string())
    }
}

impl From<serde_json::Error> for RedditError {
    fn from(err: serde_json::Error) -> Self {
        RedditError::Parse(err.to_string())
    }
}
