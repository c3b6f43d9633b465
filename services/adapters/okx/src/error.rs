use thiserror::Error;

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("exchange rejected request: code {code}, {message}")]
    Exchange { code: String, message: String },

    #[error("malformed payload: {0}")]
    Parse(String),
}

pub type Result<T> = std::result::Result<T, AdapterError>;
