use murmur_protocol::ApiFailure;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Request failed with status {status}: {body}")]
    Http { status: u16, body: String },

    #[error("Server error: {message}")]
    Api { message: String, code: Option<i32> },

    #[error("Invalid access key")]
    InvalidAccessKey,

    #[error("Malformed response: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Not authenticated")]
    NotAuthenticated,

    #[error("No chat is open")]
    NoActiveChat,

    #[error("Send queue closed")]
    QueueClosed,

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<ApiFailure> for ClientError {
    fn from(failure: ApiFailure) -> Self {
        if failure.is_invalid_access_key() {
            ClientError::InvalidAccessKey
        } else {
            ClientError::Api {
                message: failure.error,
                code: failure.error_code,
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;
