use thiserror::Error;

#[derive(Error, Debug)]
pub enum TickwatchError {
    #[error("WebSocket error: {0}")]
    WebsocketError(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Unsupported currency: {0}")]
    UnsupportedCurrency(String),

    #[error("Notification failed: {0}")]
    NotifyError(String),
}

pub type Result<T> = std::result::Result<T, TickwatchError>;
