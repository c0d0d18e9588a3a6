use listing_proto::ProtoError;
use thiserror::Error;
use tokio_tungstenite::tungstenite;

#[derive(Debug, Error)]
pub enum ListingError {
    #[error("websocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),
    #[error("invalid endpoint: {0}")]
    Url(#[from] url::ParseError),
    #[error("unsupported console scheme '{0}'")]
    UnsupportedScheme(String),
    #[error("invalid handshake header: {0}")]
    Header(String),
    #[error(transparent)]
    Proto(#[from] ProtoError),
    #[error("connection is not open")]
    NotConnected,
    #[error("connection unavailable: {0}")]
    Unavailable(String),
    #[error("listing engine has stopped")]
    EngineStopped,
    #[error("timed out waiting for listing state")]
    Timeout,
}

pub type ListingResult<T> = Result<T, ListingError>;
