use async_trait::async_trait;
use tokio::sync::mpsc;
use url::Url;

use crate::error::ListingResult;

pub mod mock;
pub mod websocket;

pub use websocket::WsConnector;

/// What the peer side of a socket reports back to the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketMessage {
    Text(String),
    Error(String),
    Closed,
}

/// An open duplex socket: text frames out, socket messages in.
/// Dropping `outbound` closes the socket once queued frames are flushed.
pub struct Socket {
    pub outbound: mpsc::UnboundedSender<String>,
    pub inbound: mpsc::UnboundedReceiver<SocketMessage>,
}

/// Opens sockets to the listing endpoint.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn open(&self, endpoint: &Url) -> ListingResult<Socket>;
}
