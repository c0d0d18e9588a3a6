use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::COOKIE;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::debug;
use url::Url;

use super::{Connector, Socket, SocketMessage};
use crate::config::ClientConfig;
use crate::error::{ListingError, ListingResult};

const ANONYMOUS_HEADER: &str = "x-anonymous";

/// `tokio-tungstenite` backed connector carrying the console session.
#[derive(Debug, Clone, Default)]
pub struct WsConnector {
    session_token: Option<String>,
    anonymous: bool,
}

impl WsConnector {
    pub fn new(session_token: Option<String>, anonymous: bool) -> Self {
        Self {
            session_token,
            anonymous,
        }
    }

    pub fn from_config(config: &ClientConfig) -> Self {
        Self::new(config.session_token.clone(), config.anonymous)
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn open(&self, endpoint: &Url) -> ListingResult<Socket> {
        let mut request = endpoint.as_str().into_client_request()?;
        if let Some(token) = &self.session_token {
            let cookie = HeaderValue::from_str(&format!("token={token}"))
                .map_err(|err| ListingError::Header(err.to_string()))?;
            request.headers_mut().insert(COOKIE, cookie);
        }
        if self.anonymous {
            request.headers_mut().insert(
                HeaderName::from_static(ANONYMOUS_HEADER),
                HeaderValue::from_static("1"),
            );
        }

        let (stream, _) = connect_async(request).await?;
        debug!(target = "listing::transport", endpoint = %endpoint, "websocket handshake complete");

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        tokio::spawn(pump(stream, outbound_rx, inbound_tx));

        Ok(Socket {
            outbound: outbound_tx,
            inbound: inbound_rx,
        })
    }
}

/// Moves frames between the websocket and the socket channels until either
/// side goes away, then reports `Closed`.
async fn pump(
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    mut outbound: mpsc::UnboundedReceiver<String>,
    inbound: mpsc::UnboundedSender<SocketMessage>,
) {
    let (mut sink, mut source) = stream.split();

    loop {
        tokio::select! {
            outgoing = outbound.recv() => match outgoing {
                Some(text) => {
                    if let Err(err) = sink.send(Message::Text(text)).await {
                        let _ = inbound.send(SocketMessage::Error(err.to_string()));
                        break;
                    }
                }
                None => {
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                }
            },
            incoming = source.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    if inbound.send(SocketMessage::Text(text)).is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes) {
                    Ok(text) => {
                        if inbound.send(SocketMessage::Text(text)).is_err() {
                            break;
                        }
                    }
                    Err(err) => {
                        debug!(
                            target = "listing::transport",
                            error = %err,
                            "dropping non-utf8 binary frame"
                        );
                    }
                },
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    let _ = inbound.send(SocketMessage::Error(err.to_string()));
                    break;
                }
            },
        }
    }

    let _ = inbound.send(SocketMessage::Closed);
}
