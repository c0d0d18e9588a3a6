//! In-process connector for tests: every successful `open` hands the test a
//! [`MockPeer`] playing the console side of the socket.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use listing_proto::{decode_request, encode_frame, ListRequest, ResponseFrame};
use tokio::sync::mpsc;
use url::Url;

use super::{Connector, Socket, SocketMessage};
use crate::error::{ListingError, ListingResult};

pub struct MockConnector {
    peers: mpsc::UnboundedSender<MockPeer>,
    opens: AtomicUsize,
    refuse: AtomicUsize,
}

impl MockConnector {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<MockPeer>) {
        let (peers, peer_rx) = mpsc::unbounded_channel();
        let connector = Arc::new(Self {
            peers,
            opens: AtomicUsize::new(0),
            refuse: AtomicUsize::new(0),
        });
        (connector, peer_rx)
    }

    /// Number of `open` calls so far, refused ones included.
    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    /// Make the next `count` opens fail.
    pub fn refuse_next(&self, count: usize) {
        self.refuse.store(count, Ordering::SeqCst);
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn open(&self, _endpoint: &Url) -> ListingResult<Socket> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        let refused = self
            .refuse
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return Err(ListingError::Unavailable("connection refused".into()));
        }

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        self.peers
            .send(MockPeer {
                received: outbound_rx,
                events: inbound_tx,
            })
            .map_err(|_| ListingError::Unavailable("mock peer receiver dropped".into()))?;
        Ok(Socket {
            outbound: outbound_tx,
            inbound: inbound_rx,
        })
    }
}

pub struct MockPeer {
    pub received: mpsc::UnboundedReceiver<String>,
    pub events: mpsc::UnboundedSender<SocketMessage>,
}

impl MockPeer {
    /// Next request written by the client, or `None` once it hung up.
    pub async fn next_request(&mut self) -> Option<ListRequest> {
        let text = self.received.recv().await?;
        decode_request(&text).ok()
    }

    /// A request already written by the client, without waiting.
    pub fn try_request(&mut self) -> Option<ListRequest> {
        let text = self.received.try_recv().ok()?;
        decode_request(&text).ok()
    }

    pub fn send_frame(&self, frame: &ResponseFrame) {
        if let Ok(text) = encode_frame(frame) {
            let _ = self.events.send(SocketMessage::Text(text));
        }
    }

    pub fn send_raw(&self, text: &str) {
        let _ = self.events.send(SocketMessage::Text(text.to_string()));
    }

    pub fn fail(&self, reason: &str) {
        let _ = self.events.send(SocketMessage::Error(reason.to_string()));
    }

    pub fn close(&self) {
        let _ = self.events.send(SocketMessage::Closed);
    }
}
