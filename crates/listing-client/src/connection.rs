//! Owns the single websocket to the console and its reconnect policy.
//!
//! Every socket gets a generation number; events from an older socket are
//! ignored. Reconnect timers carry an epoch so `disconnect` (or a newer loss)
//! invalidates any timer already in flight.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::error::{ListingError, ListingResult};
use crate::event::{ConnectionEvent, Event};
use crate::transport::{Connector, SocketMessage};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

pub(crate) struct ConnectionManager {
    connector: Arc<dyn Connector>,
    endpoint: Url,
    reconnect_delay: Duration,
    events: mpsc::UnboundedSender<Event>,
    state: ConnectionState,
    outbound: Option<mpsc::UnboundedSender<String>>,
    generation: u64,
    reconnect_epoch: u64,
    stopped: bool,
}

impl ConnectionManager {
    pub(crate) fn new(
        connector: Arc<dyn Connector>,
        endpoint: Url,
        reconnect_delay: Duration,
        events: mpsc::UnboundedSender<Event>,
    ) -> Self {
        Self {
            connector,
            endpoint,
            reconnect_delay,
            events,
            state: ConnectionState::Disconnected,
            outbound: None,
            generation: 0,
            reconnect_epoch: 0,
            stopped: false,
        }
    }

    pub(crate) fn state(&self) -> ConnectionState {
        self.state
    }

    pub(crate) fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    pub(crate) fn is_current(&self, generation: u64) -> bool {
        generation == self.generation
    }

    /// Opens a socket unless one is open or opening. Returns whether an
    /// attempt was started.
    pub(crate) fn connect(&mut self) -> bool {
        if self.state != ConnectionState::Disconnected {
            return false;
        }
        self.stopped = false;
        self.generation += 1;
        self.state = ConnectionState::Connecting;

        let generation = self.generation;
        let connector = Arc::clone(&self.connector);
        let endpoint = self.endpoint.clone();
        let events = self.events.clone();
        info!(target = "listing::connection", %endpoint, generation, "opening websocket");
        tokio::spawn(async move {
            let mut socket = match connector.open(&endpoint).await {
                Ok(socket) => socket,
                Err(err) => {
                    let _ = events.send(Event::Connection(ConnectionEvent::Errored {
                        generation,
                        reason: err.to_string(),
                    }));
                    let _ = events.send(Event::Connection(ConnectionEvent::Closed { generation }));
                    return;
                }
            };
            let opened = ConnectionEvent::Opened {
                generation,
                outbound: socket.outbound,
            };
            if events.send(Event::Connection(opened)).is_err() {
                return;
            }
            while let Some(message) = socket.inbound.recv().await {
                let event = match message {
                    SocketMessage::Text(text) => ConnectionEvent::Frame { generation, text },
                    SocketMessage::Error(reason) => ConnectionEvent::Errored { generation, reason },
                    SocketMessage::Closed => break,
                };
                if events.send(Event::Connection(event)).is_err() {
                    return;
                }
            }
            let _ = events.send(Event::Connection(ConnectionEvent::Closed { generation }));
        });
        true
    }

    pub(crate) fn on_opened(
        &mut self,
        generation: u64,
        outbound: mpsc::UnboundedSender<String>,
    ) -> bool {
        if generation != self.generation || self.state != ConnectionState::Connecting {
            debug!(target = "listing::connection", generation, "dropping stale socket");
            return false;
        }
        self.outbound = Some(outbound);
        self.state = ConnectionState::Connected;
        info!(target = "listing::connection", generation, "websocket connected");
        true
    }

    /// Errors are logged only; the close that follows drives recovery.
    pub(crate) fn on_errored(&self, generation: u64, reason: &str) {
        if generation == self.generation {
            error!(
                target = "listing::connection",
                generation,
                reason,
                "error in websocket connection"
            );
        } else {
            debug!(target = "listing::connection", generation, reason, "error on stale socket");
        }
    }

    /// Handles loss of the current socket. Returns whether a reconnect was
    /// scheduled.
    pub(crate) fn on_closed(&mut self, generation: u64) -> bool {
        if generation != self.generation {
            return false;
        }
        self.outbound = None;
        self.state = ConnectionState::Disconnected;
        if self.stopped {
            return false;
        }
        warn!(
            target = "listing::connection",
            generation,
            delay_ms = self.reconnect_delay.as_millis() as u64,
            "websocket disconnected; attempting reconnection"
        );
        self.schedule_reconnect();
        true
    }

    pub(crate) fn on_reconnect_due(&mut self, epoch: u64) -> bool {
        if self.stopped || epoch != self.reconnect_epoch {
            return false;
        }
        self.connect()
    }

    /// Closes the socket and cancels any pending reconnect.
    pub(crate) fn disconnect(&mut self) {
        self.stopped = true;
        self.reconnect_epoch += 1;
        self.generation += 1;
        if self.outbound.take().is_some() {
            info!(target = "listing::connection", "closing websocket");
        }
        self.state = ConnectionState::Disconnected;
    }

    pub(crate) fn send(&self, text: String) -> ListingResult<()> {
        match (&self.state, &self.outbound) {
            (ConnectionState::Connected, Some(outbound)) => {
                outbound.send(text).map_err(|_| ListingError::NotConnected)
            }
            _ => Err(ListingError::NotConnected),
        }
    }

    fn schedule_reconnect(&mut self) {
        self.reconnect_epoch += 1;
        let epoch = self.reconnect_epoch;
        let delay = self.reconnect_delay;
        let events = self.events.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = events.send(Event::ReconnectDue { epoch });
        });
    }
}
