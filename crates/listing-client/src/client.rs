use std::sync::Arc;

use listing_proto::{PermissionResource, RequestId};
use time::OffsetDateTime;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::config::ClientConfig;
use crate::connection::{ConnectionManager, ConnectionState};
use crate::dispatcher::{Collaborators, ResponseDispatcher};
use crate::error::{ListingError, ListingResult};
use crate::event::{Command, ConnectionEvent, Event};
use crate::multiplexer::{RequestIdHandle, RequestMultiplexer};
use crate::orchestrator::PathLoader;
use crate::state::{RewindSettings, Route, StateHandle};
use crate::transport::Connector;

/// Handle to a running listing engine. Commands are queued and applied in
/// order by a single background task; state is read through [`StateHandle`].
pub struct ListingClient {
    events: mpsc::UnboundedSender<Event>,
    state: StateHandle,
    ids: RequestIdHandle,
    task: Option<JoinHandle<()>>,
}

impl ListingClient {
    pub fn spawn(
        config: &ClientConfig,
        connector: Arc<dyn Connector>,
        collaborators: Collaborators,
    ) -> ListingResult<Self> {
        let endpoint = config.endpoint()?;
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let state = StateHandle::new();
        let multiplexer = RequestMultiplexer::new(config.resend_delay, events_tx.clone());
        let ids = multiplexer.ids();

        let engine = Engine {
            connection: ConnectionManager::new(
                connector,
                endpoint,
                config.reconnect_delay,
                events_tx.clone(),
            ),
            multiplexer,
            dispatcher: ResponseDispatcher::new(collaborators),
            state: state.clone(),
        };
        let task = tokio::spawn(engine.run(events_rx));

        Ok(Self {
            events: events_tx,
            state,
            ids,
            task: Some(task),
        })
    }

    pub fn state(&self) -> &StateHandle {
        &self.state
    }

    pub fn current_request_id(&self) -> RequestId {
        self.ids.current()
    }

    pub fn request_ids(&self) -> RequestIdHandle {
        self.ids.clone()
    }

    pub fn connect(&self) -> ListingResult<()> {
        self.command(Command::Connect)
    }

    pub fn disconnect(&self) -> ListingResult<()> {
        self.command(Command::Disconnect)
    }

    /// Point the listing at `bucket`/`path`. A path naming an object lists
    /// its folder.
    pub fn navigate(
        &self,
        bucket: impl Into<String>,
        path: impl Into<String>,
    ) -> ListingResult<()> {
        self.command(Command::Navigate {
            bucket: bucket.into(),
            path: path.into(),
        })
    }

    /// Re-list the current route unconditionally.
    pub fn refresh(&self) -> ListingResult<()> {
        self.command(Command::Refresh)
    }

    /// Re-list once nothing is loaded and nothing is loading.
    pub fn request_reload(&self) -> ListingResult<()> {
        self.command(Command::RequestReload)
    }

    /// Turn rewind on or off for `bucket`. May be called before navigating
    /// there; the first listing of that bucket then goes out in rewind mode.
    pub fn set_rewind(
        &self,
        bucket: impl Into<String>,
        enabled: bool,
        date: Option<OffsetDateTime>,
    ) -> ListingResult<()> {
        self.command(Command::SetRewind {
            bucket: bucket.into(),
            enabled,
            date,
        })
    }

    /// Delete markers are only listed by the versioned listing, so toggling
    /// this re-lists the current route.
    pub fn set_show_deleted(&self, show: bool) -> ListingResult<()> {
        self.command(Command::SetShowDeleted(show))
    }

    pub fn set_search(&self, text: impl Into<String>) -> ListingResult<()> {
        self.command(Command::SetSearch(text.into()))
    }

    pub fn set_allowed_resources(&self, resources: Vec<PermissionResource>) -> ListingResult<()> {
        self.command(Command::SetAllowedResources(resources))
    }

    /// Cancels the current request, closes the socket and waits for the
    /// engine to stop. No frame is applied afterwards.
    pub async fn teardown(mut self) {
        let _ = self.command(Command::Teardown);
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }

    fn command(&self, command: Command) -> ListingResult<()> {
        self.events
            .send(Event::Command(command))
            .map_err(|_| ListingError::EngineStopped)
    }
}

impl Drop for ListingClient {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

enum Flow {
    Continue,
    Stop,
}

struct Engine {
    connection: ConnectionManager,
    multiplexer: RequestMultiplexer,
    dispatcher: ResponseDispatcher,
    state: StateHandle,
}

impl Engine {
    async fn run(mut self, mut events: mpsc::UnboundedReceiver<Event>) {
        while let Some(event) = events.recv().await {
            if let Flow::Stop = self.handle(event) {
                break;
            }
            self.reload_if_requested();
        }
        debug!(target = "listing::engine", "listing engine stopped");
    }

    fn handle(&mut self, event: Event) -> Flow {
        match event {
            Event::Command(command) => return self.handle_command(command),
            Event::Connection(event) => self.handle_connection(event),
            Event::ReconnectDue { epoch } => {
                self.connection.on_reconnect_due(epoch);
            }
            Event::ResendDue { epoch, intent } => {
                self.multiplexer
                    .on_resend_due(epoch, intent, &mut self.connection, &self.state);
            }
        }
        Flow::Continue
    }

    fn handle_connection(&mut self, event: ConnectionEvent) {
        match event {
            ConnectionEvent::Opened {
                generation,
                outbound,
            } => {
                self.connection.on_opened(generation, outbound);
            }
            ConnectionEvent::Frame { generation, text } => {
                if !self.connection.is_current(generation) {
                    debug!(target = "listing::engine", generation, "frame from stale socket");
                    return;
                }
                self.dispatcher
                    .dispatch(&text, self.multiplexer.current(), &self.state);
            }
            ConnectionEvent::Errored { generation, reason } => {
                self.connection.on_errored(generation, &reason);
            }
            ConnectionEvent::Closed { generation } => {
                if self.connection.on_closed(generation) {
                    self.state.update(|s| s.connection_error = true);
                }
            }
        }
    }

    fn handle_command(&mut self, command: Command) -> Flow {
        match command {
            Command::Connect => {
                self.connection.connect();
            }
            Command::Disconnect => self.connection.disconnect(),
            Command::Navigate { bucket, path } => {
                self.state.update(|s| {
                    s.route = Route { bucket, path };
                    PathLoader::reconcile_rewind(s);
                });
                self.plan_and_submit(false);
            }
            Command::Refresh => self.plan_and_submit(true),
            Command::RequestReload => self.state.update(|s| s.reload_requested = true),
            Command::SetRewind {
                bucket,
                enabled,
                date,
            } => {
                let on_route = self.state.update(|s| {
                    let affected = if enabled { &bucket } else { &s.rewind.bucket };
                    let on_route = s.rewind.enabled || enabled;
                    let on_route = on_route && *affected == s.route.bucket;
                    s.rewind = if enabled {
                        RewindSettings {
                            enabled,
                            bucket,
                            date,
                        }
                    } else {
                        RewindSettings::default()
                    };
                    on_route
                });
                if on_route {
                    self.plan_and_submit(true);
                }
            }
            Command::SetShowDeleted(show) => {
                let changed = self.state.update(|s| {
                    let changed = s.show_deleted != show;
                    s.show_deleted = show;
                    changed
                });
                if changed {
                    self.plan_and_submit(true);
                }
            }
            Command::SetSearch(text) => self.state.update(|s| s.search = text),
            Command::SetAllowedResources(resources) => {
                self.state.update(|s| s.allowed_resources = resources)
            }
            Command::Teardown => {
                if self.multiplexer.current() > 0 {
                    self.multiplexer.cancel_current(&self.connection);
                }
                self.connection.disconnect();
                info!(target = "listing::engine", "listing torn down");
                return Flow::Stop;
            }
        }
        Flow::Continue
    }

    fn plan_and_submit(&mut self, force: bool) {
        let now = OffsetDateTime::now_utc();
        if let Some(intent) = self
            .state
            .read(|s| PathLoader::plan_navigation(s, force, now))
        {
            self.multiplexer
                .submit(intent, &mut self.connection, &self.state);
        }
    }

    fn reload_if_requested(&mut self) {
        // A deferred resend already owns the retry.
        if self.connection.state() == ConnectionState::Connecting {
            return;
        }
        let now = OffsetDateTime::now_utc();
        if let Some(intent) = self.state.read(|s| PathLoader::plan_reload(s, now)) {
            self.multiplexer
                .submit(intent, &mut self.connection, &self.state);
        }
    }
}
