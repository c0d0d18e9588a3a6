//! Live object listing over the console's websocket.
//!
//! [`ListingClient`] owns one socket to `ws/objectManager`, numbers every
//! listing request, and folds the streamed frames for the newest request
//! into a shared [`ListingState`]. Frames for superseded requests are
//! dropped, a lost socket is reopened after a fixed delay, and a forbidden
//! listing falls back to what the session's allow-list still reveals.

pub mod client;
pub mod config;
mod connection;
pub mod dispatcher;
pub mod error;
mod event;
pub mod multiplexer;
pub mod orchestrator;
pub mod permissions;
pub mod state;
pub mod transport;

pub use client::ListingClient;
pub use config::ClientConfig;
pub use connection::ConnectionState;
pub use dispatcher::{
    Collaborators, DispatchOutcome, ErrorNotice, ErrorSurface, PermissionFilter, SessionControl,
};
pub use error::{ListingError, ListingResult};
pub use multiplexer::{ListIntent, RequestIdHandle, SubmitOutcome};
pub use orchestrator::{is_directory_path, normalize_path, PathLoader};
pub use permissions::AllowListFilter;
pub use state::{ListingFailure, ListingPhase, ListingState, RewindSettings, Route, StateHandle};
pub use transport::{Connector, Socket, SocketMessage, WsConnector};
