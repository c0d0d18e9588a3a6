use listing_proto::PermissionResource;
use time::OffsetDateTime;
use tokio::sync::mpsc;

use crate::multiplexer::ListIntent;

/// Everything the listing engine reacts to. One queue, one consumer, so state
/// transitions never interleave.
#[derive(Debug)]
pub(crate) enum Event {
    Command(Command),
    Connection(ConnectionEvent),
    ReconnectDue { epoch: u64 },
    ResendDue { epoch: u64, intent: ListIntent },
}

/// Socket lifecycle, tagged with the generation of the socket it came from.
#[derive(Debug)]
pub(crate) enum ConnectionEvent {
    Opened {
        generation: u64,
        outbound: mpsc::UnboundedSender<String>,
    },
    Frame {
        generation: u64,
        text: String,
    },
    Errored {
        generation: u64,
        reason: String,
    },
    Closed {
        generation: u64,
    },
}

#[derive(Debug)]
pub(crate) enum Command {
    Connect,
    Disconnect,
    Navigate { bucket: String, path: String },
    Refresh,
    RequestReload,
    SetRewind {
        bucket: String,
        enabled: bool,
        date: Option<OffsetDateTime>,
    },
    SetShowDeleted(bool),
    SetSearch(String),
    SetAllowedResources(Vec<PermissionResource>),
    Teardown,
}
