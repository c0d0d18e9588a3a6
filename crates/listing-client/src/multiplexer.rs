use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use listing_proto::{encode_request, ListRequest, RequestId};
use time::OffsetDateTime;
use tokio::sync::mpsc;
use tracing::{debug, error};

use crate::connection::{ConnectionManager, ConnectionState};
use crate::error::ListingError;
use crate::event::Event;
use crate::state::StateHandle;

/// A listing the host wants on screen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListIntent {
    pub bucket_name: String,
    pub prefix: String,
    pub rewind: bool,
    pub date: OffsetDateTime,
}

/// Read side of the current request id. Only the engine advances it.
#[derive(Debug, Clone, Default)]
pub struct RequestIdHandle(Arc<AtomicU64>);

impl RequestIdHandle {
    pub fn current(&self) -> RequestId {
        self.0.load(Ordering::Acquire)
    }

    fn publish(&self, request_id: RequestId) {
        self.0.store(request_id, Ordering::Release);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    Sent(RequestId),
    /// Socket not ready; the intent is retried after the resend delay.
    Deferred,
    /// A newer intent (or a cancel) replaced this one before it went out.
    Superseded,
    /// The id was assigned but the frame could not be written.
    Failed(RequestId),
}

pub(crate) struct RequestMultiplexer {
    ids: RequestIdHandle,
    intent_epoch: u64,
    resend_delay: Duration,
    events: mpsc::UnboundedSender<Event>,
}

impl RequestMultiplexer {
    pub(crate) fn new(resend_delay: Duration, events: mpsc::UnboundedSender<Event>) -> Self {
        Self {
            ids: RequestIdHandle::default(),
            intent_epoch: 0,
            resend_delay,
            events,
        }
    }

    pub(crate) fn ids(&self) -> RequestIdHandle {
        self.ids.clone()
    }

    pub(crate) fn current(&self) -> RequestId {
        self.ids.current()
    }

    /// Makes `intent` the listing of record, superseding any earlier one.
    pub(crate) fn submit(
        &mut self,
        intent: ListIntent,
        connection: &mut ConnectionManager,
        state: &StateHandle,
    ) -> SubmitOutcome {
        self.intent_epoch += 1;
        self.try_send(self.intent_epoch, intent, connection, state)
    }

    pub(crate) fn on_resend_due(
        &mut self,
        epoch: u64,
        intent: ListIntent,
        connection: &mut ConnectionManager,
        state: &StateHandle,
    ) -> SubmitOutcome {
        if epoch != self.intent_epoch {
            debug!(
                target = "listing::multiplexer",
                bucket = %intent.bucket_name,
                prefix = %intent.prefix,
                "dropping superseded listing intent"
            );
            return SubmitOutcome::Superseded;
        }
        self.try_send(epoch, intent, connection, state)
    }

    /// Asks the server to stop streaming the current request. Also drops any
    /// intent still waiting for the socket.
    pub(crate) fn cancel_current(&mut self, connection: &ConnectionManager) -> bool {
        self.intent_epoch += 1;
        let request_id = self.current();
        let sent = encode_request(&ListRequest::cancel(request_id))
            .map_err(ListingError::from)
            .and_then(|text| connection.send(text));
        match sent {
            Ok(()) => {
                debug!(target = "listing::multiplexer", request_id, "sent cancel");
                true
            }
            Err(err) => {
                debug!(target = "listing::multiplexer", request_id, error = %err, "cancel dropped");
                false
            }
        }
    }

    fn try_send(
        &mut self,
        epoch: u64,
        intent: ListIntent,
        connection: &mut ConnectionManager,
        state: &StateHandle,
    ) -> SubmitOutcome {
        if !connection.is_connected() {
            state.update(|s| s.reload_requested = false);
            if connection.state() == ConnectionState::Disconnected {
                connection.connect();
            }
            self.schedule_resend(epoch, intent);
            return SubmitOutcome::Deferred;
        }

        let request_id = self.current() + 1;
        state.update(|s| s.begin_request(&intent.bucket_name, &intent.prefix, request_id));
        self.ids.publish(request_id);

        let request = ListRequest::listing(
            intent.bucket_name,
            intent.prefix,
            intent.rewind,
            intent.date,
            request_id,
        );
        let sent = encode_request(&request)
            .map_err(ListingError::from)
            .and_then(|text| connection.send(text));
        match sent {
            Ok(()) => {
                debug!(
                    target = "listing::multiplexer",
                    request_id,
                    bucket = %request.bucket_name,
                    prefix = %request.prefix,
                    mode = ?request.mode,
                    "sent listing request"
                );
                SubmitOutcome::Sent(request_id)
            }
            Err(err) => {
                error!(
                    target = "listing::multiplexer",
                    request_id,
                    error = %err,
                    "failed to send listing request"
                );
                state.update(|s| s.abandon(request_id));
                SubmitOutcome::Failed(request_id)
            }
        }
    }

    fn schedule_resend(&self, epoch: u64, intent: ListIntent) {
        let delay = self.resend_delay;
        let events = self.events.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = events.send(Event::ResendDue { epoch, intent });
        });
    }
}
