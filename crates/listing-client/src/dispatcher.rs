//! Routes inbound frames into the listing state.
//!
//! Only frames for the current request id may change the listing, and only
//! while that request is still loading or streaming.

use std::sync::Arc;

use listing_proto::{
    decode_frame, FrameError, ObjectEntry, PermissionResource, RequestId, ResponseFrame,
};
use tracing::{debug, info, warn};

use crate::permissions::AllowListFilter;
use crate::state::{ListingFailure, StateHandle};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorNotice {
    pub message: String,
    pub detailed_message: String,
}

impl From<&FrameError> for ErrorNotice {
    fn from(error: &FrameError) -> Self {
        let (message, detailed_message) = error.messages();
        Self {
            message,
            detailed_message,
        }
    }
}

/// Where user-facing listing errors are shown.
pub trait ErrorSurface: Send + Sync {
    fn notify(&self, notice: ErrorNotice);
}

/// Host hook for an expired session.
pub trait SessionControl: Send + Sync {
    fn force_reload(&self);
}

/// Computes what may still be shown when a listing is forbidden.
pub trait PermissionFilter: Send + Sync {
    fn filter(
        &self,
        bucket: &str,
        prefix: &str,
        allowed: &[PermissionResource],
    ) -> Vec<ObjectEntry>;
}

/// Host-side collaborators the dispatcher reports to.
#[derive(Clone)]
pub struct Collaborators {
    pub errors: Arc<dyn ErrorSurface>,
    pub session: Arc<dyn SessionControl>,
    pub permissions: Arc<dyn PermissionFilter>,
}

impl Collaborators {
    pub fn new(errors: Arc<dyn ErrorSurface>, session: Arc<dyn SessionControl>) -> Self {
        Self {
            errors,
            session,
            permissions: Arc::new(AllowListFilter),
        }
    }

    pub fn with_permissions(mut self, permissions: Arc<dyn PermissionFilter>) -> Self {
        self.permissions = permissions;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Malformed,
    SessionExpired,
    /// Frame for a superseded or finished request.
    Discarded,
    /// Forbidden listing replaced by this many allow-listed entries.
    Fallback(usize),
    Failed,
    Ended,
    Appended(usize),
}

pub(crate) struct ResponseDispatcher {
    collaborators: Collaborators,
}

impl ResponseDispatcher {
    pub(crate) fn new(collaborators: Collaborators) -> Self {
        Self { collaborators }
    }

    pub(crate) fn dispatch(
        &self,
        text: &str,
        current: RequestId,
        state: &StateHandle,
    ) -> DispatchOutcome {
        let frame = match decode_frame(text) {
            Ok(frame) => frame,
            Err(err) => {
                warn!(target = "listing::dispatcher", error = %err, "ignoring malformed frame");
                return DispatchOutcome::Malformed;
            }
        };

        // Session expiry applies whatever request the frame belongs to.
        if frame.error.as_ref().is_some_and(FrameError::is_session_expired) {
            info!(target = "listing::dispatcher", request_id = frame.request_id, "session expired");
            self.collaborators.session.force_reload();
            return DispatchOutcome::SessionExpired;
        }

        if frame.request_id != current || !state.read(|s| s.phase.accepts(frame.request_id)) {
            debug!(
                target = "listing::dispatcher",
                request_id = frame.request_id,
                current,
                "discarding frame"
            );
            return DispatchOutcome::Discarded;
        }

        match frame.error.clone() {
            Some(error) if error.is_forbidden() => self.forbidden(&frame, &error, state),
            Some(error) => {
                warn!(
                    target = "listing::dispatcher",
                    request_id = frame.request_id,
                    code = error.code,
                    message = %error.api_error.message,
                    "listing failed"
                );
                // Observers waiting on the phase must find the notice already raised.
                self.collaborators.errors.notify(ErrorNotice::from(&error));
                state.update(|s| {
                    s.fail(frame.request_id, ListingFailure::Listing { code: error.code })
                });
                DispatchOutcome::Failed
            }
            None if frame.request_end => {
                state.update(|s| s.complete(frame.request_id));
                debug!(
                    target = "listing::dispatcher",
                    request_id = frame.request_id,
                    "listing complete"
                );
                DispatchOutcome::Ended
            }
            None => {
                let entries = frame.data.map(|data| data.into_entries()).unwrap_or_default();
                let count = entries.len();
                state.update(|s| s.append(frame.request_id, entries));
                DispatchOutcome::Appended(count)
            }
        }
    }

    fn forbidden(
        &self,
        frame: &ResponseFrame,
        error: &FrameError,
        state: &StateHandle,
    ) -> DispatchOutcome {
        let (bucket, prefix, allowed) = state.read(|s| {
            let bucket = frame
                .bucket_name
                .clone()
                .filter(|b| !b.is_empty())
                .unwrap_or_else(|| s.current_bucket.clone());
            let prefix = frame.prefix.clone().unwrap_or_else(|| s.current_path.clone());
            (bucket, prefix, s.allowed_resources.clone())
        });
        let prefix = with_trailing_slash(prefix);

        let permitted = self.collaborators.permissions.filter(&bucket, &prefix, &allowed);
        if permitted.is_empty() {
            warn!(target = "listing::dispatcher", %bucket, %prefix, "listing forbidden");
            self.collaborators.errors.notify(ErrorNotice::from(error));
            state.update(|s| s.fail(frame.request_id, ListingFailure::PermissionDenied));
            return DispatchOutcome::Failed;
        }

        let count = permitted.len();
        info!(
            target = "listing::dispatcher",
            %bucket,
            %prefix,
            count,
            "listing forbidden; showing allow-listed entries"
        );
        state.update(|s| s.complete_with(frame.request_id, permitted));
        DispatchOutcome::Fallback(count)
    }
}

fn with_trailing_slash(mut prefix: String) -> String {
    if !prefix.is_empty() && !prefix.ends_with('/') {
        prefix.push('/');
    }
    prefix
}
