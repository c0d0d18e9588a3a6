use std::sync::Arc;
use std::time::Duration;

use listing_proto::{ObjectEntry, PermissionResource, RequestId};
use parking_lot::RwLock;
use time::OffsetDateTime;
use tokio::sync::watch;

use crate::error::{ListingError, ListingResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListingFailure {
    /// 403 with nothing the allow-list could recover.
    PermissionDenied,
    /// Any other error frame.
    Listing { code: i64 },
}

/// Where the listing for the current request stands. Only `Loading` counts
/// as "request in progress"; `Ready` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ListingPhase {
    #[default]
    Idle,
    Loading {
        request_id: RequestId,
    },
    Streaming {
        request_id: RequestId,
    },
    Ready {
        request_id: RequestId,
    },
    Failed {
        request_id: RequestId,
        failure: ListingFailure,
    },
}

impl ListingPhase {
    pub fn request_id(&self) -> Option<RequestId> {
        match *self {
            ListingPhase::Idle => None,
            ListingPhase::Loading { request_id }
            | ListingPhase::Streaming { request_id }
            | ListingPhase::Ready { request_id }
            | ListingPhase::Failed { request_id, .. } => Some(request_id),
        }
    }

    pub fn in_progress(&self) -> bool {
        matches!(self, ListingPhase::Loading { .. })
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ListingPhase::Ready { .. } | ListingPhase::Failed { .. })
    }

    /// Whether frames for `request_id` may still change the listing.
    pub fn accepts(&self, request_id: RequestId) -> bool {
        match *self {
            ListingPhase::Loading { request_id: id }
            | ListingPhase::Streaming { request_id: id } => id == request_id,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Route {
    pub bucket: String,
    /// Raw path from navigation; may point at an object rather than a prefix.
    pub path: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RewindSettings {
    pub enabled: bool,
    /// Bucket the rewind was enabled for.
    pub bucket: String,
    pub date: Option<OffsetDateTime>,
}

#[derive(Debug, Clone, Default)]
pub struct ListingState {
    pub route: Route,
    pub rewind: RewindSettings,
    pub show_deleted: bool,
    pub reload_requested: bool,
    pub records: Vec<ObjectEntry>,
    pub phase: ListingPhase,
    /// Prefix of the most recently issued listing.
    pub current_path: String,
    /// Bucket of the most recently issued listing.
    pub current_bucket: String,
    pub connection_error: bool,
    pub search: String,
    pub selected: Vec<String>,
    pub allowed_resources: Vec<PermissionResource>,
}

impl ListingState {
    pub fn request_in_progress(&self) -> bool {
        self.phase.in_progress()
    }

    /// Records after the deleted-object toggle and text filter are applied.
    pub fn visible_records(&self) -> Vec<&ObjectEntry> {
        let needle = self.search.to_lowercase();
        self.records
            .iter()
            .filter(|entry| self.show_deleted || !entry.delete_flag)
            .filter(|entry| needle.is_empty() || entry.name.to_lowercase().contains(&needle))
            .collect()
    }

    pub(crate) fn begin_request(&mut self, bucket: &str, prefix: &str, request_id: RequestId) {
        self.records.clear();
        self.connection_error = false;
        self.current_path = prefix.to_string();
        self.current_bucket = bucket.to_string();
        self.phase = ListingPhase::Loading { request_id };
        self.reload_requested = false;
        self.search.clear();
        self.selected.clear();
    }

    pub(crate) fn append(&mut self, request_id: RequestId, entries: Vec<ObjectEntry>) {
        self.phase = ListingPhase::Streaming { request_id };
        self.records.extend(entries);
    }

    pub(crate) fn complete(&mut self, request_id: RequestId) {
        self.phase = ListingPhase::Ready { request_id };
    }

    pub(crate) fn complete_with(&mut self, request_id: RequestId, entries: Vec<ObjectEntry>) {
        self.records = entries;
        self.phase = ListingPhase::Ready { request_id };
    }

    pub(crate) fn fail(&mut self, request_id: RequestId, failure: ListingFailure) {
        self.phase = ListingPhase::Failed {
            request_id,
            failure,
        };
    }

    /// The request never reached the wire; ask for it to be issued again.
    pub(crate) fn abandon(&mut self, request_id: RequestId) {
        if self.phase.request_id() == Some(request_id) {
            self.phase = ListingPhase::Idle;
            self.reload_requested = true;
        }
    }
}

/// Shared view of the listing state. Readers may live on any task; writes
/// come from the listing engine only and each write is a single closure.
#[derive(Clone)]
pub struct StateHandle {
    inner: Arc<RwLock<ListingState>>,
    version: Arc<watch::Sender<u64>>,
}

impl StateHandle {
    pub fn new() -> Self {
        let (version, _) = watch::channel(0);
        Self {
            inner: Arc::new(RwLock::new(ListingState::default())),
            version: Arc::new(version),
        }
    }

    pub fn snapshot(&self) -> ListingState {
        self.inner.read().clone()
    }

    pub fn read<R>(&self, f: impl FnOnce(&ListingState) -> R) -> R {
        f(&self.inner.read())
    }

    pub(crate) fn update<R>(&self, f: impl FnOnce(&mut ListingState) -> R) -> R {
        let result = {
            let mut guard = self.inner.write();
            f(&mut guard)
        };
        self.version.send_modify(|version| *version = version.wrapping_add(1));
        result
    }

    /// Notified after every state write.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.version.subscribe()
    }

    /// Resolves with a snapshot once `predicate` holds.
    pub async fn wait_for<F>(
        &self,
        timeout: Duration,
        mut predicate: F,
    ) -> ListingResult<ListingState>
    where
        F: FnMut(&ListingState) -> bool,
    {
        let mut changes = self.subscribe();
        let wait = async {
            loop {
                {
                    let state = self.inner.read();
                    if predicate(&state) {
                        return Ok(state.clone());
                    }
                }
                if changes.changed().await.is_err() {
                    return Err(ListingError::EngineStopped);
                }
            }
        };
        tokio::time::timeout(timeout, wait)
            .await
            .map_err(|_| ListingError::Timeout)?
    }
}

impl Default for StateHandle {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(name: &str, deleted: bool) -> ObjectEntry {
        ObjectEntry {
            delete_flag: deleted,
            ..ObjectEntry::named(name)
        }
    }

    #[test]
    fn begin_request_resets_listing() {
        let mut state = ListingState {
            records: vec![entry("old.txt", false)],
            connection_error: true,
            reload_requested: true,
            search: "old".into(),
            selected: vec!["old.txt".into()],
            ..ListingState::default()
        };
        state.begin_request("photos", "2024/", 4);

        assert!(state.records.is_empty());
        assert!(!state.connection_error);
        assert!(!state.reload_requested);
        assert!(state.search.is_empty());
        assert!(state.selected.is_empty());
        assert_eq!(state.current_bucket, "photos");
        assert_eq!(state.current_path, "2024/");
        assert_eq!(state.phase, ListingPhase::Loading { request_id: 4 });
        assert!(state.request_in_progress());
    }

    #[test]
    fn terminal_phases_stop_accepting_frames() {
        assert!(ListingPhase::Loading { request_id: 2 }.accepts(2));
        assert!(ListingPhase::Streaming { request_id: 2 }.accepts(2));
        assert!(!ListingPhase::Streaming { request_id: 2 }.accepts(1));
        assert!(!ListingPhase::Ready { request_id: 2 }.accepts(2));
        assert!(!ListingPhase::Failed {
            request_id: 2,
            failure: ListingFailure::Listing { code: 500 }
        }
        .accepts(2));
        assert!(!ListingPhase::Idle.accepts(0));
    }

    #[test]
    fn visible_records_hide_deleted_and_apply_filter() {
        let mut state = ListingState {
            records: vec![
                entry("Report.pdf", false),
                entry("gone.pdf", true),
                entry("photo.png", false),
            ],
            ..ListingState::default()
        };
        let names = |state: &ListingState| {
            state
                .visible_records()
                .into_iter()
                .map(|e| e.name.clone())
                .collect::<Vec<_>>()
        };
        assert_eq!(names(&state), ["Report.pdf", "photo.png"]);

        state.show_deleted = true;
        state.search = "PDF".into();
        assert_eq!(names(&state), ["Report.pdf", "gone.pdf"]);
    }

    #[test]
    fn abandon_only_touches_matching_request() {
        let mut state = ListingState::default();
        state.begin_request("photos", "", 3);
        state.abandon(2);
        assert_eq!(state.phase, ListingPhase::Loading { request_id: 3 });
        state.abandon(3);
        assert_eq!(state.phase, ListingPhase::Idle);
        assert!(state.reload_requested);
    }

    #[tokio::test]
    async fn wait_for_sees_later_updates() {
        let handle = StateHandle::new();
        let writer = handle.clone();
        tokio::spawn(async move {
            writer.update(|s| s.begin_request("photos", "", 1));
            writer.update(|s| s.complete(1));
        });
        let state = handle
            .wait_for(Duration::from_secs(1), |s| s.phase.is_terminal())
            .await
            .expect("terminal phase");
        assert_eq!(state.phase, ListingPhase::Ready { request_id: 1 });
    }
}
