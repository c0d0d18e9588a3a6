use std::sync::Arc;

use listing_client::{ErrorNotice, ErrorSurface, SessionControl};
use tokio::sync::Notify;
use tracing::error;

/// Prints listing errors and turns session expiry into a shutdown signal.
#[derive(Default)]
pub struct TerminalSurface {
    expired: Notify,
}

impl TerminalSurface {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub async fn session_expired(&self) {
        self.expired.notified().await;
    }
}

impl ErrorSurface for TerminalSurface {
    fn notify(&self, notice: ErrorNotice) {
        error!(detail = %notice.detailed_message, "{}", notice.message);
    }
}

impl SessionControl for TerminalSurface {
    fn force_reload(&self) {
        // notify_one keeps the permit if nobody is waiting yet.
        self.expired.notify_one();
    }
}
