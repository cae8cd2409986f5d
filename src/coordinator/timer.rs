use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::AbortHandle;

use super::Command;
use crate::protocol::RequestId;

/// schedules the auto-transfer of a pending host request
pub trait ExpiryScheduler {
    type Handle;

    /// arrange for `request_id` to expire after `after`
    fn schedule(&mut self, request_id: RequestId, after: Duration) -> Self::Handle;

    /// stop a scheduled expiry; a no-op if it already fired
    fn cancel(&mut self, handle: Self::Handle);
}

/// runs each expiry as a sleeping tokio task that re-enters the coordinator inbox
pub struct TokioScheduler {
    inbox: mpsc::WeakUnboundedSender<Command>,
}

impl TokioScheduler {
    pub(crate) fn new(inbox: &mpsc::UnboundedSender<Command>) -> Self {
        // weak, so pending timers don't keep a dropped coordinator alive
        Self {
            inbox: inbox.downgrade(),
        }
    }
}

impl ExpiryScheduler for TokioScheduler {
    type Handle = AbortHandle;

    fn schedule(&mut self, request_id: RequestId, after: Duration) -> AbortHandle {
        let inbox = self.inbox.clone();
        tokio::spawn(async move {
            tokio::time::sleep(after).await;
            if let Some(inbox) = inbox.upgrade() {
                let _ = inbox.send(Command::Expire(request_id));
            }
        })
        .abort_handle()
    }

    fn cancel(&mut self, handle: AbortHandle) {
        handle.abort();
    }
}
