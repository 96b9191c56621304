// ── In-flight request table ──
//
// Each outbound request owns exactly one entry. The entry is resolved by
// the matching `result` frame, or failed by connection loss / shutdown,
// or removed by the caller's guard on timeout or cancellation.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::debug;

use crate::error::Error;
use crate::frame::ResponseFrame;

type Completion = oneshot::Sender<Result<ResponseFrame, Error>>;

struct PendingRequest {
    created_at: Instant,
    completion: Completion,
}

#[derive(Default)]
pub(crate) struct PendingRequests {
    entries: DashMap<u64, PendingRequest>,
}

impl PendingRequests {
    /// Register `id` and hand back the receiving half plus a guard that
    /// drops the entry when the caller stops waiting.
    pub(crate) fn register(
        self: &Arc<Self>,
        id: u64,
    ) -> (oneshot::Receiver<Result<ResponseFrame, Error>>, PendingGuard) {
        let (tx, rx) = oneshot::channel();
        self.entries.insert(
            id,
            PendingRequest {
                created_at: Instant::now(),
                completion: tx,
            },
        );
        let guard = PendingGuard {
            table: Arc::clone(self),
            id,
        };
        (rx, guard)
    }

    /// Complete the entry matching `frame.id`. Unknown ids are ignored.
    pub(crate) fn resolve(&self, frame: ResponseFrame) -> bool {
        let id = frame.id;
        match self.entries.remove(&id) {
            Some((_, pending)) => {
                debug!(
                    id,
                    elapsed_ms = pending.created_at.elapsed().as_millis(),
                    "request resolved"
                );
                let _ = pending.completion.send(Ok(frame));
                true
            }
            None => {
                debug!(id, "response for unknown or expired request");
                false
            }
        }
    }

    /// Fail every outstanding request with an error built per id.
    pub(crate) fn fail_all(&self, make_error: impl Fn(u64) -> Error) -> usize {
        let ids: Vec<u64> = self.entries.iter().map(|e| *e.key()).collect();
        let mut failed = 0;
        for id in ids {
            if let Some((_, pending)) = self.entries.remove(&id) {
                let _ = pending.completion.send(Err(make_error(id)));
                failed += 1;
            }
        }
        failed
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    fn forget(&self, id: u64) {
        self.entries.remove(&id);
    }
}

/// Removes its request entry on drop, so a timed-out or abandoned call
/// never leaves a dangling slot behind.
pub(crate) struct PendingGuard {
    table: Arc<PendingRequests>,
    id: u64,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.table.forget(self.id);
    }
}
