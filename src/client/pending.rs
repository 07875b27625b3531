//! In-flight request correlation table
//!
//! Each outstanding request holds exactly one table entry keyed by its
//! correlation id, with a single-use oneshot channel from completer to
//! waiter. The oneshot buffers a value sent before the waiter polls, so a
//! response racing ahead of the wait cannot be lost.
//!
//! All operations take one table-wide lock for an O(1) critical section;
//! the lock is never held across an await.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{ClientError, ClientResult};

struct PendingEntry {
    created_at: Instant,
    tx: oneshot::Sender<Value>,
}

/// Waiter side of a registered request.
pub struct PendingHandle {
    pub correlation_id: Uuid,
    rx: oneshot::Receiver<Value>,
}

impl PendingHandle {
    /// Wait for the response. Resolves with an error if the table entry
    /// was dropped without completion (shutdown).
    pub async fn wait(self) -> Result<Value, oneshot::error::RecvError> {
        self.rx.await
    }
}

#[derive(Default)]
pub struct PendingRequestTable {
    entries: Mutex<HashMap<Uuid, PendingEntry>>,
}

impl PendingRequestTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<Uuid, PendingEntry>> {
        match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Create an entry for a fresh correlation id. Fails if the id is
    /// already in flight, which indicates an id-generation defect.
    pub fn register(&self, correlation_id: Uuid) -> ClientResult<PendingHandle> {
        let (tx, rx) = oneshot::channel();
        let mut entries = self.lock();

        if entries.contains_key(&correlation_id) {
            return Err(ClientError::DuplicateCorrelationId(correlation_id));
        }

        entries.insert(
            correlation_id,
            PendingEntry {
                created_at: Instant::now(),
                tx,
            },
        );
        Ok(PendingHandle { correlation_id, rx })
    }

    /// Deliver a response to the waiting request. An unknown id (already
    /// timed out and removed, or never ours) is a logged no-op.
    ///
    /// Returns true only if a waiter actually received the response.
    pub fn complete(&self, correlation_id: Uuid, response: Value) -> bool {
        let entry = self.lock().remove(&correlation_id);

        match entry {
            Some(entry) => {
                let waited = entry.created_at.elapsed();
                match entry.tx.send(response) {
                    Ok(()) => {
                        debug!(%correlation_id, ?waited, "Completed pending request");
                        true
                    }
                    Err(_) => {
                        // Waiter timed out between our removal and the send
                        warn!(%correlation_id, "Waiter gone before completion");
                        false
                    }
                }
            }
            None => {
                warn!(%correlation_id, "Response for unknown or expired correlation id ignored");
                false
            }
        }
    }

    /// Drop an entry without completing it (timeout or publish-failure
    /// cleanup). Safe to call after `complete`; returns whether an entry
    /// was actually removed.
    pub fn remove(&self, correlation_id: Uuid) -> bool {
        self.lock().remove(&correlation_id).is_some()
    }

    /// Whether the id currently has a waiter.
    pub fn contains(&self, correlation_id: Uuid) -> bool {
        self.lock().contains_key(&correlation_id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
