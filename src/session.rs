//! Per-session runtime coordination.
//!
//! The relational store owns session *records*; this registry owns the
//! runtime state around them: the answer lock that serialises `Answer` calls
//! per session, and the cancellation token that turns `Delete` into a
//! barrier for in-flight work.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio_util::sync::CancellationToken;

#[derive(Clone)]
pub struct SessionHandle {
    answer_lock: Arc<Mutex<()>>,
    cancel: CancellationToken,
}

impl SessionHandle {
    fn new() -> Self {
        Self {
            answer_lock: Arc::new(Mutex::new(())),
            cancel: CancellationToken::new(),
        }
    }

    /// One answer at a time per session: the guard is held across the whole
    /// stream.
    pub async fn acquire_answer(&self) -> OwnedMutexGuard<()> {
        Arc::clone(&self.answer_lock).lock_owned().await
    }

    #[must_use]
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Thread-safe registry of per-session handles.
#[derive(Clone)]
pub struct SessionCoordinator {
    inner: Arc<RwLock<HashMap<i64, SessionHandle>>>,
}

impl Default for SessionCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionCoordinator {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Get or create the handle for a session.
    #[must_use]
    pub fn handle(&self, session_id: i64) -> SessionHandle {
        {
            let guard = self.inner.read().expect("session registry poisoned");
            if let Some(handle) = guard.get(&session_id) {
                return handle.clone();
            }
        }

        let mut guard = self.inner.write().expect("session registry poisoned");
        guard
            .entry(session_id)
            .or_insert_with(SessionHandle::new)
            .clone()
    }

    /// Delete barrier: cancel everything in flight for the session and drop
    /// its handle. Operations that already hold the token observe the
    /// cancellation and abort.
    pub fn revoke(&self, session_id: i64) {
        let removed = {
            let mut guard = self.inner.write().expect("session registry poisoned");
            guard.remove(&session_id)
        };
        if let Some(handle) = removed {
            handle.cancel.cancel();
        }
    }
}
