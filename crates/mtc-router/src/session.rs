//! Streaming session bookkeeping: one [`StreamSession`] per in-flight
//! `sample`/`current` stream, looked up by request id when `/cancel/id=...`
//! arrives (spec.md §4.2 "Cancellation").

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{Notify, RwLock};

#[derive(Clone)]
pub struct StreamSession {
    request_id: String,
    cancelled: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl StreamSession {
    pub fn new(request_id: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            cancelled: Arc::new(AtomicBool::new(false)),
            notify: Arc::new(Notify::new()),
        }
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    /// Abort the pending timer/observer wait and mark the session closed.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Resolves once `cancel()` has been called; used in a `select!` inside
    /// the streaming loop alongside the interval/heartbeat timers.
    ///
    /// Arms the `Notified` future before checking the flag, matching
    /// `SharedBuffer`'s observer handle: `Notify` only guarantees a call to
    /// `notified()` made before `notify_waiters()` is not missed, so checking
    /// the flag first and arming second would leave a window where `cancel()`
    /// lands in between and the waiter never wakes.
    pub async fn cancelled(&self) {
        let notified = self.notify.notified();
        if self.is_cancelled() {
            return;
        }
        notified.await;
    }
}

/// The live set of streaming sessions, keyed by request id.
#[derive(Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<RwLock<HashMap<String, StreamSession>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, session: StreamSession) {
        self.sessions
            .write()
            .await
            .insert(session.request_id().to_owned(), session);
    }

    pub async fn remove(&self, request_id: &str) {
        self.sessions.write().await.remove(request_id);
    }

    /// Find the session by request id and cancel it; returns `false` if no
    /// such session is currently attached.
    pub async fn cancel(&self, request_id: &str) -> bool {
        match self.sessions.read().await.get(request_id) {
            Some(session) => {
                session.cancel();
                true
            }
            None => false,
        }
    }
}
