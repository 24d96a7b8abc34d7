//! Async wrapper around [`CircularBuffer`] for the single-writer/many-reader
//! concurrency model (spec.md §5): one `RwLock` guarding the buffer, and a
//! `Notify` that coalesces wakeups for every long-poll observer instead of
//! queueing one message per insert.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use mtc_model::{AgentError, Category, Checkpoint, DataItemId, Observation, ObservationValue, SequenceNumber};
use tokio::sync::{Notify, RwLock};

use crate::CircularBuffer;

/// A cloneable handle onto a [`CircularBuffer`] shared between the
/// ingestion path and every streaming HTTP response.
#[derive(Clone)]
pub struct SharedBuffer {
    inner: Arc<RwLock<CircularBuffer>>,
    notify: Arc<Notify>,
}

impl SharedBuffer {
    pub fn new(capacity: u64) -> Self {
        Self::with_checkpoint_freq(capacity, crate::DEFAULT_CHECKPOINT_FREQ)
    }

    pub fn with_checkpoint_freq(capacity: u64, checkpoint_freq: u64) -> Self {
        Self {
            inner: Arc::new(RwLock::new(CircularBuffer::with_checkpoint_freq(
                capacity,
                checkpoint_freq,
            ))),
            notify: Arc::new(Notify::new()),
        }
    }

    /// Record an observation and wake every waiting observer. Coalesced:
    /// observers that were asleep see the latest state once they wake, they
    /// don't get one notification per insert that happened while they slept.
    pub async fn add(
        &self,
        data_item_id: DataItemId,
        timestamp: DateTime<Utc>,
        category: Category,
        value: ObservationValue,
    ) -> SequenceNumber {
        let seq = {
            let mut buf = self.inner.write().await;
            buf.add(data_item_id, timestamp, category, value)
        };
        self.notify.notify_waiters();
        seq
    }

    pub async fn get(&self, seq: SequenceNumber) -> Option<Observation> {
        self.inner.read().await.get(seq)
    }

    pub async fn get_range(
        &self,
        filter: &HashSet<DataItemId>,
        count: i64,
        from: Option<SequenceNumber>,
        to: Option<SequenceNumber>,
    ) -> (Vec<Observation>, SequenceNumber, bool) {
        self.inner.read().await.get_range(filter, count, from, to)
    }

    pub async fn checkpoint_at(
        &self,
        seq: SequenceNumber,
        filter: &HashSet<DataItemId>,
    ) -> Result<Checkpoint, AgentError> {
        self.inner.read().await.checkpoint_at(seq, filter)
    }

    pub async fn latest(&self, filter: &HashSet<DataItemId>) -> Checkpoint {
        self.inner.read().await.latest(filter)
    }

    pub async fn next_sequence(&self) -> SequenceNumber {
        self.inner.read().await.next_sequence()
    }

    pub async fn first_sequence(&self) -> SequenceNumber {
        self.inner.read().await.first_sequence()
    }

    pub async fn check_sequence_bound(&self, name: &str, seq: SequenceNumber) -> Result<(), AgentError> {
        self.inner.read().await.check_sequence_bound(name, seq)
    }

    pub async fn check_from_to_bound(&self, name: &str, seq: SequenceNumber) -> Result<(), AgentError> {
        self.inner.read().await.check_from_to_bound(name, seq)
    }

    /// Obtain a handle that can wait for the next insert without missing one
    /// that lands between composing the handle and the first `wait` call.
    pub fn observe(&self) -> ObserverHandle {
        ObserverHandle {
            notify: self.notify.clone(),
        }
    }
}

/// A single-use-per-wait registration against the buffer's notify signal.
///
/// Callers must call [`ObserverHandle::arm`] *before* re-checking the
/// condition they're polling for, then `await` the returned future; this is
/// the race-free pattern `tokio::sync::Notify` requires (arm, check, wait).
pub struct ObserverHandle {
    notify: Arc<Notify>,
}

impl ObserverHandle {
    /// Begin waiting for the next notification. The returned future resolves
    /// on the next `notify_waiters()` call made after this method returns,
    /// even if that happens before the future is awaited.
    pub fn arm(&self) -> impl std::future::Future<Output = ()> + '_ {
        self.notify.notified()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter(ids: &[&str]) -> HashSet<DataItemId> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn add_wakes_an_armed_observer() {
        let buf = SharedBuffer::new(100);
        let observer = buf.observe();
        let armed = observer.arm();

        buf.add(
            "line".to_owned(),
            Utc::now(),
            Category::Event,
            ObservationValue::Scalar("1".to_owned()),
        )
        .await;

        tokio::time::timeout(std::time::Duration::from_millis(200), armed)
            .await
            .expect("observer should have been woken by add()");
    }

    #[tokio::test]
    async fn concurrent_readers_see_consistent_snapshots() {
        let buf = SharedBuffer::new(1000);
        for i in 0..50 {
            buf.add(
                "line".to_owned(),
                Utc::now(),
                Category::Event,
                ObservationValue::Scalar(i.to_string()),
            )
            .await;
        }
        let f = filter(&["line"]);
        let latest = buf.latest(&f).await;
        let at_last = buf.checkpoint_at(buf.next_sequence().await - 1, &f).await.unwrap();
        assert_eq!(latest, at_last);
    }
}
