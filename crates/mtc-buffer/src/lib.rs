//! The circular observation buffer: a monotonically-sequenced, fixed
//! capacity ring with per-data-item checkpoints (spec.md §4.1).
//!
//! [`CircularBuffer`] is the synchronous core; [`SharedBuffer`] wraps it for
//! the single-writer/many-reader concurrency model described in spec.md §5
//! and owns the signal that wakes streaming observers on every insert.

mod shared;

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};
use mtc_model::{
    check_range, AgentError, Category, Checkpoint, DataItemId, Observation, ObservationValue,
    SequenceNumber,
};

pub use shared::{ObserverHandle, SharedBuffer};

/// Default interval (in sequence numbers) between periodic checkpoints.
pub const DEFAULT_CHECKPOINT_FREQ: u64 = 200;

/// `(first_seq, next_seq, capacity, ring, latest, first_seq_checkpoint,
/// periodic_checkpoints)` — spec.md §3 "CircularBuffer state".
pub struct CircularBuffer {
    capacity: u64,
    checkpoint_freq: u64,
    first_seq: SequenceNumber,
    next_seq: SequenceNumber,
    ring: Vec<Option<Observation>>,
    latest: Checkpoint,
    first_seq_checkpoint: Checkpoint,
    /// Snapshots taken every `checkpoint_freq`-th insertion, keyed by the
    /// sequence number they were taken *after* applying.
    periodic: BTreeMap<SequenceNumber, Checkpoint>,
}

impl CircularBuffer {
    pub fn new(capacity: u64) -> Self {
        Self::with_checkpoint_freq(capacity, DEFAULT_CHECKPOINT_FREQ)
    }

    pub fn with_checkpoint_freq(capacity: u64, checkpoint_freq: u64) -> Self {
        assert!(capacity > 0, "circular buffer capacity must be positive");
        assert!(checkpoint_freq > 0, "checkpoint frequency must be positive");
        Self {
            capacity,
            checkpoint_freq,
            first_seq: 0,
            next_seq: 0,
            ring: vec![None; capacity as usize],
            latest: Checkpoint::new(),
            first_seq_checkpoint: Checkpoint::new(),
            periodic: BTreeMap::new(),
        }
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    pub fn first_sequence(&self) -> SequenceNumber {
        self.first_seq
    }

    /// One past the last assigned sequence number; the sequence the next
    /// insertion will receive.
    pub fn next_sequence(&self) -> SequenceNumber {
        self.next_seq
    }

    fn slot(&self, seq: SequenceNumber) -> usize {
        (seq % self.capacity) as usize
    }

    /// Assign the next sequence number to a freshly observed value and
    /// insert it into the ring (spec.md §4.1 "add").
    pub fn add(
        &mut self,
        data_item_id: DataItemId,
        timestamp: DateTime<Utc>,
        category: Category,
        value: ObservationValue,
    ) -> SequenceNumber {
        let seq = self.next_seq;
        let obs = Observation {
            sequence: seq,
            data_item_id,
            timestamp,
            category,
            value,
        };

        let idx = self.slot(seq);
        self.ring[idx] = Some(obs.clone());
        // `first_seq_checkpoint` must equal checkpoint_at(first_seq) at all
        // times. While the buffer hasn't filled yet, first_seq stays put at
        // its initial value, so the observation landing exactly on it (only
        // ever the very first insertion) has to be folded in here — eviction
        // below only ever advances first_seq to a *new* value and folds in
        // the observation now sitting there, which assumes the checkpoint
        // was already correct for the old first_seq.
        if seq == self.first_seq {
            self.first_seq_checkpoint.apply(obs.clone());
        }
        self.latest.apply(obs);
        self.next_seq += 1;

        if seq % self.checkpoint_freq == 0 {
            self.periodic.insert(seq, self.latest.clone());
        }

        if self.next_seq - self.first_seq > self.capacity {
            let evicted_seq = self.first_seq;
            let new_first_seq = evicted_seq + 1;
            if let Some(obs) = self.ring[self.slot(new_first_seq)].clone() {
                if obs.sequence == new_first_seq {
                    self.first_seq_checkpoint.apply(obs);
                }
            }
            self.first_seq = new_first_seq;

            // Periodic checkpoints taken below the new window can never be
            // used again as a replay base (their position has fallen out of
            // the ring); drop them from the front, O(1) amortized.
            while let Some((&oldest, _)) = self.periodic.iter().next() {
                if oldest < self.first_seq {
                    self.periodic.remove(&oldest);
                } else {
                    break;
                }
            }
        }

        seq
    }

    /// The observation at `seq`, or `None` if it has fallen out of the
    /// window or hasn't been produced yet.
    pub fn get(&self, seq: SequenceNumber) -> Option<Observation> {
        if seq < self.first_seq || seq >= self.next_seq {
            return None;
        }
        self.ring[self.slot(seq)]
            .as_ref()
            .filter(|obs| obs.sequence == seq)
            .cloned()
    }

    /// Walk the buffer collecting observations matching `filter` (spec.md
    /// §4.1 "get_range"). `count > 0` walks forward from `from`; `count < 0`
    /// walks backward from `from` (or `next_seq` if unset), emitting at most
    /// `|count|` observations in ascending sequence order either way.
    pub fn get_range(
        &self,
        filter: &HashSet<DataItemId>,
        count: i64,
        from: Option<SequenceNumber>,
        to: Option<SequenceNumber>,
    ) -> (Vec<Observation>, SequenceNumber, bool) {
        if count >= 0 {
            self.walk_forward(filter, count.max(0) as u64, from, to)
        } else {
            self.walk_backward(filter, (-count) as u64, from)
        }
    }

    fn walk_forward(
        &self,
        filter: &HashSet<DataItemId>,
        count: u64,
        from: Option<SequenceNumber>,
        to: Option<SequenceNumber>,
    ) -> (Vec<Observation>, SequenceNumber, bool) {
        let start = from.unwrap_or(self.first_seq).max(self.first_seq);
        let end_bound = to.unwrap_or(self.next_seq).min(self.next_seq);

        let mut out = Vec::new();
        let mut s = start;
        while s < end_bound && (out.len() as u64) < count {
            if let Some(obs) = self.ring[self.slot(s)].as_ref() {
                if obs.sequence == s && filter.contains(&obs.data_item_id) {
                    out.push(obs.clone());
                }
            }
            s += 1;
        }

        let end_seq = out.last().map_or(s, |o| o.sequence + 1);
        let end_of_buffer = s >= self.next_seq;
        (out, end_seq, end_of_buffer)
    }

    fn walk_backward(
        &self,
        filter: &HashSet<DataItemId>,
        limit: u64,
        from: Option<SequenceNumber>,
    ) -> (Vec<Observation>, SequenceNumber, bool) {
        let upper = from.unwrap_or(self.next_seq).min(self.next_seq);

        let mut out = Vec::new();
        let mut s = upper;
        while s > self.first_seq && (out.len() as u64) < limit {
            s -= 1;
            if let Some(obs) = self.ring[self.slot(s)].as_ref() {
                if obs.sequence == s && filter.contains(&obs.data_item_id) {
                    out.push(obs.clone());
                }
            }
        }
        out.reverse();

        let end_seq = out.last().map_or(s, |o| o.sequence + 1);
        let end_of_buffer = s <= self.first_seq;
        (out, end_seq, end_of_buffer)
    }

    /// Validate that `seq` is a legal `at` bound: spec.md §7 maps anything
    /// outside `[first_seq - 1, next_seq)` to `OUT_OF_RANGE` (exclusive of
    /// `next_seq` itself — `at` names a sequence that has already been
    /// observed).
    pub fn check_sequence_bound(&self, name: &str, seq: SequenceNumber) -> Result<(), AgentError> {
        let min = self.first_seq as i64 - 1;
        let max = if self.next_seq == 0 {
            -1
        } else {
            (self.next_seq - 1) as i64
        };
        check_range(name, seq as i64, min, max)
    }

    /// Validate that `seq` is a legal `from`/`to` bound: unlike `at`, the
    /// upper end is inclusive of `next_seq` itself, so a client can resume
    /// streaming with `from=<next_seq>` exactly where it left off.
    pub fn check_from_to_bound(&self, name: &str, seq: SequenceNumber) -> Result<(), AgentError> {
        let min = self.first_seq as i64 - 1;
        let max = self.next_seq as i64;
        check_range(name, seq as i64, min, max)
    }

    /// Reconstruct the checkpoint as of sequence `seq` (spec.md §4.1
    /// "checkpoint_at"): start from the nearest periodic checkpoint at or
    /// below `seq` (or the first-sequence checkpoint if there is none),
    /// then replay forward through `seq`.
    pub fn checkpoint_at(
        &self,
        seq: SequenceNumber,
        filter: &HashSet<DataItemId>,
    ) -> Result<Checkpoint, AgentError> {
        self.check_sequence_bound("at", seq)?;

        if self.next_seq == 0 || seq + 1 == self.first_seq {
            // Immediately before the retained window: nothing is known yet.
            return Ok(Checkpoint::new());
        }

        let (base_seq, mut checkpoint) = match self.periodic.range(..=seq).next_back() {
            Some((base, cp)) => (*base, cp.clone()),
            None => (self.first_seq, self.first_seq_checkpoint.clone()),
        };

        let replay_start = base_seq.max(self.first_seq) + 1;
        for s in replay_start..=seq {
            if let Some(obs) = self.ring[self.slot(s)].as_ref() {
                if obs.sequence == s {
                    checkpoint.apply(obs.clone());
                }
            }
        }

        Ok(checkpoint.filtered(filter))
    }

    /// A filtered clone of the continuously-maintained latest checkpoint.
    pub fn latest(&self, filter: &HashSet<DataItemId>) -> Checkpoint {
        self.latest.filtered(filter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mtc_model::ConditionEntry;
    use mtc_model::ConditionLevel;

    fn filter_all(ids: &[&str]) -> HashSet<DataItemId> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    fn push_scalar(buf: &mut CircularBuffer, id: &str, v: &str) -> SequenceNumber {
        buf.add(id.to_owned(), Utc::now(), Category::Event, ObservationValue::Scalar(v.to_owned()))
    }

    #[test]
    fn sequence_numbers_increase_strictly_and_window_size_matches_min_n_capacity() {
        let mut buf = CircularBuffer::with_checkpoint_freq(10, 4);
        for i in 0..25 {
            push_scalar(&mut buf, "line", &i.to_string());
        }
        assert_eq!(buf.next_sequence() - buf.first_sequence(), 10);
        assert_eq!(buf.next_sequence(), 25);
        assert_eq!(buf.first_sequence(), 15);
    }

    #[test]
    fn get_returns_none_outside_window_and_some_inside() {
        let mut buf = CircularBuffer::with_checkpoint_freq(5, 2);
        for i in 0..12 {
            push_scalar(&mut buf, "line", &i.to_string());
        }
        assert!(buf.get(0).is_none());
        assert!(buf.get(6).is_none());
        let obs = buf.get(10).unwrap();
        assert_eq!(obs.sequence, 10);
    }

    #[test]
    fn get_range_forward_respects_count_and_filter() {
        let mut buf = CircularBuffer::with_checkpoint_freq(100, 10);
        for i in 0..20 {
            push_scalar(&mut buf, "line", &i.to_string());
        }
        let filter = filter_all(&["line"]);
        let (obs, end_seq, eob) = buf.get_range(&filter, 5, Some(0), None);
        assert_eq!(obs.len(), 5);
        assert_eq!(obs[0].sequence, 0);
        assert_eq!(end_seq, 5);
        assert!(!eob);

        let (obs, end_seq, eob) = buf.get_range(&filter, 100, Some(0), None);
        assert_eq!(obs.len(), 20);
        assert_eq!(end_seq, 20);
        assert!(eob);
    }

    #[test]
    fn get_range_backward_returns_ascending_order() {
        let mut buf = CircularBuffer::with_checkpoint_freq(100, 10);
        for i in 0..20 {
            push_scalar(&mut buf, "line", &i.to_string());
        }
        let filter = filter_all(&["line"]);
        let (obs, _end_seq, _eob) = buf.get_range(&filter, -5, None, None);
        assert_eq!(obs.len(), 5);
        let seqs: Vec<_> = obs.iter().map(|o| o.sequence).collect();
        assert_eq!(seqs, vec![15, 16, 17, 18, 19]);
    }

    #[test]
    fn checkpoint_at_last_sequence_matches_latest() {
        let mut buf = CircularBuffer::with_checkpoint_freq(100, 7);
        for i in 0..50 {
            push_scalar(&mut buf, "line", &i.to_string());
        }
        let filter = filter_all(&["line"]);
        let at_last = buf.checkpoint_at(buf.next_sequence() - 1, &filter).unwrap();
        let latest = buf.latest(&filter);
        assert_eq!(at_last, latest);
    }

    #[test]
    fn checkpoint_at_reconstructs_mid_buffer_state() {
        let mut buf = CircularBuffer::with_checkpoint_freq(1000, 13);
        for i in 1..=100 {
            push_scalar(&mut buf, "line", &i.to_string());
        }
        let filter = filter_all(&["line"]);
        let cp = buf.checkpoint_at(49, &filter).unwrap();
        match cp.get("line").unwrap() {
            mtc_model::CheckpointEntry::Value(obs) => match &obs.value {
                ObservationValue::Scalar(s) => assert_eq!(s, "50"),
                _ => panic!("expected scalar"),
            },
            _ => panic!("expected value entry"),
        }
    }

    #[test]
    fn checkpoint_at_evicted_sequence_is_out_of_range() {
        let mut buf = CircularBuffer::with_checkpoint_freq(10, 4);
        for i in 0..25 {
            push_scalar(&mut buf, "line", &i.to_string());
        }
        let filter = filter_all(&["line"]);
        let err = buf.checkpoint_at(3, &filter).unwrap_err();
        assert_eq!(err.code, mtc_model::ErrorCode::OutOfRange);
    }

    #[test]
    fn checkpoint_at_one_before_window_is_empty() {
        let mut buf = CircularBuffer::with_checkpoint_freq(10, 4);
        for i in 0..25 {
            push_scalar(&mut buf, "line", &i.to_string());
        }
        let filter = filter_all(&["line"]);
        let cp = buf.checkpoint_at(buf.first_sequence() - 1, &filter).unwrap();
        assert!(cp.is_empty());
    }

    #[test]
    fn from_to_bound_accepts_next_seq_but_at_bound_rejects_it() {
        let mut buf = CircularBuffer::with_checkpoint_freq(100, 10);
        for i in 0..20 {
            push_scalar(&mut buf, "line", &i.to_string());
        }
        let next = buf.next_sequence();

        assert!(buf.check_from_to_bound("from", next).is_ok());
        assert!(buf.check_from_to_bound("to", next).is_ok());

        let err = buf.check_sequence_bound("at", next).unwrap_err();
        assert_eq!(err.code, mtc_model::ErrorCode::OutOfRange);

        let err = buf.check_from_to_bound("from", next + 1).unwrap_err();
        assert_eq!(err.code, mtc_model::ErrorCode::OutOfRange);
    }

    #[test]
    fn first_seq_checkpoint_retains_other_data_items_through_eviction() {
        // capacity 3, no periodic checkpoint below the query sequence once
        // its own has been pruned: exercises the first_seq_checkpoint
        // fallback path directly rather than a periodic-checkpoint replay.
        let mut buf = CircularBuffer::with_checkpoint_freq(3, 1000);
        push_scalar(&mut buf, "a", "0"); // seq 0
        push_scalar(&mut buf, "b", "1"); // seq 1
        push_scalar(&mut buf, "a", "2"); // seq 2
        push_scalar(&mut buf, "a", "3"); // seq 3 - evicts seq 0, first_seq -> 1

        assert_eq!(buf.first_sequence(), 1);
        let filter = filter_all(&["a", "b"]);
        let cp = buf.checkpoint_at(1, &filter).unwrap();
        match cp.get("a").unwrap() {
            mtc_model::CheckpointEntry::Value(obs) => match &obs.value {
                ObservationValue::Scalar(s) => assert_eq!(s, "0"),
                _ => panic!("expected scalar"),
            },
            _ => panic!("expected value entry"),
        }
        match cp.get("b").unwrap() {
            mtc_model::CheckpointEntry::Value(obs) => match &obs.value {
                ObservationValue::Scalar(s) => assert_eq!(s, "1"),
                _ => panic!("expected scalar"),
            },
            _ => panic!("expected value entry"),
        }
    }

    #[test]
    fn conditions_reconstruct_active_fault_list_through_checkpoint_at() {
        let mut buf = CircularBuffer::with_checkpoint_freq(1000, 5);
        let make = |level, code: &str| {
            ObservationValue::Condition(ConditionEntry {
                level,
                native_code: Some(code.to_owned()),
                native_severity: None,
                qualifier: None,
                message: None,
            })
        };
        buf.add("cond".to_owned(), Utc::now(), Category::Condition, make(ConditionLevel::Fault, "404"));
        let seq_after_first_fault = buf.next_sequence() - 1;
        buf.add("cond".to_owned(), Utc::now(), Category::Condition, make(ConditionLevel::Fault, "500"));
        buf.add(
            "cond".to_owned(),
            Utc::now(),
            Category::Condition,
            ObservationValue::Condition(ConditionEntry {
                level: ConditionLevel::Normal,
                native_code: Some("404".to_owned()),
                native_severity: None,
                qualifier: None,
                message: None,
            }),
        );

        let filter = filter_all(&["cond"]);
        let mid = buf.checkpoint_at(seq_after_first_fault, &filter).unwrap();
        match mid.get("cond").unwrap() {
            mtc_model::CheckpointEntry::Condition(state) => assert_eq!(state.active.len(), 1),
            _ => panic!("expected condition entry"),
        }

        let latest = buf.latest(&filter);
        match latest.get("cond").unwrap() {
            mtc_model::CheckpointEntry::Condition(state) => {
                assert_eq!(state.active.len(), 1);
                match &state.active[0].value {
                    ObservationValue::Condition(e) => assert_eq!(e.native_code.as_deref(), Some("500")),
                    _ => panic!("expected condition"),
                }
            }
            _ => panic!("expected condition entry"),
        }
    }
}
