//! Per-data-item latest-state snapshots and the condition set transition
//! rules (spec.md §3 "Checkpoint", §4.1.1).

use std::collections::HashMap;
use std::collections::HashSet;

use crate::observation::{ConditionLevel, DataItemId, Observation, ObservationValue};

/// The state a checkpoint holds for one data item: either its single latest
/// observation, or — for condition data items — the active fault list
/// (spec.md §9: the fault list is the unit of state, not one thread per
/// fault).
#[derive(Debug, Clone, PartialEq)]
pub enum CheckpointEntry {
    Value(Observation),
    Condition(ConditionState),
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ConditionState {
    /// Active fault entries, each carried as the `Observation` that raised
    /// it so sequence/timestamp stay available to the serializer.
    pub active: Vec<Observation>,
    pub unavailable: bool,
}

impl ConditionState {
    /// Apply the condition transition rules for a newly arrived observation
    /// (spec.md §4.1.1). `obs.value` must be `ObservationValue::Condition`
    /// or `ObservationValue::Unavailable`.
    pub fn apply(&mut self, obs: Observation) {
        match &obs.value {
            ObservationValue::Unavailable => {
                self.active.clear();
                self.unavailable = true;
            }
            ObservationValue::Condition(entry) => {
                self.unavailable = false;
                match entry.level {
                    ConditionLevel::Normal => {
                        if let Some(code) = &entry.native_code {
                            self.active.retain(|o| match &o.value {
                                ObservationValue::Condition(e) => e.native_code.as_ref() != Some(code),
                                _ => true,
                            });
                        } else {
                            self.active.clear();
                        }
                    }
                    ConditionLevel::Fault | ConditionLevel::Warning => {
                        if let Some(code) = &entry.native_code {
                            if let Some(existing) = self.active.iter_mut().find(|o| match &o.value {
                                ObservationValue::Condition(e) => e.native_code.as_ref() == Some(code),
                                _ => false,
                            }) {
                                *existing = obs;
                            } else {
                                self.active.push(obs);
                            }
                        } else {
                            self.active.push(obs);
                        }
                    }
                    ConditionLevel::Unavailable => {
                        self.active.clear();
                        self.unavailable = true;
                    }
                }
            }
            _ => { /* non-condition payload on a condition data item: ignore */ }
        }
    }
}

/// A mapping from `DataItem` to its most-recent state, cloneable in
/// O(entries) and filterable by a set of data-item ids.
#[derive(Debug, Clone, Default)]
pub struct Checkpoint {
    entries: HashMap<DataItemId, CheckpointEntry>,
}

impl Checkpoint {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one observation into the checkpoint, applying condition-set
    /// transition rules when the data item is a condition.
    pub fn apply(&mut self, obs: Observation) {
        let id = obs.data_item_id.clone();
        match obs.category {
            crate::observation::Category::Condition => {
                let state = match self.entries.entry(id).or_insert_with(|| {
                    CheckpointEntry::Condition(ConditionState::default())
                }) {
                    CheckpointEntry::Condition(state) => state,
                    CheckpointEntry::Value(_) => unreachable!("data item category changed"),
                };
                state.apply(obs);
            }
            _ => {
                self.entries.insert(id, CheckpointEntry::Value(obs));
            }
        }
    }

    pub fn get(&self, id: &str) -> Option<&CheckpointEntry> {
        self.entries.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&DataItemId, &CheckpointEntry)> {
        self.entries.iter()
    }

    /// A filtered clone containing only the entries whose data-item id is
    /// in `filter`. O(entries), as required by spec.md §3.
    pub fn filtered(&self, filter: &HashSet<DataItemId>) -> Checkpoint {
        Checkpoint {
            entries: self
                .entries
                .iter()
                .filter(|(id, _)| filter.contains(*id))
                .map(|(id, entry)| (id.clone(), entry.clone()))
                .collect(),
        }
    }
}

impl PartialEq for Checkpoint {
    fn eq(&self, other: &Self) -> bool {
        self.entries == other.entries
    }
}
