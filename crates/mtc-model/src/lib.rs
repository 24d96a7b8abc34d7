//! Shared data model for the MTConnect agent's observation-serving core:
//! observations, the device/component tree they reference, per-data-item
//! checkpoints, and the closed error taxonomy the REST sink reports.

pub mod checkpoint;
pub mod device;
pub mod error;
pub mod observation;

pub use checkpoint::{Checkpoint, CheckpointEntry, ConditionState};
pub use device::{Component, Converter, DataItem, Device, DeviceModel, FilterSpec, Representation};
pub use error::{check_range, AgentError, ErrorCode, ErrorDetail};
pub use observation::{
    Category, ConditionEntry, ConditionLevel, DataItemId, DataSetEntry, Observation,
    ObservationValue, SequenceNumber, TableRow,
};
