//! Observation value objects (spec.md §3 "Observation").

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A data item identifier. Stable across device-tree reloads.
pub type DataItemId = String;

/// A monotonically assigned 64-bit sequence number.
pub type SequenceNumber = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Category {
    Sample,
    Event,
    Condition,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionLevel {
    Normal,
    Warning,
    Fault,
    Unavailable,
}

impl ConditionLevel {
    pub fn element_name(self) -> &'static str {
        match self {
            ConditionLevel::Normal => "Normal",
            ConditionLevel::Warning => "Warning",
            ConditionLevel::Fault => "Fault",
            ConditionLevel::Unavailable => "Unavailable",
        }
    }
}

/// One active (or clearing) condition report (spec.md §3, §4.1.1).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionEntry {
    pub level: ConditionLevel,
    pub native_code: Option<String>,
    pub native_severity: Option<String>,
    pub qualifier: Option<String>,
    pub message: Option<String>,
}

/// One key/value pair within a `DATA_SET` or one cell of a `TABLE` row.
/// `value: None` represents a removed entry (a reset with no replacement).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataSetEntry {
    pub key: String,
    pub value: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableRow {
    pub key: String,
    pub cells: Vec<DataSetEntry>,
}

/// The polymorphic value payload of one observation (design note in spec.md §9:
/// a tagged sum rather than a class hierarchy; serializers dispatch on this tag
/// directly instead of on the data item's representation).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ObservationValue {
    Scalar(String),
    Vector(Vec<f64>),
    TimeSeries {
        sample_count: u32,
        sample_rate: f64,
        samples: Vec<f64>,
    },
    DataSet(Vec<DataSetEntry>),
    Table(Vec<TableRow>),
    Condition(ConditionEntry),
    Unavailable,
}

/// An immutable fact produced by a data item (spec.md §3). Identity is the
/// sequence number; two observations with equal sequence numbers are the
/// same observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub sequence: SequenceNumber,
    pub data_item_id: DataItemId,
    pub timestamp: DateTime<Utc>,
    pub category: Category,
    pub value: ObservationValue,
}

impl Observation {
    /// Doubles render with the shortest round-trip form, and the three
    /// special values always take their documented string form rather than
    /// a bare numeric literal (spec.md §4.4 "Numeric encoding").
    pub fn format_double(value: f64) -> String {
        if value.is_nan() {
            "NaN".to_owned()
        } else if value.is_infinite() {
            if value > 0.0 {
                "Infinity".to_owned()
            } else {
                "-Infinity".to_owned()
            }
        } else {
            // `f64`'s `Display` impl already produces the shortest
            // round-trip decimal representation, with no trailing ".0".
            format!("{value}")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_double_handles_nan_and_infinities() {
        assert_eq!(Observation::format_double(f64::NAN), "NaN");
        assert_eq!(Observation::format_double(f64::INFINITY), "Infinity");
        assert_eq!(Observation::format_double(f64::NEG_INFINITY), "-Infinity");
    }

    #[test]
    fn format_double_strips_trailing_zero_fraction() {
        assert_eq!(Observation::format_double(5.0), "5");
        assert_eq!(Observation::format_double(5.5), "5.5");
    }
}
