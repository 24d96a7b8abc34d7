//! PUT/POST observation ingestion (spec.md §4.6 "Loopback Source"): parses
//! a `key=value&...` body, maps each key to a data item by name, and
//! submits it to the buffer.
//!
//! The pipe-delimited branch is a practical subset of the original SHDR
//! line format, not the full tokenizer (out of scope per spec.md §1
//! Non-goals); which subset to support for each representation was an open
//! question resolved in `DESIGN.md`.

use chrono::{DateTime, Utc};
use mtc_model::{
    AgentError, Category, ConditionEntry, ConditionLevel, DataItem, DataSetEntry, DeviceModel, ObservationValue,
    Representation, TableRow,
};

use crate::state::AppState;

/// One `key=value` pair accepted by the loopback sink, already split from
/// the raw body. `time` is recognised specially and never treated as a
/// data item name.
struct Assignment<'a> {
    key: &'a str,
    value: &'a str,
}

fn parse_pairs(raw: &str) -> Vec<Assignment<'_>> {
    raw.split('&')
        .filter(|pair| !pair.is_empty())
        .filter_map(|pair| {
            let (key, value) = pair.split_once('=')?;
            Some(Assignment { key, value })
        })
        .collect()
}

fn find_data_item<'a>(model: &'a DeviceModel, device: Option<&str>, name: &str) -> Option<&'a DataItem> {
    let devices: Box<dyn Iterator<Item = &mtc_model::Device>> = match device {
        Some(d) => Box::new(model.find(d).into_iter()),
        None => Box::new(model.devices.iter()),
    };
    for device in devices {
        if let Some(item) = device.data_items.values().find(|item| item.name.as_deref() == Some(name)) {
            return Some(item);
        }
    }
    None
}

fn parse_condition(parts: &[&str]) -> ConditionEntry {
    let level = match parts.first().map(|s| s.to_uppercase()) {
        Some(s) if s == "WARNING" => ConditionLevel::Warning,
        Some(s) if s == "FAULT" => ConditionLevel::Fault,
        Some(s) if s == "UNAVAILABLE" => ConditionLevel::Unavailable,
        _ => ConditionLevel::Normal,
    };
    let nonempty = |s: &&str| !s.is_empty();
    ConditionEntry {
        level,
        native_code: parts.get(1).copied().filter(nonempty).map(str::to_owned),
        native_severity: parts.get(2).copied().filter(nonempty).map(str::to_owned),
        qualifier: parts.get(3).copied().filter(nonempty).map(str::to_owned),
        message: parts.get(4).copied().filter(nonempty).map(str::to_owned),
    }
}

fn parse_time_series(parts: &[&str]) -> Option<ObservationValue> {
    let sample_count: u32 = parts.first()?.parse().ok()?;
    let sample_rate: f64 = parts.get(1)?.parse().ok()?;
    let samples: Vec<f64> = parts.get(2)?.split_whitespace().filter_map(|s| s.parse().ok()).collect();
    Some(ObservationValue::TimeSeries {
        sample_count,
        sample_rate,
        samples,
    })
}

fn parse_data_set_entries(parts: &[&str]) -> Vec<DataSetEntry> {
    parts
        .iter()
        .filter(|p| !p.is_empty())
        .map(|entry| match entry.split_once('=') {
            Some((key, value)) if !value.is_empty() => DataSetEntry {
                key: key.to_owned(),
                value: Some(value.to_owned()),
            },
            Some((key, _)) => DataSetEntry {
                key: key.to_owned(),
                value: None,
            },
            None => DataSetEntry {
                key: entry.to_string(),
                value: None,
            },
        })
        .collect()
}

fn parse_table(parts: &[&str]) -> Vec<TableRow> {
    parts
        .iter()
        .filter(|p| !p.is_empty())
        .filter_map(|row| {
            let (key, rest) = row.split_once(':')?;
            let cells = parse_data_set_entries(&rest.split(':').collect::<Vec<_>>());
            Some(TableRow {
                key: key.to_owned(),
                cells,
            })
        })
        .collect()
}

/// Interpret one value against the data item's category/representation,
/// falling back to a plain scalar when the value carries no `|` separator
/// (spec.md §4.6: "a single scalar observation ... or a pipe-delimited SHDR
/// line when the value contains `|`").
fn parse_value(item: &DataItem, raw: &str) -> ObservationValue {
    if raw == "UNAVAILABLE" {
        return ObservationValue::Unavailable;
    }
    if !raw.contains('|') {
        return ObservationValue::Scalar(raw.to_owned());
    }
    let parts: Vec<&str> = raw.split('|').collect();
    match item.category {
        Category::Condition => ObservationValue::Condition(parse_condition(&parts)),
        _ => match item.representation {
            Representation::TimeSeries => parse_time_series(&parts).unwrap_or_else(|| ObservationValue::Scalar(raw.to_owned())),
            Representation::DataSet => ObservationValue::DataSet(parse_data_set_entries(&parts)),
            Representation::Table => ObservationValue::Table(parse_table(&parts)),
            Representation::Value => {
                let values: Vec<f64> = parts.iter().filter_map(|p| p.parse().ok()).collect();
                if values.len() == parts.len() {
                    ObservationValue::Vector(values)
                } else {
                    ObservationValue::Scalar(raw.to_owned())
                }
            }
        },
    }
}

/// Ingest a `key=value&...` body for `device` (`None` means any device may
/// own the named item, the root-level `PUT /` form). Returns one
/// `INVALID_REQUEST` error per key that doesn't resolve to a data item;
/// every resolvable key is still applied even if others fail.
pub async fn ingest(state: &AppState, device: Option<&str>, body: &str) -> Vec<AgentError> {
    let assignments = parse_pairs(body);
    let timestamp = assignments
        .iter()
        .find(|a| a.key == "time")
        .and_then(|a| DateTime::parse_from_rfc3339(a.value).ok())
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(Utc::now);

    let model = state.devices.load();
    let mut errors = Vec::new();
    for assignment in assignments.iter().filter(|a| a.key != "time") {
        match find_data_item(&model, device, assignment.key) {
            Some(item) => {
                let value = parse_value(item, assignment.value);
                state.buffer.add(item.id.clone(), timestamp, item.category, value).await;
            }
            None => errors.push(AgentError::invalid_request(format!(
                "Could not find data item for key: {}",
                assignment.key
            ))),
        }
    }
    errors
}
