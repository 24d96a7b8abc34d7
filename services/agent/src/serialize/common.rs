//! Shared envelope header and the intermediate grouped representation that
//! both XML and JSON (v1 and v2) render from (spec.md §4.4 "Common
//! envelope", and the supplement note in `SPEC_FULL.md` §4.4: one grouping
//! pass feeds two dialects rather than duplicating it per printer).

use chrono::{DateTime, Utc};
use mtc_model::{
    Category, Checkpoint, CheckpointEntry, ConditionLevel, DataItemId, DeviceModel, Observation, ObservationValue,
};

use crate::config::AgentConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFamily {
    Devices,
    Streams,
    Assets,
    Error,
}

impl DocumentFamily {
    pub fn root_element(self) -> &'static str {
        match self {
            DocumentFamily::Devices => "MTConnectDevices",
            DocumentFamily::Streams => "MTConnectStreams",
            DocumentFamily::Assets => "MTConnectAssets",
            DocumentFamily::Error => "MTConnectError",
        }
    }

    pub fn body_element(self) -> &'static str {
        match self {
            DocumentFamily::Devices => "Devices",
            DocumentFamily::Streams => "Streams",
            DocumentFamily::Assets => "Assets",
            DocumentFamily::Error => "Errors",
        }
    }
}

/// `Header` fields common to every response (spec.md §4.4).
#[derive(Debug, Clone)]
pub struct Header {
    pub family: DocumentFamily,
    pub instance_id: u64,
    pub version: String,
    pub creation_time: DateTime<Utc>,
    pub sender: String,
    pub schema_version: String,
    pub buffer_size: Option<u64>,
    pub asset_buffer_size: Option<u64>,
    pub asset_count: Option<u64>,
    pub first_sequence: Option<u64>,
    pub last_sequence: Option<u64>,
    pub next_sequence: Option<u64>,
    pub device_model_change_time: Option<DateTime<Utc>>,
    /// Per-asset-type counts, probe headers only, schema >= 2.0 (spec.md
    /// §4.4 "Optional `AssetCounts` child").
    pub asset_counts: Vec<(String, u64)>,
}

impl Header {
    pub fn new(family: DocumentFamily, config: &AgentConfig, instance_id: u64, version: &str) -> Self {
        Self {
            family,
            instance_id,
            version: version.to_owned(),
            creation_time: Utc::now(),
            sender: config.sender.clone(),
            schema_version: config.schema_version.clone(),
            buffer_size: None,
            asset_buffer_size: None,
            asset_count: None,
            first_sequence: None,
            last_sequence: None,
            next_sequence: None,
            device_model_change_time: None,
            asset_counts: Vec::new(),
        }
    }
}

/// One renderable observation child, already resolved against the device
/// tree so the printer never has to look anything up (spec.md §9 design
/// note: tagged-sum observation values; the printer dispatches on this
/// shape, not on the data item's declared representation).
#[derive(Debug, Clone)]
pub struct ObsRender {
    pub device_id: String,
    pub device_name: String,
    pub component_id: String,
    pub component_name: String,
    pub component_type: String,
    pub category: Category,
    pub element_name: String,
    pub data_item_id: String,
    pub data_item_name: Option<String>,
    pub sub_type: Option<String>,
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    pub text: Option<String>,
    pub attrs: Vec<(String, String)>,
    pub vector: Option<Vec<f64>>,
    pub data_set: Option<Vec<mtc_model::DataSetEntry>>,
    pub table: Option<Vec<mtc_model::TableRow>>,
}

pub struct ComponentGroup {
    pub component_id: String,
    pub component_name: String,
    pub component_type: String,
    pub samples: Vec<ObsRender>,
    pub events: Vec<ObsRender>,
    pub condition: Vec<ObsRender>,
}

pub struct DeviceGroup {
    pub device_id: String,
    pub device_name: String,
    pub components: Vec<ComponentGroup>,
}

/// Turn a `DATA_TYPE` like `PATH_FEEDRATE` into the `PathFeedrate` element
/// name MTConnect schemas use.
pub fn camel_case(data_type: &str) -> String {
    data_type
        .split(['_', '-'])
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + &chars.as_str().to_lowercase(),
                None => String::new(),
            }
        })
        .collect()
}

fn render_value(obs: &Observation, upcase: bool) -> (Option<String>, Vec<(String, String)>, Option<Vec<f64>>) {
    match &obs.value {
        ObservationValue::Scalar(s) => (Some(maybe_upcase(s, upcase)), Vec::new(), None),
        ObservationValue::Unavailable => (Some("UNAVAILABLE".to_owned()), Vec::new(), None),
        ObservationValue::Vector(values) => (
            Some(values.iter().map(|v| Observation::format_double(*v)).collect::<Vec<_>>().join(" ")),
            Vec::new(),
            Some(values.clone()),
        ),
        ObservationValue::TimeSeries {
            sample_count,
            sample_rate,
            samples,
        } => (
            Some(samples.iter().map(|v| Observation::format_double(*v)).collect::<Vec<_>>().join(" ")),
            vec![
                ("sampleCount".to_owned(), sample_count.to_string()),
                ("sampleRate".to_owned(), Observation::format_double(*sample_rate)),
            ],
            Some(samples.clone()),
        ),
        ObservationValue::DataSet(_) | ObservationValue::Table(_) | ObservationValue::Condition(_) => {
            (None, Vec::new(), None)
        }
    }
}

fn maybe_upcase(s: &str, upcase: bool) -> String {
    if upcase {
        s.to_uppercase()
    } else {
        s.to_owned()
    }
}

fn condition_attrs(level: ConditionLevel, entry: &mtc_model::ConditionEntry) -> Vec<(String, String)> {
    let _ = level;
    let mut attrs = Vec::new();
    if let Some(code) = &entry.native_code {
        attrs.push(("nativeCode".to_owned(), code.clone()));
    }
    if let Some(sev) = &entry.native_severity {
        attrs.push(("nativeSeverity".to_owned(), sev.clone()));
    }
    if let Some(q) = &entry.qualifier {
        attrs.push(("qualifier".to_owned(), q.clone()));
    }
    attrs
}

/// Resolve one observation against the device model into its renderable
/// form; `None` if the data item or its owning component can no longer be
/// found (device tree reloaded out from under a stale observation).
fn render_one(model: &DeviceModel, obs: &Observation, upcase: bool) -> Option<ObsRender> {
    let item = model.data_item(&obs.data_item_id)?;
    let device = model.devices.iter().find(|d| d.data_items.contains_key(&obs.data_item_id))?;
    let component = find_component(&device.root, &item.component_id)?;

    let (element_name, text, attrs, vector, data_set, table) = match &obs.value {
        ObservationValue::Condition(entry) => (
            entry.level.element_name().to_owned(),
            entry.message.clone(),
            condition_attrs(entry.level, entry),
            None,
            None,
            None,
        ),
        ObservationValue::DataSet(entries) => (camel_case(&item.data_type), None, Vec::new(), None, Some(entries.clone()), None),
        ObservationValue::Table(rows) => (camel_case(&item.data_type), None, Vec::new(), None, None, Some(rows.clone())),
        _ => {
            let (text, attrs, vector) = render_value(obs, upcase);
            (camel_case(&item.data_type), text, attrs, vector, None, None)
        }
    };

    Some(ObsRender {
        device_id: device.uuid.clone(),
        device_name: device.name.clone(),
        component_id: component.id.clone(),
        component_name: component.name.clone().unwrap_or_else(|| component.id.clone()),
        component_type: component.component_type.clone(),
        category: obs.category,
        element_name,
        data_item_id: item.id.clone(),
        data_item_name: item.name.clone(),
        sub_type: item.sub_type.clone(),
        sequence: obs.sequence,
        timestamp: obs.timestamp,
        text,
        attrs,
        vector,
        data_set,
        table,
    })
}

fn find_component<'a>(root: &'a mtc_model::Component, id: &str) -> Option<&'a mtc_model::Component> {
    if root.id == id {
        return Some(root);
    }
    root.children.iter().find_map(|c| find_component(c, id))
}

/// Render a flat, already sequence-ordered slice of observations (spec.md
/// §4.4 "Stream serialization layout"): used for sample-window and
/// streaming-chunk bodies.
pub fn render_observations(model: &DeviceModel, observations: &[Observation], upcase: bool) -> Vec<ObsRender> {
    let mut out: Vec<ObsRender> = observations.iter().filter_map(|o| render_one(model, o, upcase)).collect();
    out.sort_by(|a, b| {
        (a.device_id.as_str(), a.component_id.as_str(), a.category as u8, a.element_name.as_str(), a.sequence).cmp(&(
            b.device_id.as_str(),
            b.component_id.as_str(),
            b.category as u8,
            b.element_name.as_str(),
            b.sequence,
        ))
    });
    out
}

/// Render a checkpoint snapshot (spec.md §4.4, current/probe-adjacent
/// headers): one element per value entry, and for conditions either every
/// active fault entry or a single `Normal`/`Unavailable` child when the
/// active list is empty.
pub fn render_checkpoint(model: &DeviceModel, checkpoint: &Checkpoint, filter: &std::collections::HashSet<DataItemId>, upcase: bool) -> Vec<ObsRender> {
    let mut out = Vec::new();
    for (id, entry) in checkpoint.iter() {
        if !filter.contains(id) {
            continue;
        }
        match entry {
            CheckpointEntry::Value(obs) => {
                if let Some(rendered) = render_one(model, obs, upcase) {
                    out.push(rendered);
                }
            }
            CheckpointEntry::Condition(state) => {
                if state.active.is_empty() {
                    if let Some(item) = model.data_item(id) {
                        if let Some(device) = model.devices.iter().find(|d| d.data_items.contains_key(id)) {
                            if let Some(component) = find_component(&device.root, &item.component_id) {
                                let level = if state.unavailable {
                                    ConditionLevel::Unavailable
                                } else {
                                    ConditionLevel::Normal
                                };
                                out.push(ObsRender {
                                    device_id: device.uuid.clone(),
                                    device_name: device.name.clone(),
                                    component_id: component.id.clone(),
                                    component_name: component.name.clone().unwrap_or_else(|| component.id.clone()),
                                    component_type: component.component_type.clone(),
                                    category: Category::Condition,
                                    element_name: level.element_name().to_owned(),
                                    data_item_id: id.clone(),
                                    data_item_name: item.name.clone(),
                                    sub_type: item.sub_type.clone(),
                                    sequence: 0,
                                    timestamp: Utc::now(),
                                    text: None,
                                    attrs: Vec::new(),
                                    vector: None,
                                    data_set: None,
                                    table: None,
                                });
                            }
                        }
                    }
                } else {
                    for obs in &state.active {
                        if let Some(rendered) = render_one(model, obs, upcase) {
                            out.push(rendered);
                        }
                    }
                }
            }
        }
    }
    out.sort_by(|a, b| {
        (a.device_id.as_str(), a.component_id.as_str(), a.category as u8, a.element_name.as_str()).cmp(&(
            b.device_id.as_str(),
            b.component_id.as_str(),
            b.category as u8,
            b.element_name.as_str(),
        ))
    });
    out
}

/// Fold a flat, already-sorted `ObsRender` list into the
/// `DeviceStream -> ComponentStream -> (Samples|Events|Condition)` nesting
/// both dialects share (spec.md §4.4 "Stream serialization layout").
pub fn group_by_device_component(items: Vec<ObsRender>) -> Vec<DeviceGroup> {
    let mut devices: Vec<DeviceGroup> = Vec::new();
    for item in items {
        let device = match devices.iter_mut().find(|d| d.device_id == item.device_id) {
            Some(d) => d,
            None => {
                devices.push(DeviceGroup {
                    device_id: item.device_id.clone(),
                    device_name: item.device_name.clone(),
                    components: Vec::new(),
                });
                devices.last_mut().unwrap()
            }
        };
        let component = match device.components.iter_mut().find(|c| c.component_id == item.component_id) {
            Some(c) => c,
            None => {
                device.components.push(ComponentGroup {
                    component_id: item.component_id.clone(),
                    component_name: item.component_name.clone(),
                    component_type: item.component_type.clone(),
                    samples: Vec::new(),
                    events: Vec::new(),
                    condition: Vec::new(),
                });
                device.components.last_mut().unwrap()
            }
        };
        match item.category {
            Category::Sample => component.samples.push(item),
            Category::Event => component.events.push(item),
            Category::Condition => component.condition.push(item),
        }
    }
    devices
}
