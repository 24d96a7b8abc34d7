//! JSON rendering: v1 (flat array of single-key objects per element) and v2
//! (grouped, name-keyed arrays) dialects, both built from the same
//! [`ObsRender`] grouping `xml.rs` renders from (spec.md §4.4 "JSON
//! dialects").

use mtc_model::{AgentError, Device, ErrorDetail};
use serde_json::{json, Map, Value};

use crate::assets::Asset;
use crate::config::{AgentConfig, JsonVersion};
use crate::serialize::common::{group_by_device_component, Header, ObsRender};

fn header_json(config: &AgentConfig, header: &Header) -> Value {
    let mut map = Map::new();
    map.insert("instanceId".into(), json!(header.instance_id));
    map.insert("version".into(), json!(header.version));
    map.insert("sender".into(), json!(header.sender));
    map.insert("creationTime".into(), json!(header.creation_time.to_rfc3339()));
    if let Some(n) = header.buffer_size {
        map.insert("bufferSize".into(), json!(n));
    }
    if let Some(n) = header.asset_buffer_size {
        map.insert("assetBufferSize".into(), json!(n));
    }
    if let Some(n) = header.asset_count {
        map.insert("assetCount".into(), json!(n));
    }
    if let Some(n) = header.first_sequence {
        map.insert("firstSequence".into(), json!(n));
    }
    if let Some(n) = header.last_sequence {
        map.insert("lastSequence".into(), json!(n));
    }
    if let Some(n) = header.next_sequence {
        map.insert("nextSequence".into(), json!(n));
    }
    if config.device_model_change_time_supported() {
        if let Some(t) = header.device_model_change_time {
            map.insert("deviceModelChangeTime".into(), json!(t.to_rfc3339()));
        }
    }
    if config.asset_counts_supported() && !header.asset_counts.is_empty() {
        let counts: Map<String, Value> = header
            .asset_counts
            .iter()
            .map(|(t, c)| (t.clone(), json!(c)))
            .collect();
        map.insert("assetCounts".into(), Value::Object(counts));
    }
    Value::Object(map)
}

fn document_envelope(config: &AgentConfig, header: &Header, body_key: &str, body: Value) -> String {
    let doc = json!({
        header.family.root_element(): {
            "Header": header_json(config, header),
            body_key: body,
        }
    });
    if config.pretty {
        serde_json::to_string_pretty(&doc).unwrap_or_default()
    } else {
        doc.to_string()
    }
}

pub fn render_probe(config: &AgentConfig, header: &Header, devices: &[&Device]) -> String {
    let body: Vec<Value> = devices.iter().map(|d| device_json(d)).collect();
    document_envelope(config, header, "Devices", json!(body))
}

fn device_json(device: &Device) -> Value {
    json!({
        "Device": {
            "name": device.name,
            "uuid": device.uuid,
            "id": device.root.id,
            "Components": component_children_json(device, &device.root),
        }
    })
}

fn component_children_json(device: &Device, component: &mtc_model::Component) -> Vec<Value> {
    let mut out = Vec::new();
    for child in &component.children {
        let mut node = Map::new();
        node.insert("id".into(), json!(child.id));
        node.insert("name".into(), json!(child.name));
        let data_items: Vec<Value> = child
            .data_items
            .iter()
            .filter_map(|id| device.data_items.get(id))
            .map(|item| {
                json!({
                    "id": item.id,
                    "name": item.name,
                    "category": format!("{:?}", item.category).to_uppercase(),
                    "type": item.data_type,
                    "subType": item.sub_type,
                })
            })
            .collect();
        if !data_items.is_empty() {
            node.insert("DataItems".into(), json!(data_items));
        }
        let children = component_children_json(device, child);
        if !children.is_empty() {
            node.insert("Components".into(), json!(children));
        }
        let mut wrapper = Map::new();
        wrapper.insert(child.component_type.clone(), Value::Object(node));
        out.push(Value::Object(wrapper));
    }
    out
}

fn element_value(item: &ObsRender) -> Value {
    let mut obj = Map::new();
    obj.insert("dataItemId".into(), json!(item.data_item_id));
    obj.insert("timestamp".into(), json!(item.timestamp.to_rfc3339()));
    obj.insert("sequence".into(), json!(item.sequence));
    if let Some(name) = &item.data_item_name {
        obj.insert("name".into(), json!(name));
    }
    if let Some(sub_type) = &item.sub_type {
        obj.insert("subType".into(), json!(sub_type));
    }
    for (key, value) in &item.attrs {
        obj.insert(key.clone(), json!(value));
    }
    if let Some(entries) = &item.data_set {
        let rendered: Vec<Value> = entries
            .iter()
            .map(|e| json!({"key": e.key, "value": e.value, "removed": e.value.is_none()}))
            .collect();
        obj.insert("value".into(), json!(rendered));
    } else if let Some(rows) = &item.table {
        let rendered: Vec<Value> = rows
            .iter()
            .map(|r| {
                let cells: Map<String, Value> = r
                    .cells
                    .iter()
                    .map(|c| (c.key.clone(), json!(c.value)))
                    .collect();
                json!({"key": r.key, "cells": cells})
            })
            .collect();
        obj.insert("value".into(), json!(rendered));
    } else if let Some(vector) = &item.vector {
        // Render each component through `format_double` rather than handing
        // `Vec<f64>` straight to `serde_json`: serde_json silently turns
        // non-finite floats into JSON `null`, which would swallow the
        // NaN/Infinity string forms spec.md §4.4 requires.
        let rendered: Vec<Value> = vector.iter().map(|v| json!(mtc_model::Observation::format_double(*v))).collect();
        obj.insert("value".into(), json!(rendered));
    } else if let Some(text) = &item.text {
        obj.insert("value".into(), json!(text));
    } else {
        obj.insert("value".into(), Value::Null);
    }
    Value::Object(obj)
}

/// v1: each element is `{"ElementName": {...}}`, flat arrays per category.
fn render_streams_v1(config: &AgentConfig, header: &Header, items: Vec<ObsRender>) -> String {
    let devices: Vec<Value> = group_by_device_component(items)
        .into_iter()
        .map(|device| {
            let components: Vec<Value> = device
                .components
                .into_iter()
                .map(|component| {
                    let category = |label: &str, items: Vec<ObsRender>| -> Option<(String, Value)> {
                        if items.is_empty() {
                            return None;
                        }
                        let arr: Vec<Value> = items
                            .iter()
                            .map(|item| json!({ item.element_name.clone(): element_value(item) }))
                            .collect();
                        Some((label.to_owned(), json!(arr)))
                    };
                    let mut stream = Map::new();
                    stream.insert("component".into(), json!(component.component_type));
                    stream.insert("name".into(), json!(component.component_name));
                    stream.insert("componentId".into(), json!(component.component_id));
                    for (label, value) in [
                        category("Samples", component.samples),
                        category("Events", component.events),
                        category("Condition", component.condition),
                    ]
                    .into_iter()
                    .flatten()
                    {
                        stream.insert(label, value);
                    }
                    json!({ "ComponentStream": stream })
                })
                .collect();
            json!({
                "DeviceStream": {
                    "name": device.device_name,
                    "uuid": device.device_id,
                    "ComponentStreams": components,
                }
            })
        })
        .collect();
    document_envelope(config, header, "Streams", json!(devices))
}

/// v2: elements of the same name within a category are grouped under one
/// key holding an array, rather than one object per element (spec.md §4.4
/// "JSON v2 grouped-array dialect").
fn render_streams_v2(config: &AgentConfig, header: &Header, items: Vec<ObsRender>) -> String {
    let devices: Vec<Value> = group_by_device_component(items)
        .into_iter()
        .map(|device| {
            let components: Vec<Value> = device
                .components
                .into_iter()
                .map(|component| {
                    let category = |items: Vec<ObsRender>| -> Value {
                        let mut grouped: Vec<(String, Vec<Value>)> = Vec::new();
                        for item in &items {
                            match grouped.iter_mut().find(|(name, _)| name == &item.element_name) {
                                Some((_, values)) => values.push(element_value(item)),
                                None => grouped.push((item.element_name.clone(), vec![element_value(item)])),
                            }
                        }
                        let map: Map<String, Value> = grouped.into_iter().map(|(k, v)| (k, json!(v))).collect();
                        Value::Object(map)
                    };
                    let mut stream = Map::new();
                    stream.insert("component".into(), json!(component.component_type));
                    stream.insert("name".into(), json!(component.component_name));
                    stream.insert("componentId".into(), json!(component.component_id));
                    if !component.samples.is_empty() {
                        stream.insert("Samples".into(), category(component.samples));
                    }
                    if !component.events.is_empty() {
                        stream.insert("Events".into(), category(component.events));
                    }
                    if !component.condition.is_empty() {
                        stream.insert("Condition".into(), category(component.condition));
                    }
                    json!({ "ComponentStream": stream })
                })
                .collect();
            json!({
                "DeviceStream": {
                    "name": device.device_name,
                    "uuid": device.device_id,
                    "ComponentStreams": components,
                }
            })
        })
        .collect();
    document_envelope(config, header, "Streams", json!(devices))
}

pub fn render_streams(config: &AgentConfig, header: &Header, items: Vec<ObsRender>) -> String {
    match config.json_version {
        JsonVersion::V1 => render_streams_v1(config, header, items),
        JsonVersion::V2 => render_streams_v2(config, header, items),
    }
}

pub fn render_assets(config: &AgentConfig, header: &Header, assets: &[Asset]) -> String {
    let body: Vec<Value> = assets
        .iter()
        .map(|asset| {
            json!({
                asset.asset_type.clone(): {
                    "assetId": asset.id,
                    "deviceUuid": asset.device_uuid,
                    "timestamp": asset.timestamp.to_rfc3339(),
                    "removed": asset.removed,
                    "raw": asset.body,
                }
            })
        })
        .collect();
    document_envelope(config, header, "Assets", json!(body))
}

pub fn render_error(config: &AgentConfig, header: &Header, errors: &[AgentError]) -> String {
    let body: Vec<Value> = errors
        .iter()
        .map(|error| {
            let message = error.message.clone().unwrap_or_default();
            if config.per_variant_errors() {
                json!({ error.code.element_name(): error_variant_json(error, &message) })
            } else {
                json!({
                    "errorCode": error.code.wire_name(),
                    "value": message,
                })
            }
        })
        .collect();
    document_envelope(config, header, "Errors", json!(body))
}

/// schema >= 2.6 per-variant error object: mirrors `xml::render_error_variant`
/// field-for-field (spec.md §4.4 "Error serialization").
fn error_variant_json(error: &AgentError, message: &str) -> Value {
    let mut obj = Map::new();
    obj.insert("ErrorMessage".into(), json!(message));
    if let Some(uri) = &error.uri {
        obj.insert("URI".into(), json!(uri));
    }
    if let Some(request) = &error.request {
        obj.insert("Request".into(), json!(request));
    }
    match &error.detail {
        ErrorDetail::None => {}
        ErrorDetail::InvalidParameterValue { parameter, value, param_type, format } => {
            obj.insert(
                "QueryParameter".into(),
                json!({ "name": parameter, "Value": value, "Type": param_type, "Format": format }),
            );
        }
        ErrorDetail::OutOfRange { parameter, value, minimum, maximum } => {
            obj.insert(
                "QueryParameter".into(),
                json!({ "name": parameter, "Value": value, "Minimum": minimum, "Maximum": maximum }),
            );
        }
        ErrorDetail::AssetNotFound { asset_id } => {
            obj.insert("AssetId".into(), json!(asset_id));
        }
    }
    Value::Object(obj)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serialize::common::DocumentFamily;

    fn config(version: JsonVersion) -> AgentConfig {
        let mut cfg = AgentConfig::default();
        cfg.json_version = version;
        cfg
    }

    fn header(family: DocumentFamily, cfg: &AgentConfig) -> Header {
        Header::new(family, cfg, 1, "2.2.0")
    }

    fn sample_item() -> ObsRender {
        ObsRender {
            device_id: "uuid-1".to_owned(),
            device_name: "LinuxCNC".to_owned(),
            component_id: "ctrl".to_owned(),
            component_name: "controller".to_owned(),
            component_type: "Controller".to_owned(),
            category: mtc_model::Category::Event,
            element_name: "Line".to_owned(),
            data_item_id: "line1".to_owned(),
            data_item_name: Some("line".to_owned()),
            sub_type: None,
            sequence: 7,
            timestamp: chrono::Utc::now(),
            text: Some("204".to_owned()),
            attrs: Vec::new(),
            vector: None,
            data_set: None,
            table: None,
        }
    }

    #[test]
    fn v1_wraps_each_element_as_single_key_object() {
        let cfg = config(JsonVersion::V1);
        let json = render_streams_v1(&cfg, &header(DocumentFamily::Streams, &cfg), vec![sample_item()]);
        assert!(json.contains("\"Line\":{"));
        assert!(json.contains("\"Events\":["));
    }

    #[test]
    fn v2_groups_same_named_elements_under_one_array() {
        let cfg = config(JsonVersion::V2);
        let mut a = sample_item();
        a.sequence = 1;
        let mut b = sample_item();
        b.sequence = 2;
        let json = render_streams_v2(&cfg, &header(DocumentFamily::Streams, &cfg), vec![a, b]);
        assert!(json.contains("\"Line\":["));
    }

    #[test]
    fn render_error_carries_error_code_and_message() {
        let cfg = config(JsonVersion::V2);
        let err = mtc_model::AgentError::no_device("X");
        let json = render_error(&cfg, &header(DocumentFamily::Error, &cfg), &[err]);
        assert!(json.contains("\"errorCode\":\"NO_DEVICE\""));
    }

    #[test]
    fn render_error_per_variant_includes_query_parameter_children() {
        let mut cfg = config(JsonVersion::V2);
        cfg.schema_version = "2.6".to_owned();
        let err = mtc_model::AgentError::invalid_parameter_value("interval", "NON_INTEGER", "integer", "int32");
        let json = render_error(&cfg, &header(DocumentFamily::Error, &cfg), &[err]);
        assert!(json.contains("\"InvalidParameterValue\""));
        assert!(json.contains("\"ErrorMessage\""));
        assert!(json.contains("\"Type\":\"integer\""));
        assert!(json.contains("\"Format\":\"int32\""));
    }
}
