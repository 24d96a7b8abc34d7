//! Resolves the `path` query parameter and device-name path segments into a
//! concrete set of data-item ids to pass to the buffer (spec.md §4.3
//! "Recognised query options ... path").
//!
//! The original agent accepts a small XPath-like grammar
//! (`//Device[@name='X']//DataItem[@type='Y']`); this module supports the
//! practical subset actually exercised by the routing table: an optional
//! leading `//Device[@name='...']` or `//Device[@uuid='...']` clause
//! narrowing to one device, followed by an optional `//DataItem[@type='...']`
//! or `//DataItem[@name='...']` clause narrowing by attribute. Anything that
//! doesn't parse is reported as `INVALID_XPATH` (spec.md §7) rather than
//! silently ignored.

use std::collections::HashSet;

use mtc_model::{AgentError, DataItemId, DeviceModel};

/// The data items selected by a device-tree filter expression, or "no
/// expression" meaning "every data item the device(s) in scope declare".
pub fn resolve_filter(
    model: &DeviceModel,
    device: Option<&str>,
    path: Option<&str>,
) -> Result<HashSet<DataItemId>, AgentError> {
    let devices: Vec<_> = match device {
        Some(name) => {
            let dev = model.find(name).ok_or_else(|| AgentError::no_device(name))?;
            vec![dev]
        }
        None => model.devices.iter().collect(),
    };

    let Some(path) = path else {
        return Ok(devices.iter().flat_map(|d| d.all_data_item_ids()).collect());
    };

    let clause = parse_path(path).ok_or_else(|| AgentError::invalid_xpath(path))?;

    let scoped_devices: Vec<_> = match &clause.device_selector {
        Some(Selector::Name(name)) => devices.into_iter().filter(|d| &d.name == name).collect(),
        Some(Selector::Uuid(uuid)) => devices.into_iter().filter(|d| &d.uuid == uuid).collect(),
        None => devices,
    };

    let mut out = HashSet::new();
    for device in scoped_devices {
        for id in device.all_data_item_ids() {
            let Some(item) = device.data_items.get(&id) else {
                continue;
            };
            let matches = match &clause.data_item_selector {
                Some(Selector::Name(name)) => item.name.as_deref() == Some(name.as_str()),
                Some(Selector::Uuid(type_)) => item.data_type == *type_,
                None => true,
            };
            if matches {
                out.insert(id);
            }
        }
    }

    if out.is_empty() {
        return Err(AgentError::invalid_xpath(path));
    }
    Ok(out)
}

enum Selector {
    Name(String),
    /// Reused for both `@uuid` (device) and `@type` (data item) clauses —
    /// both select on a single string attribute.
    Uuid(String),
}

struct PathClause {
    device_selector: Option<Selector>,
    data_item_selector: Option<Selector>,
}

/// Parse the practical subset of the path grammar described above. Returns
/// `None` (→ `INVALID_XPATH`) for anything else, including empty segments.
fn parse_path(path: &str) -> Option<PathClause> {
    let mut device_selector = None;
    let mut data_item_selector = None;

    for segment in path.split("//").filter(|s| !s.is_empty()) {
        let (tag, attr) = segment.split_once('[')?;
        let attr = attr.strip_suffix(']')?;
        let (key, value) = attr.split_once('=')?;
        let key = key.trim().trim_start_matches('@');
        let value = value.trim().trim_matches(|c| c == '\'' || c == '"');

        match tag {
            "Device" => {
                device_selector = Some(match key {
                    "name" => Selector::Name(value.to_owned()),
                    "uuid" => Selector::Uuid(value.to_owned()),
                    _ => return None,
                });
            }
            "DataItem" => {
                data_item_selector = Some(match key {
                    "name" => Selector::Name(value.to_owned()),
                    "type" => Selector::Uuid(value.to_owned()),
                    _ => return None,
                });
            }
            _ => return None,
        }
    }

    if device_selector.is_none() && data_item_selector.is_none() {
        return None;
    }

    Some(PathClause {
        device_selector,
        data_item_selector,
    })
}
