//! Device / component tree and data item definitions (spec.md §3, consumed
//! not owned by this core — the device-XML loader that builds these trees
//! lives outside this crate's scope).

use std::collections::HashMap;

use crate::observation::{Category, DataItemId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Representation {
    Value,
    TimeSeries,
    DataSet,
    Table,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Converter {
    pub scale: f64,
    pub offset: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FilterSpec {
    pub minimum_delta: Option<f64>,
    pub period: Option<f64>,
}

/// A named, typed signal channel on a component (spec.md §3 "DataItem").
#[derive(Debug, Clone, PartialEq)]
pub struct DataItem {
    pub id: DataItemId,
    pub name: Option<String>,
    pub category: Category,
    pub data_type: String,
    pub sub_type: Option<String>,
    pub representation: Representation,
    pub component_id: String,
    pub converter: Option<Converter>,
    pub filter: Option<FilterSpec>,
    pub initial_value: Option<String>,
    pub reset_trigger: Option<String>,
}

/// One node in a device's component tree. Holds ids into the device's data
/// item arena rather than direct references, breaking the component/data-item
/// cycle the original models with back-pointers (spec.md §9 design note).
#[derive(Debug, Clone, PartialEq)]
pub struct Component {
    pub id: String,
    pub name: Option<String>,
    pub component_type: String,
    pub data_items: Vec<DataItemId>,
    /// Data items this component references but does not own (MTConnect
    /// `<References>`); resolved against the owning device's arena.
    pub references: Vec<DataItemId>,
    pub children: Vec<Component>,
}

impl Component {
    /// Every data item id reachable from this node, including references,
    /// depth-first in declaration order.
    pub fn data_item_ids(&self) -> Vec<DataItemId> {
        let mut out = self.data_items.clone();
        out.extend(self.references.iter().cloned());
        for child in &self.children {
            out.extend(child.data_item_ids());
        }
        out
    }
}

/// A device: a named, uuid-identified root component plus the id-keyed
/// arena of every data item declared anywhere in its tree.
#[derive(Debug, Clone, PartialEq)]
pub struct Device {
    pub uuid: String,
    pub name: String,
    pub root: Component,
    pub data_items: HashMap<DataItemId, DataItem>,
}

impl Device {
    /// `true` if `name_or_uuid` matches this device's name or uuid.
    pub fn matches(&self, name_or_uuid: &str) -> bool {
        self.uuid == name_or_uuid || self.name == name_or_uuid
    }

    pub fn all_data_item_ids(&self) -> Vec<DataItemId> {
        self.root.data_item_ids()
    }
}

/// The full set of devices currently loaded. Rebuilt (never mutated in
/// place) on every config reload; old generations are kept alive by
/// `Arc` for as long as an in-flight request still references them.
#[derive(Debug, Clone, Default)]
pub struct DeviceModel {
    pub devices: Vec<Device>,
}

impl DeviceModel {
    pub fn find(&self, name_or_uuid: &str) -> Option<&Device> {
        self.devices.iter().find(|d| d.matches(name_or_uuid))
    }

    pub fn data_item(&self, id: &str) -> Option<&DataItem> {
        self.devices.iter().find_map(|d| d.data_items.get(id))
    }

    /// Every data item id across every device, in device/declaration order.
    pub fn all_data_item_ids(&self) -> Vec<DataItemId> {
        self.devices.iter().flat_map(Device::all_data_item_ids).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_device() -> Device {
        let mut data_items = HashMap::new();
        data_items.insert(
            "dtop1".to_owned(),
            DataItem {
                id: "dtop1".to_owned(),
                name: Some("avail".to_owned()),
                category: Category::Event,
                data_type: "AVAILABILITY".to_owned(),
                sub_type: None,
                representation: Representation::Value,
                component_id: "root".to_owned(),
                converter: None,
                filter: None,
                initial_value: None,
                reset_trigger: None,
            },
        );
        data_items.insert(
            "line1".to_owned(),
            DataItem {
                id: "line1".to_owned(),
                name: Some("line".to_owned()),
                category: Category::Event,
                data_type: "LINE".to_owned(),
                sub_type: None,
                representation: Representation::Value,
                component_id: "ctrl".to_owned(),
                converter: None,
                filter: None,
                initial_value: None,
                reset_trigger: None,
            },
        );
        Device {
            uuid: "uuid-1".to_owned(),
            name: "LinuxCNC".to_owned(),
            root: Component {
                id: "root".to_owned(),
                name: Some("LinuxCNC".to_owned()),
                component_type: "Device".to_owned(),
                data_items: vec!["dtop1".to_owned()],
                references: vec![],
                children: vec![Component {
                    id: "ctrl".to_owned(),
                    name: Some("controller".to_owned()),
                    component_type: "Controller".to_owned(),
                    data_items: vec!["line1".to_owned()],
                    references: vec![],
                    children: vec![],
                }],
            },
            data_items,
        }
    }

    #[test]
    fn matches_by_name_or_uuid() {
        let device = sample_device();
        assert!(device.matches("LinuxCNC"));
        assert!(device.matches("uuid-1"));
        assert!(!device.matches("other"));
    }

    #[test]
    fn all_data_item_ids_walks_tree_depth_first() {
        let device = sample_device();
        assert_eq!(device.all_data_item_ids(), vec!["dtop1".to_owned(), "line1".to_owned()]);
    }

    #[test]
    fn device_model_finds_data_item_across_devices() {
        let model = DeviceModel {
            devices: vec![sample_device()],
        };
        assert!(model.find("LinuxCNC").is_some());
        assert!(model.data_item("line1").is_some());
        assert!(model.data_item("missing").is_none());
    }
}
