//! Asset storage: treated as an opaque query interface (spec.md §1 "out of
//! scope: Asset storage persistence"). [`AssetStorage`] is the trait
//! boundary the handlers code against; [`InMemoryAssetStorage`] is the
//! default in-process implementation used by the service binary and tests.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};

/// A long-lived entity reported alongside observations (spec.md glossary
/// "Asset"). The core doesn't interpret asset content — it stores and
/// serves whatever body the device/adapter reported, tagged by type.
#[derive(Debug, Clone, PartialEq)]
pub struct Asset {
    pub id: String,
    pub asset_type: String,
    pub device_uuid: String,
    pub timestamp: DateTime<Utc>,
    pub removed: bool,
    /// Raw inner body as received (already-serialized XML/JSON fragment);
    /// the core passes it through rather than parsing it.
    pub body: String,
}

pub trait AssetStorage: Send + Sync {
    fn get(&self, id: &str) -> Option<Asset>;
    fn insert(&self, asset: Asset);
    fn remove(&self, id: &str) -> bool;
    fn remove_all(&self, device_uuid: Option<&str>, asset_type: Option<&str>) -> u64;
    /// All non-removed assets, most-recently-inserted first, optionally
    /// filtered by device/type, capped at `count` (0 = unbounded).
    fn list(&self, device_uuid: Option<&str>, asset_type: Option<&str>, count: u64) -> Vec<Asset>;
    fn count(&self, asset_type: Option<&str>) -> u64;
}

#[derive(Default)]
pub struct InMemoryAssetStorage {
    // Insertion-ordered so `list` can return most-recent-first cheaply.
    order: RwLock<Vec<String>>,
    by_id: RwLock<HashMap<String, Asset>>,
}

impl InMemoryAssetStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AssetStorage for InMemoryAssetStorage {
    fn get(&self, id: &str) -> Option<Asset> {
        self.by_id.read().unwrap().get(id).cloned()
    }

    fn insert(&self, asset: Asset) {
        let mut by_id = self.by_id.write().unwrap();
        let mut order = self.order.write().unwrap();
        if !by_id.contains_key(&asset.id) {
            order.push(asset.id.clone());
        }
        by_id.insert(asset.id.clone(), asset);
    }

    fn remove(&self, id: &str) -> bool {
        match self.by_id.write().unwrap().get_mut(id) {
            Some(asset) if !asset.removed => {
                asset.removed = true;
                true
            }
            _ => false,
        }
    }

    fn remove_all(&self, device_uuid: Option<&str>, asset_type: Option<&str>) -> u64 {
        let mut by_id = self.by_id.write().unwrap();
        let mut removed = 0;
        for asset in by_id.values_mut() {
            if asset.removed {
                continue;
            }
            let device_ok = device_uuid.map_or(true, |d| asset.device_uuid == d);
            let type_ok = asset_type.map_or(true, |t| asset.asset_type == t);
            if device_ok && type_ok {
                asset.removed = true;
                removed += 1;
            }
        }
        removed
    }

    fn list(&self, device_uuid: Option<&str>, asset_type: Option<&str>, count: u64) -> Vec<Asset> {
        let order = self.order.read().unwrap();
        let by_id = self.by_id.read().unwrap();
        let limit = if count == 0 { usize::MAX } else { count as usize };
        order
            .iter()
            .rev()
            .filter_map(|id| by_id.get(id))
            .filter(|a| !a.removed)
            .filter(|a| device_uuid.map_or(true, |d| a.device_uuid == d))
            .filter(|a| asset_type.map_or(true, |t| a.asset_type == t))
            .take(limit)
            .cloned()
            .collect()
    }

    fn count(&self, asset_type: Option<&str>) -> u64 {
        self.by_id
            .read()
            .unwrap()
            .values()
            .filter(|a| !a.removed)
            .filter(|a| asset_type.map_or(true, |t| a.asset_type == t))
            .count() as u64
    }
}
