//! Shared application state (teacher analog: `services/server/src/state.rs`
//! `AppState`): the buffer, device model, file cache, asset storage, and
//! streaming session registry every handler is given a clone of.

use std::sync::{atomic::AtomicU64, Arc, RwLock};

use chrono::{DateTime, Utc};
use mtc_buffer::SharedBuffer;
use mtc_filecache::FileCache;
use mtc_model::DeviceModel;
use mtc_router::{RoutingTable, SessionRegistry};

use crate::assets::AssetStorage;
use crate::config::AgentConfig;
use crate::routes::{build_routing_table, RouteKind};

/// Process-lifetime identity fields every response header carries (spec.md
/// §4.4 "Header"). `instance_id` and `start_time` are fixed at process
/// start; `device_model_change_time` updates on every device-tree reload.
pub struct Instance {
    pub instance_id: u64,
    pub start_time: DateTime<Utc>,
    pub version: String,
    device_model_change_time: RwLock<DateTime<Utc>>,
}

impl Instance {
    pub fn new(version: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            instance_id: now.timestamp() as u64,
            start_time: now,
            version: version.into(),
            device_model_change_time: RwLock::new(now),
        }
    }

    pub fn device_model_change_time(&self) -> DateTime<Utc> {
        *self.device_model_change_time.read().unwrap()
    }

    pub fn touch_device_model(&self) {
        *self.device_model_change_time.write().unwrap() = Utc::now();
    }
}

/// The device tree is copy-on-reload with shared ownership (spec.md §3
/// "Device / Component tree" lifecycle): readers take an `Arc` clone and old
/// generations stay alive until the last holder drops it.
#[derive(Clone, Default)]
pub struct DeviceModelHandle {
    inner: Arc<RwLock<Arc<DeviceModel>>>,
}

impl DeviceModelHandle {
    pub fn new(model: DeviceModel) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Arc::new(model))),
        }
    }

    pub fn load(&self) -> Arc<DeviceModel> {
        self.inner.read().unwrap().clone()
    }

    pub fn store(&self, model: DeviceModel) {
        *self.inner.write().unwrap() = Arc::new(model);
    }
}

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AgentConfig>,
    pub buffer: SharedBuffer,
    pub devices: DeviceModelHandle,
    pub assets: Arc<dyn AssetStorage>,
    pub files: Arc<FileCache>,
    pub sessions: SessionRegistry,
    pub instance: Arc<Instance>,
    pub routes: Arc<RoutingTable<RouteKind>>,
    /// Running total of observations accepted, purely informational
    /// (surfaces in logs, not part of the wire protocol).
    pub observations_received: Arc<AtomicU64>,
}

impl AppState {
    /// `files` is built and registered by the caller (schema/stylesheet
    /// paths vary by deployment) before being handed over for good.
    pub fn new(config: AgentConfig, devices: DeviceModel, assets: Arc<dyn AssetStorage>, files: FileCache) -> Self {
        let buffer = SharedBuffer::with_checkpoint_freq(config.buffer_size, config.checkpoint_frequency);
        Self {
            config: Arc::new(config),
            buffer,
            devices: DeviceModelHandle::new(devices),
            assets,
            files: Arc::new(files),
            sessions: SessionRegistry::new(),
            instance: Arc::new(Instance::new(env!("CARGO_PKG_VERSION"))),
            routes: Arc::new(build_routing_table()),
            observations_received: Arc::new(AtomicU64::new(0)),
        }
    }
}
