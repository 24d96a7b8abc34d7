//! End-to-end coverage of the loopback observation source: `PUT`/`POST`
//! against a device (or the bare root) applies `key=value` pairs to the
//! buffer, the permission gate rejects disallowed peers, and an unknown
//! key reports `INVALID_REQUEST` without losing the keys that did resolve.

use agent::assets::InMemoryAssetStorage;
use agent::config::AgentConfig;
use agent::state::AppState;
use mtc_filecache::FileCache;
use mtc_model::{Category, Component, Converter, DataItem, Device, DeviceModel, FilterSpec, Representation};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

fn item(id: &str, name: &str, category: Category, data_type: &str) -> DataItem {
    DataItem {
        id: id.to_owned(),
        name: Some(name.to_owned()),
        category,
        data_type: data_type.to_owned(),
        sub_type: None,
        representation: Representation::Value,
        component_id: "ctrl".to_owned(),
        converter: None::<Converter>,
        filter: None::<FilterSpec>,
        initial_value: None,
        reset_trigger: None,
    }
}

fn linuxcnc_device_model() -> DeviceModel {
    let mut data_items = HashMap::new();
    data_items.insert("line".to_owned(), item("line", "line", Category::Event, "LINE"));
    data_items.insert("cond".to_owned(), item("cond", "system_cond", Category::Condition, "SYSTEM"));
    let device = Device {
        uuid: "uuid-1".to_owned(),
        name: "LinuxCNC".to_owned(),
        root: Component {
            id: "root".to_owned(),
            name: Some("LinuxCNC".to_owned()),
            component_type: "Device".to_owned(),
            data_items: vec![],
            references: vec![],
            children: vec![Component {
                id: "ctrl".to_owned(),
                name: Some("controller".to_owned()),
                component_type: "Controller".to_owned(),
                data_items: vec!["line".to_owned(), "cond".to_owned()],
                references: vec![],
                children: vec![],
            }],
        },
        data_items,
    };
    DeviceModel { devices: vec![device] }
}

async fn start_agent(devices: DeviceModel, allow_put: bool) -> (SocketAddr, AppState) {
    let config = AgentConfig {
        allow_put,
        ..AgentConfig::default()
    };
    let assets: Arc<dyn agent::assets::AssetStorage> = Arc::new(InMemoryAssetStorage::default());
    let files = FileCache::new(config.max_cached_file_size, config.min_compress_file_size);
    let state = AppState::new(config, devices, assets, files);
    let router = agent::build_router(state.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("failed to bind agent");
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router.into_make_service_with_connect_info::<SocketAddr>())
            .await
            .expect("agent error");
    });
    tokio::time::sleep(Duration::from_millis(20)).await;
    (addr, state)
}

#[tokio::test]
async fn put_on_a_named_device_applies_and_is_visible_in_current() {
    let (addr, _state) = start_agent(linuxcnc_device_model(), true).await;
    let client = reqwest::Client::new();

    let response = client
        .put(format!("http://{addr}/LinuxCNC"))
        .body("line=204")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let current = client.get(format!("http://{addr}/LinuxCNC/current")).send().await.unwrap().text().await.unwrap();
    assert!(current.contains("204"));
}

#[tokio::test]
async fn put_without_put_permission_is_rejected() {
    let (addr, _state) = start_agent(linuxcnc_device_model(), false).await;
    let response = reqwest::Client::new().put(format!("http://{addr}/LinuxCNC")).body("line=1").send().await.unwrap();
    assert_eq!(response.status(), 400);
    let body = response.text().await.unwrap();
    assert!(body.contains("UNAUTHORIZED"));
}

#[tokio::test]
async fn put_with_an_unknown_key_reports_invalid_request_but_still_applies_known_keys() {
    let (addr, _state) = start_agent(linuxcnc_device_model(), true).await;
    let client = reqwest::Client::new();

    let response = client
        .put(format!("http://{addr}/LinuxCNC"))
        .body("line=300&bogus_key=1")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
    let body = response.text().await.unwrap();
    assert!(body.contains("INVALID_REQUEST"));

    let current = client.get(format!("http://{addr}/LinuxCNC/current")).send().await.unwrap().text().await.unwrap();
    assert!(current.contains("300"));
}

#[tokio::test]
async fn put_a_fault_condition_then_clearing_it_empties_the_active_list() {
    let (addr, _state) = start_agent(linuxcnc_device_model(), true).await;
    let client = reqwest::Client::new();

    client
        .put(format!("http://{addr}/LinuxCNC"))
        .body("system_cond=FAULT|404|1|HIGH|spindle overload")
        .send()
        .await
        .unwrap();
    let faulted = client.get(format!("http://{addr}/LinuxCNC/current")).send().await.unwrap().text().await.unwrap();
    assert!(faulted.contains("Fault"));
    assert!(faulted.contains("spindle overload"));

    client.put(format!("http://{addr}/LinuxCNC")).body("system_cond=NORMAL").send().await.unwrap();
    let cleared = client.get(format!("http://{addr}/LinuxCNC/current")).send().await.unwrap().text().await.unwrap();
    assert!(cleared.contains("Normal"));
    assert!(!cleared.contains("spindle overload"));
}
