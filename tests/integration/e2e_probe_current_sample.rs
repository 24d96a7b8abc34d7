//! End-to-end coverage of the read-only document family: `probe`,
//! `current` (with and without `at`), and `sample` (with `from`/`count`),
//! driven against an in-process agent the way
//! `e2e_forwarder_server_receiver.rs` drives an in-process server.

use agent::assets::InMemoryAssetStorage;
use agent::config::AgentConfig;
use agent::state::AppState;
use chrono::Utc;
use mtc_filecache::FileCache;
use mtc_model::{Category, Component, Converter, DataItem, Device, DeviceModel, FilterSpec, ObservationValue, Representation};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

fn data_item(id: &str, name: &str, category: Category, data_type: &str, component_id: &str) -> DataItem {
    DataItem {
        id: id.to_owned(),
        name: Some(name.to_owned()),
        category,
        data_type: data_type.to_owned(),
        sub_type: None,
        representation: Representation::Value,
        component_id: component_id.to_owned(),
        converter: None::<Converter>,
        filter: None::<FilterSpec>,
        initial_value: None,
        reset_trigger: None,
    }
}

fn mill_device_model() -> DeviceModel {
    let mut data_items = HashMap::new();
    data_items.insert("avail".to_owned(), data_item("avail", "avail", Category::Event, "AVAILABILITY", "root"));
    data_items.insert("xact".to_owned(), data_item("xact", "Xact", Category::Sample, "POSITION", "axes"));

    let device = Device {
        uuid: "mill-1".to_owned(),
        name: "Mill".to_owned(),
        root: Component {
            id: "root".to_owned(),
            name: Some("Mill".to_owned()),
            component_type: "Device".to_owned(),
            data_items: vec!["avail".to_owned()],
            references: vec![],
            children: vec![Component {
                id: "axes".to_owned(),
                name: Some("axes".to_owned()),
                component_type: "Axes".to_owned(),
                data_items: vec!["xact".to_owned()],
                references: vec![],
                children: vec![],
            }],
        },
        data_items,
    };
    DeviceModel { devices: vec![device] }
}

async fn start_agent(devices: DeviceModel) -> (SocketAddr, AppState) {
    let config = AgentConfig::default();
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
async fn probe_lists_every_device_and_scopes_by_name() {
    let (addr, _state) = start_agent(mill_device_model()).await;
    let client = reqwest::Client::new();

    let body = client.get(format!("http://{addr}/probe")).send().await.unwrap().text().await.unwrap();
    assert!(body.contains("Mill"));
    assert!(body.contains("mill-1"));

    let scoped = client.get(format!("http://{addr}/Mill/probe")).send().await.unwrap();
    assert_eq!(scoped.status(), 200);
    let scoped_body = scoped.text().await.unwrap();
    assert!(scoped_body.contains("Mill"));

    let root = client.get(format!("http://{addr}/")).send().await.unwrap();
    assert_eq!(root.status(), 200);
}

#[tokio::test]
async fn probe_unknown_device_reports_no_device_error() {
    let (addr, _state) = start_agent(mill_device_model()).await;
    let response = reqwest::get(format!("http://{addr}/Bogus/probe")).await.unwrap();
    assert_eq!(response.status(), 404);
    let body = response.text().await.unwrap();
    assert!(body.contains("NO_DEVICE"));
}

#[tokio::test]
async fn current_reflects_the_latest_checkpoint_after_an_insert() {
    let (addr, state) = start_agent(mill_device_model()).await;
    state.buffer.add("avail".to_owned(), Utc::now(), Category::Event, ObservationValue::Scalar("AVAILABLE".to_owned())).await;

    let body = reqwest::get(format!("http://{addr}/current")).await.unwrap().text().await.unwrap();
    assert!(body.contains("AVAILABLE"));
}

#[tokio::test]
async fn current_at_a_past_sequence_reconstructs_that_checkpoint() {
    let (addr, state) = start_agent(mill_device_model()).await;
    let seq0 = state.buffer.add("avail".to_owned(), Utc::now(), Category::Event, ObservationValue::Scalar("UNAVAILABLE".to_owned())).await;
    state.buffer.add("avail".to_owned(), Utc::now(), Category::Event, ObservationValue::Scalar("AVAILABLE".to_owned())).await;

    let url = format!("http://{addr}/current?at={seq0}");
    let body = reqwest::get(url).await.unwrap().text().await.unwrap();
    assert!(body.contains("UNAVAILABLE"));
}

#[tokio::test]
async fn sample_from_a_sequence_returns_only_observations_at_or_after_it() {
    let (addr, state) = start_agent(mill_device_model()).await;
    state.buffer.add("xact".to_owned(), Utc::now(), Category::Sample, ObservationValue::Scalar("1.0".to_owned())).await;
    let second = state.buffer.add("xact".to_owned(), Utc::now(), Category::Sample, ObservationValue::Scalar("2.0".to_owned())).await;
    state.buffer.add("xact".to_owned(), Utc::now(), Category::Sample, ObservationValue::Scalar("3.0".to_owned())).await;

    let url = format!("http://{addr}/sample?from={second}");
    let body = reqwest::get(url).await.unwrap().text().await.unwrap();
    assert!(!body.contains("1.0"));
    assert!(body.contains("2.0"));
    assert!(body.contains("3.0"));
}

#[tokio::test]
async fn sample_from_rejects_a_sequence_outside_the_buffer_window() {
    let (addr, _state) = start_agent(mill_device_model()).await;
    let response = reqwest::get(format!("http://{addr}/sample?from=999999")).await.unwrap();
    assert_eq!(response.status(), 400);
    let body = response.text().await.unwrap();
    assert!(body.contains("OUT_OF_RANGE"));
}
