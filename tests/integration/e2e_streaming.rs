//! End-to-end coverage of long-poll streaming: a `sample` request with
//! `interval` gets a `multipart/mixed` body that emits a heartbeat part
//! when nothing matches, wakes immediately on a new observation, and can
//! be torn down via `/cancel`.

use agent::assets::InMemoryAssetStorage;
use agent::config::AgentConfig;
use agent::state::AppState;
use chrono::Utc;
use futures_util::StreamExt;
use mtc_filecache::FileCache;
use mtc_model::{Category, Component, Converter, DataItem, Device, DeviceModel, FilterSpec, ObservationValue, Representation};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

fn line_device_model() -> DeviceModel {
    let mut data_items = HashMap::new();
    data_items.insert(
        "line".to_owned(),
        DataItem {
            id: "line".to_owned(),
            name: Some("line".to_owned()),
            category: Category::Event,
            data_type: "LINE".to_owned(),
            sub_type: None,
            representation: Representation::Value,
            component_id: "ctrl".to_owned(),
            converter: None::<Converter>,
            filter: None::<FilterSpec>,
            initial_value: None,
            reset_trigger: None,
        },
    );
    let device = Device {
        uuid: "lathe-1".to_owned(),
        name: "Lathe".to_owned(),
        root: Component {
            id: "root".to_owned(),
            name: Some("Lathe".to_owned()),
            component_type: "Device".to_owned(),
            data_items: vec![],
            references: vec![],
            children: vec![Component {
                id: "ctrl".to_owned(),
                name: Some("controller".to_owned()),
                component_type: "Controller".to_owned(),
                data_items: vec!["line".to_owned()],
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
async fn sample_stream_delivers_an_inserted_observation_as_a_multipart_chunk() {
    let (addr, state) = start_agent(line_device_model()).await;

    let url = format!("http://{addr}/Lathe/sample?interval=50&heartbeat=20000");
    let response = reqwest::get(url).await.unwrap();
    assert_eq!(response.status(), 200);
    let content_type = response.headers().get("content-type").unwrap().to_str().unwrap().to_owned();
    assert!(content_type.starts_with("multipart/mixed; boundary="));

    let mut stream = response.bytes_stream();

    state.buffer.add("line".to_owned(), Utc::now(), Category::Event, ObservationValue::Scalar("204".to_owned())).await;

    let chunk = tokio::time::timeout(Duration::from_secs(2), stream.next())
        .await
        .expect("a chunk should arrive well before the heartbeat timeout")
        .expect("io error")
        .unwrap();
    let text = String::from_utf8_lossy(&chunk);
    assert!(text.contains("204"));
}

#[tokio::test]
async fn cancel_closes_an_in_flight_stream() {
    let (addr, _state) = start_agent(line_device_model()).await;
    let request_id = "cancel-me-1";

    let url = format!("http://{addr}/Lathe/sample?interval=50&heartbeat=30000&requestId={request_id}");
    let response = reqwest::get(url).await.unwrap();
    let mut stream = response.bytes_stream();

    // Let the session register before asking the agent to cancel it.
    tokio::time::sleep(Duration::from_millis(50)).await;
    let cancel_url = format!("http://{addr}/cancel/id={request_id}");
    let cancel_response = reqwest::get(cancel_url).await.unwrap();
    assert_eq!(cancel_response.status(), 200);

    let closing = tokio::time::timeout(Duration::from_secs(2), stream.next())
        .await
        .expect("cancellation should close the stream promptly")
        .expect("io error")
        .unwrap();
    assert!(closing.ends_with(b"--\r\n"));
    assert!(stream.next().await.is_none());
}

#[tokio::test]
async fn current_stream_re_renders_the_latest_checkpoint_every_interval() {
    let (addr, state) = start_agent(line_device_model()).await;
    state.buffer.add("line".to_owned(), Utc::now(), Category::Event, ObservationValue::Scalar("100".to_owned())).await;

    let url = format!("http://{addr}/Lathe/current?interval=30");
    let response = reqwest::get(url).await.unwrap();
    let mut stream = response.bytes_stream();

    let first = tokio::time::timeout(Duration::from_secs(1), stream.next()).await.unwrap().unwrap().unwrap();
    assert!(String::from_utf8_lossy(&first).contains("100"));

    state.buffer.add("line".to_owned(), Utc::now(), Category::Event, ObservationValue::Scalar("200".to_owned())).await;
    let second = tokio::time::timeout(Duration::from_secs(1), stream.next()).await.unwrap().unwrap().unwrap();
    assert!(String::from_utf8_lossy(&second).contains("200"));
}
