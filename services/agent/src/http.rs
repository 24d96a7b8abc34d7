//! The single HTTP entry point (spec.md §4.3): every request lands in
//! [`dispatch`], which hands off to [`mtc_router::RoutingTable`] for
//! matching instead of axum's own route tree, so dispatch keeps the
//! registration-order-wins semantics §4.3 requires.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context as TaskContext, Poll};

use axum::body::{Body, Bytes};
use axum::extract::{ConnectInfo, State};
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use futures_util::{Stream, StreamExt};
use mtc_model::{AgentError, DeviceModel};
use mtc_router::{ParamValue, StreamSession, Verb};

use crate::auth::put_allowed;
use crate::config::{AgentConfig, Format};
use crate::device_filter::resolve_filter;
use crate::error_response::{document_response, error_response, ErrorDocument};
use crate::loopback;
use crate::routes::RouteKind;
use crate::serialize::common::{render_checkpoint, render_observations, DocumentFamily, Header};
use crate::serialize::{json, xml};
use crate::state::AppState;
use crate::streaming::{self, StreamContext};

fn verb_from_method(method: &Method) -> Option<Verb> {
    match *method {
        Method::GET => Some(Verb::Get),
        Method::PUT => Some(Verb::Put),
        Method::POST => Some(Verb::Post),
        Method::DELETE => Some(Verb::Delete),
        _ => None,
    }
}

/// Minimal `application/x-www-form-urlencoded`-style decoder: `+` becomes a
/// space, `%XX` becomes the matching byte. There's no percent-decoding
/// crate in this dependency stack, and query values here are almost always
/// plain tokens, so this is deliberately small rather than a full decoder.
fn percent_decode(raw: &str) -> String {
    let bytes = raw.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b'%' if i + 2 < bytes.len() => {
                let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).ok().and_then(|s| u8::from_str_radix(s, 16).ok());
                match hex {
                    Some(byte) => {
                        out.push(byte);
                        i += 3;
                    }
                    None => {
                        out.push(bytes[i]);
                        i += 1;
                    }
                }
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn parse_query(raw: &str) -> HashMap<String, String> {
    raw.split('&')
        .filter(|pair| !pair.is_empty())
        .filter_map(|pair| {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            Some((percent_decode(key), percent_decode(value)))
        })
        .collect()
}

/// spec.md §4.3 "Content negotiation": explicit `format` query param, then
/// the first recognised `Accept` suffix, then xml.
fn negotiate_format(raw_query: &HashMap<String, String>, headers: &HeaderMap) -> Format {
    if let Some(fmt) = raw_query.get("format") {
        match fmt.to_ascii_lowercase().as_str() {
            "json" => return Format::Json,
            "xml" => return Format::Xml,
            _ => {}
        }
    }
    if let Some(accept) = headers.get(axum::http::header::ACCEPT).and_then(|v| v.to_str().ok()) {
        let accept = accept.to_ascii_lowercase();
        if accept.contains("json") {
            return Format::Json;
        }
        if accept.contains("xml") {
            return Format::Xml;
        }
    }
    Format::Xml
}

fn header_for(family: DocumentFamily, state: &AppState) -> Header {
    Header::new(family, &state.config, state.instance.instance_id, &state.instance.version)
}

fn render_document(config: &AgentConfig, header: &Header, format: Format, family: DocumentFamily, items: Vec<crate::serialize::common::ObsRender>) -> String {
    let _ = family;
    match format {
        Format::Xml => xml::render_streams(config, header, items),
        Format::Json => json::render_streams(config, header, items),
    }
}

fn client_error(error: AgentError) -> Response {
    error_response(&AgentConfig::default(), &Header::new(DocumentFamily::Error, &AgentConfig::default(), 0, "0.0.0"), Format::Xml, error)
}

/// The axum fallback handler every route funnels through (see `lib.rs`).
pub async fn dispatch(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let Some(verb) = verb_from_method(&method) else {
        return client_error(AgentError::invalid_uri(uri.path()));
    };
    let raw_query = parse_query(uri.query().unwrap_or(""));
    let format = negotiate_format(&raw_query, &headers);

    let matched = match state.routes.dispatch(verb, uri.path(), &raw_query) {
        Ok(m) => m,
        Err(error) => {
            let header = header_for(DocumentFamily::Error, &state);
            return error_response(&state.config, &header, format, error);
        }
    };
    let kind = *matched.handler;
    let path_params = matched.path_params;
    let query_params = matched.query_params;

    let result = match kind {
        RouteKind::Probe => handle_probe(&state, &path_params, format),
        RouteKind::Current => handle_current(&state, &path_params, &raw_query, &query_params, format).await,
        RouteKind::Sample => handle_sample(&state, &path_params, &raw_query, &query_params, format).await,
        RouteKind::AssetsList => handle_assets_list(&state, &path_params, &query_params, format),
        RouteKind::AssetById => handle_asset_by_id(&state, &path_params, format),
        RouteKind::PutAsset => handle_put_asset(&state, peer, &path_params, &raw_query, &body, format),
        RouteKind::DeleteAsset => handle_delete_asset(&state, peer, &path_params, format),
        RouteKind::DeleteAssetsScoped => handle_delete_assets_scoped(&state, peer, &query_params, format),
        RouteKind::PutObservation => handle_put_observation(&state, peer, &path_params, &raw_query, &body, format).await,
        RouteKind::Cancel => handle_cancel(&state, &path_params, format).await,
        RouteKind::FileCache => return handle_file_cache(&state, uri.path(), &headers).await,
    };

    match result {
        Ok(response) => response,
        Err(error) => {
            let header = header_for(DocumentFamily::Error, &state);
            error_response(&state.config, &header, format, error)
        }
    }
}

fn device_path_param(path_params: &HashMap<String, String>) -> Option<&str> {
    path_params.get("device").map(String::as_str)
}

fn query_string<'a>(raw_query: &'a HashMap<String, String>, key: &str) -> Option<&'a str> {
    raw_query.get(key).map(String::as_str)
}

fn query_i64(query_params: &HashMap<String, ParamValue>, key: &str) -> Option<i64> {
    query_params.get(key).and_then(ParamValue::as_i64)
}

fn header_with_buffer(mut header: Header, state: &AppState, first: u64, last: u64, next: u64) -> Header {
    header.buffer_size = Some(state.config.buffer_size);
    header.first_sequence = Some(first);
    header.last_sequence = Some(last);
    header.next_sequence = Some(next);
    header.device_model_change_time = Some(state.instance.device_model_change_time());
    header
}

fn document_body(config: &AgentConfig, header: &Header, format: Format, body: String) -> Response {
    let content_type = format.mime();
    let response = Response::builder()
        .status(StatusCode::OK)
        .header("Content-Type", content_type)
        .body(Body::from(body))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response());
    let _ = header;
    let mut response = response;
    crate::error_response::apply_standard_headers(&mut response, config);
    response
}

fn handle_probe(state: &AppState, path_params: &HashMap<String, String>, format: Format) -> Result<Response, AgentError> {
    let model = state.devices.load();
    let devices: Vec<_> = match device_path_param(path_params) {
        Some(name) => vec![model.find(name).ok_or_else(|| AgentError::no_device(name))?],
        None => model.devices.iter().collect(),
    };
    let mut header = header_for(DocumentFamily::Devices, state);
    header.device_model_change_time = Some(state.instance.device_model_change_time());
    header.asset_count = Some(state.assets.count(None));
    let body = match format {
        Format::Xml => xml::render_probe(&state.config, &header, &devices),
        Format::Json => json::render_probe(&state.config, &header, &devices),
    };
    Ok(document_body(&state.config, &header, format, body))
}

async fn handle_current(
    state: &AppState,
    path_params: &HashMap<String, String>,
    raw_query: &HashMap<String, String>,
    query_params: &HashMap<String, ParamValue>,
    format: Format,
) -> Result<Response, AgentError> {
    let model = state.devices.load();
    let filter = resolve_filter(&model, device_path_param(path_params), query_string(raw_query, "path"))?;

    let heartbeat = query_i64(query_params, "heartbeat").unwrap_or(10_000);
    mtc_model::check_range("heartbeat", heartbeat, 1, i32::MAX as i64 - 1)?;

    if let Some(interval) = query_i64(query_params, "interval") {
        mtc_model::check_range("interval", interval, 0, i32::MAX as i64 - 1)?;
        let request_id = query_string(raw_query, "requestId").map(str::to_owned).unwrap_or_else(streaming::new_boundary);
        let session = StreamSession::new(request_id);
        state.sessions.register(session.clone()).await;

        let at = match query_i64(query_params, "at") {
            Some(at) => {
                let at = at as u64;
                state.buffer.check_sequence_bound("at", at).await?;
                Some(at)
            }
            None => None,
        };

        let header = header_for(DocumentFamily::Streams, state);
        let boundary = streaming::new_boundary();
        let ctx = StreamContext {
            state: state.clone(),
            session: session.clone(),
            filter,
            format,
            header_template: header,
        };
        let stream = streaming::current_stream(ctx, boundary.clone(), interval, at);
        return Ok(multipart_response(state.clone(), session, boundary, format, stream));
    }

    let at = query_i64(query_params, "at").map(|v| v as u64);
    let checkpoint = match at {
        Some(seq) => {
            state.buffer.check_sequence_bound("at", seq).await?;
            state.buffer.checkpoint_at(seq, &filter).await?
        }
        None => state.buffer.latest(&filter).await,
    };
    let rendered = render_checkpoint(&model, &checkpoint, &filter, state.config.upcase_data_item_value);
    let first = state.buffer.first_sequence().await;
    let next = state.buffer.next_sequence().await;
    let header = header_with_buffer(header_for(DocumentFamily::Streams, state), state, first, next.saturating_sub(1), next);
    let body = render_document(&state.config, &header, format, DocumentFamily::Streams, rendered);
    Ok(document_body(&state.config, &header, format, body))
}

async fn handle_sample(
    state: &AppState,
    path_params: &HashMap<String, String>,
    raw_query: &HashMap<String, String>,
    query_params: &HashMap<String, ParamValue>,
    format: Format,
) -> Result<Response, AgentError> {
    let model = state.devices.load();
    let filter = resolve_filter(&model, device_path_param(path_params), query_string(raw_query, "path"))?;

    let count = query_i64(query_params, "count").unwrap_or(100);
    let capacity = state.config.buffer_size as i64;
    mtc_model::check_range("count", count, -(capacity + 1), capacity + 1)?;
    if count == 0 {
        return Err(AgentError::out_of_range("count", 0, -(capacity + 1), capacity + 1));
    }

    let heartbeat = query_i64(query_params, "heartbeat").unwrap_or(10_000);
    mtc_model::check_range("heartbeat", heartbeat, 1, i32::MAX as i64 - 1)?;

    let from = match query_i64(query_params, "from") {
        Some(v) => {
            let v = v as u64;
            state.buffer.check_from_to_bound("from", v).await?;
            Some(v)
        }
        None => None,
    };
    let to = match query_i64(query_params, "to") {
        Some(v) => {
            let v = v as u64;
            state.buffer.check_from_to_bound("to", v).await?;
            Some(v)
        }
        None => None,
    };

    if let Some(interval) = query_i64(query_params, "interval") {
        mtc_model::check_range("interval", interval, 0, i32::MAX as i64 - 1)?;
        let request_id = query_string(raw_query, "requestId").map(str::to_owned).unwrap_or_else(streaming::new_boundary);
        let session = StreamSession::new(request_id);
        state.sessions.register(session.clone()).await;

        let seed = from.unwrap_or(state.buffer.next_sequence().await);
        let header = header_for(DocumentFamily::Streams, state);
        let boundary = streaming::new_boundary();
        let ctx = StreamContext {
            state: state.clone(),
            session: session.clone(),
            filter,
            format,
            header_template: header,
        };
        let stream = streaming::sample_stream(ctx, boundary.clone(), seed, count, interval, heartbeat);
        return Ok(multipart_response(state.clone(), session, boundary, format, stream));
    }

    let (observations, end_seq, _end_of_buffer) = state.buffer.get_range(&filter, count, from, to).await;
    let rendered = render_observations(&model, &observations, state.config.upcase_data_item_value);
    let first = state.buffer.first_sequence().await;
    let header = header_with_buffer(header_for(DocumentFamily::Streams, state), state, first, end_seq, end_seq);
    let body = render_document(&state.config, &header, format, DocumentFamily::Streams, rendered);
    Ok(document_body(&state.config, &header, format, body))
}

/// Wrap a chunk stream in a guard that deregisters the session once the
/// response body is dropped — normal completion and client-disconnect
/// cleanup are the same code path (spec.md §5 "Cancellation": "client
/// disconnect detected by I/O error ... closes the session").
struct SessionGuard {
    sessions: mtc_router::SessionRegistry,
    request_id: String,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        let sessions = self.sessions.clone();
        let request_id = std::mem::take(&mut self.request_id);
        tokio::spawn(async move { sessions.remove(&request_id).await });
    }
}

struct GuardedStream {
    inner: Pin<Box<dyn Stream<Item = bytes::Bytes> + Send>>,
    _guard: SessionGuard,
}

impl Stream for GuardedStream {
    type Item = bytes::Bytes;

    fn poll_next(self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        this.inner.as_mut().poll_next(cx)
    }
}

fn multipart_response(
    state: AppState,
    session: StreamSession,
    boundary: String,
    format: Format,
    stream: impl Stream<Item = bytes::Bytes> + Send + 'static,
) -> Response {
    let guard = SessionGuard {
        sessions: state.sessions.clone(),
        request_id: session.request_id().to_owned(),
    };
    let guarded = GuardedStream {
        inner: Box::pin(stream),
        _guard: guard,
    };
    let body = Body::from_stream(guarded.map(|chunk| Ok::<_, std::convert::Infallible>(chunk)));
    let content_type = format!("multipart/mixed; boundary={boundary}");
    let mut response = Response::builder()
        .status(StatusCode::OK)
        .header("Content-Type", content_type)
        .body(body)
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response());
    crate::error_response::apply_standard_headers(&mut response, &state.config);
    response
}

fn handle_assets_list(
    state: &AppState,
    path_params: &HashMap<String, String>,
    query_params: &HashMap<String, ParamValue>,
    format: Format,
) -> Result<Response, AgentError> {
    let device = device_path_param(path_params).or_else(|| query_params.get("device").and_then(ParamValue::as_str));
    let asset_type = query_params.get("type").and_then(ParamValue::as_str);
    let count = query_params.get("count").and_then(ParamValue::as_i64).unwrap_or(100).max(0) as u64;
    let assets = state.assets.list(device, asset_type, count);
    let header = header_for(DocumentFamily::Assets, state);
    let body = match format {
        Format::Xml => xml::render_assets(&state.config, &header, &assets),
        Format::Json => json::render_assets(&state.config, &header, &assets),
    };
    Ok(document_body(&state.config, &header, format, body))
}

fn handle_asset_by_id(state: &AppState, path_params: &HashMap<String, String>, format: Format) -> Result<Response, AgentError> {
    let raw_ids = path_params.get("assetIds").map(String::as_str).unwrap_or_default();
    let mut assets = Vec::new();
    for id in raw_ids.split(';').filter(|s| !s.is_empty()) {
        let asset = state.assets.get(id).ok_or_else(|| AgentError::asset_not_found(id))?;
        assets.push(asset);
    }
    let header = header_for(DocumentFamily::Assets, state);
    let body = match format {
        Format::Xml => xml::render_assets(&state.config, &header, &assets),
        Format::Json => json::render_assets(&state.config, &header, &assets),
    };
    Ok(document_body(&state.config, &header, format, body))
}

fn handle_put_asset(
    state: &AppState,
    peer: SocketAddr,
    path_params: &HashMap<String, String>,
    raw_query: &HashMap<String, String>,
    body: &Bytes,
    format: Format,
) -> Result<Response, AgentError> {
    if !put_allowed(&state.config, peer) {
        return Err(AgentError::unauthorized("PUT not permitted from this address"));
    }
    let asset_id = path_params
        .get("assetId")
        .cloned()
        .or_else(|| query_string(raw_query, "assetId").map(str::to_owned))
        .ok_or_else(|| AgentError::invalid_request("missing assetId"))?;
    let asset_type = query_string(raw_query, "type").unwrap_or("Asset").to_owned();
    let device_uuid = query_string(raw_query, "device").unwrap_or_default().to_owned();
    let body_text = String::from_utf8_lossy(body).into_owned();
    state.assets.insert(crate::assets::Asset {
        id: asset_id,
        asset_type,
        device_uuid,
        timestamp: chrono::Utc::now(),
        removed: false,
        body: body_text,
    });
    let header = header_for(DocumentFamily::Assets, state);
    let body = document_envelope_ok(&state.config, &header, format);
    Ok(document_body(&state.config, &header, format, body))
}

fn handle_delete_asset(state: &AppState, peer: SocketAddr, path_params: &HashMap<String, String>, format: Format) -> Result<Response, AgentError> {
    if !put_allowed(&state.config, peer) {
        return Err(AgentError::unauthorized("DELETE not permitted from this address"));
    }
    let asset_id = path_params.get("assetId").map(String::as_str).unwrap_or_default();
    if !state.assets.remove(asset_id) {
        return Err(AgentError::asset_not_found(asset_id));
    }
    let header = header_for(DocumentFamily::Assets, state);
    let body = document_envelope_ok(&state.config, &header, format);
    Ok(document_body(&state.config, &header, format, body))
}

fn handle_delete_assets_scoped(state: &AppState, peer: SocketAddr, query_params: &HashMap<String, ParamValue>, format: Format) -> Result<Response, AgentError> {
    if !put_allowed(&state.config, peer) {
        return Err(AgentError::unauthorized("DELETE not permitted from this address"));
    }
    let device = query_params.get("device").and_then(ParamValue::as_str);
    let asset_type = query_params.get("type").and_then(ParamValue::as_str);
    state.assets.remove_all(device, asset_type);
    let header = header_for(DocumentFamily::Assets, state);
    let body = document_envelope_ok(&state.config, &header, format);
    Ok(document_body(&state.config, &header, format, body))
}

fn document_envelope_ok(config: &AgentConfig, header: &Header, format: Format) -> String {
    match format {
        Format::Xml => xml::render_assets(config, header, &[]),
        Format::Json => json::render_assets(config, header, &[]),
    }
}

async fn handle_put_observation(
    state: &AppState,
    peer: SocketAddr,
    path_params: &HashMap<String, String>,
    raw_query: &HashMap<String, String>,
    body: &Bytes,
    format: Format,
) -> Result<Response, AgentError> {
    if !put_allowed(&state.config, peer) {
        return Err(AgentError::unauthorized("PUT/POST not permitted from this address"));
    }
    let device = device_path_param(path_params);
    let query_raw = raw_query_as_body(raw_query);
    let body_text = String::from_utf8_lossy(body);
    let combined = if body_text.trim().is_empty() {
        query_raw
    } else if query_raw.is_empty() {
        body_text.into_owned()
    } else {
        format!("{query_raw}&{body_text}")
    };

    let errors = loopback::ingest(state, device, &combined).await;
    state.observations_received.fetch_add(1, std::sync::atomic::Ordering::Relaxed);

    let header = header_for(DocumentFamily::Error, state);
    if errors.is_empty() {
        let body = match format {
            Format::Xml => xml::render_error(&state.config, &header, &[]),
            Format::Json => json::render_error(&state.config, &header, &[]),
        };
        Ok(document_body(&state.config, &header, format, body))
    } else {
        Ok(document_response(&state.config, &header, format, ErrorDocument { errors }))
    }
}

fn raw_query_as_body(raw_query: &HashMap<String, String>) -> String {
    raw_query
        .iter()
        .filter(|(k, _)| k.as_str() != "format")
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&")
}

async fn handle_cancel(state: &AppState, path_params: &HashMap<String, String>, format: Format) -> Result<Response, AgentError> {
    let id = path_params
        .get("requestId")
        .map(String::as_str)
        .ok_or_else(|| AgentError::invalid_request("missing request id in /cancel/id={id}"))?;
    let cancelled = state.sessions.cancel(id).await;
    let header = header_for(DocumentFamily::Error, state);
    if cancelled {
        let body = match format {
            Format::Xml => xml::render_error(&state.config, &header, &[]),
            Format::Json => json::render_error(&state.config, &header, &[]),
        };
        Ok(document_body(&state.config, &header, format, body))
    } else {
        Err(AgentError::invalid_request(format!("No streaming session with id: {id}")))
    }
}

async fn handle_file_cache(state: &AppState, path: &str, headers: &HeaderMap) -> Response {
    let accept_gzip = headers
        .get(axum::http::header::ACCEPT_ENCODING)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.contains("gzip"));

    match state.files.get(path, accept_gzip).await {
        Ok(Some(file)) => {
            if let Some(target) = file.redirect {
                return Response::builder()
                    .status(StatusCode::FOUND)
                    .header("Location", target)
                    .body(Body::empty())
                    .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response());
            }
            let (body, gzip) = match (&file.content, accept_gzip, &file.gzip) {
                (_, true, Some(gz)) => (Body::from(gz.as_ref().clone()), true),
                (mtc_filecache::FileContent::Memory(bytes), _, _) => (Body::from(bytes.as_ref().clone()), false),
                (mtc_filecache::FileContent::Disk(path), _, _) => match tokio::fs::read(path).await {
                    Ok(bytes) => (Body::from(bytes), false),
                    Err(_) => return StatusCode::NOT_FOUND.into_response(),
                },
            };
            let mut builder = Response::builder().status(StatusCode::OK).header("Content-Type", file.mime.clone());
            if gzip {
                builder = builder.header("Content-Encoding", "gzip");
            }
            let mut response = builder.body(body).unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response());
            crate::error_response::apply_standard_headers(&mut response, &state.config);
            response
        }
        Ok(None) => StatusCode::NOT_FOUND.into_response(),
        Err(error) => {
            tracing::warn!(%error, path, "file cache lookup failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
