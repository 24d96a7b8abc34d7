//! Renders [`AgentError`] into an HTTP response in the caller's negotiated
//! content type (spec.md §4.4 "Error serialization", §7 "Propagation
//! policy"). Streaming handlers reuse [`render`] directly when a failure
//! happens mid-stream (spec.md §4.2 "failures").

use axum::body::Body;
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use mtc_model::{AgentError, ErrorCode, ErrorDetail};

use crate::config::{AgentConfig, Format};
use crate::serialize::common::Header;
use crate::serialize::{json, xml};

/// One or more errors to report together (spec.md §7 "Multiple errors in
/// one response are aggregated").
pub struct ErrorDocument {
    pub errors: Vec<AgentError>,
}

impl ErrorDocument {
    pub fn single(error: AgentError) -> Self {
        Self { errors: vec![error] }
    }

    pub fn status(&self) -> StatusCode {
        self.errors
            .first()
            .map(|e| StatusCode::from_u16(e.code.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR))
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }

    pub fn render(&self, config: &AgentConfig, header: &Header, format: Format) -> String {
        match format {
            Format::Xml => xml::render_error(config, header, &self.errors),
            Format::Json => json::render_error(config, header, &self.errors),
        }
    }
}

/// Build a one-error document and turn it straight into a response, applying
/// the always-set headers (spec.md §6 "Headers always set").
pub fn error_response(config: &AgentConfig, header: &Header, format: Format, error: AgentError) -> Response {
    document_response(config, header, format, ErrorDocument::single(error))
}

pub fn document_response(config: &AgentConfig, header: &Header, format: Format, doc: ErrorDocument) -> Response {
    let status = doc.status();
    let body = doc.render(config, header, format);
    let mut response = Response::builder()
        .status(status)
        .header("Content-Type", format.mime())
        .body(Body::from(body))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response());
    apply_standard_headers(&mut response, config);
    response
}

/// `Server`, `Cache-Control`, `Expires`, plus any configured extra headers
/// (spec.md §6 "Headers always set").
pub fn apply_standard_headers(response: &mut Response, config: &AgentConfig) {
    let headers = response.headers_mut();
    headers.insert("Server", HeaderValue::from_static("MTConnectAgent"));
    headers.insert("Cache-Control", HeaderValue::from_static("no-store, max-age=0"));
    headers.insert("Expires", HeaderValue::from_static("-1"));
    for (name, value) in &config.http_headers {
        if let (Ok(name), Ok(value)) = (
            axum::http::HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            headers.insert(name, value);
        }
    }
}

/// A request-scoped error carrying enough context (config + negotiated
/// format + header) to render itself without the handler having to thread
/// all three through every `?` site.
pub struct RenderableError {
    pub error: AgentError,
    pub config: std::sync::Arc<AgentConfig>,
    pub header: Header,
    pub format: Format,
}

impl IntoResponse for RenderableError {
    fn into_response(self) -> Response {
        error_response(&self.config, &self.header, self.format, self.error)
    }
}

/// Maps a coercion/validation failure detail back to the `(type, format)`
/// tags used in log messages; kept separate from the wire serializer so
/// tracing doesn't depend on the serialize module.
pub fn describe(error: &AgentError) -> String {
    match &error.detail {
        ErrorDetail::None => error.code.wire_name().to_owned(),
        ErrorDetail::InvalidParameterValue { parameter, value, .. } => {
            format!("{}: {parameter}={value}", error.code.wire_name())
        }
        ErrorDetail::OutOfRange {
            parameter,
            value,
            minimum,
            maximum,
        } => format!("{}: {parameter}={value} not in [{minimum}, {maximum}]", error.code.wire_name()),
        ErrorDetail::AssetNotFound { asset_id } => format!("{}: {asset_id}", error.code.wire_name()),
    }
}

pub fn is_client_error(code: ErrorCode) -> bool {
    code.http_status() < 500
}
