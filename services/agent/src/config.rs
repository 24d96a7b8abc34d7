//! The agent's configuration dictionary (spec.md §6): a typed struct
//! assembled from the recognised `Key -> Value` options, with defaults
//! matching the original agent's `config_options` table.

use std::net::{SocketAddr, ToSocketAddrs};

/// Which JSON dialect the agent renders (spec.md §4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JsonVersion {
    V1,
    V2,
}

/// The default content type a handler falls back to when negotiation finds
/// nothing usable (spec.md §4.3 "Content negotiation").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Xml,
    Json,
}

impl Format {
    pub fn mime(self) -> &'static str {
        match self {
            Format::Xml => "application/xml",
            Format::Json => "application/json",
        }
    }
}

/// Per-document-family `<?xml-stylesheet?>` processing-instruction hrefs
/// (spec.md:175 "an optional stylesheet processing instruction emitted as
/// the first node"), one slot per `DocumentFamily`; unset by default, set
/// the way the original agent's `setDevicesStyle`/`setStreamStyle`/
/// `setErrorStyle`/`setAssetsStyle` configure them.
#[derive(Debug, Clone, Default)]
pub struct StylesheetConfig {
    pub devices: Option<String>,
    pub streams: Option<String>,
    pub assets: Option<String>,
    pub error: Option<String>,
}

/// TLS material, only consulted when `tls_only`/`tls_verify_client_certificate`
/// are configured; the core never parses these itself (spec.md §6), it just
/// carries the paths through to the transport layer that does.
#[derive(Debug, Clone, Default)]
pub struct TlsConfig {
    pub certificate_chain: Option<String>,
    pub private_key: Option<String>,
    pub dh_key: Option<String>,
    pub certificate_password: Option<String>,
    pub tls_only: bool,
    pub verify_client_certificate: bool,
}

/// The full recognised-options dictionary (spec.md §6), flattened into a
/// typed struct rather than passed around as a loose `HashMap`.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub port: u16,
    pub server_ip: String,
    pub allow_put: bool,
    pub allow_put_from: Vec<SocketAddr>,
    pub http_headers: Vec<(String, String)>,
    pub tls: TlsConfig,
    pub stylesheets: StylesheetConfig,
    pub schema_version: String,
    pub sender: String,
    pub validation: bool,
    pub max_cached_file_size: u64,
    pub min_compress_file_size: u64,
    pub json_version: JsonVersion,
    pub pretty: bool,
    pub heartbeat_ms: i64,
    pub interval_ms: i64,
    pub count: i64,
    pub ignore_timestamps: bool,
    pub filter_duplicates: bool,
    pub auto_available: bool,
    pub preserve_uuid: bool,
    pub conversion_required: bool,
    pub upcase_data_item_value: bool,
    pub relative_time: bool,
    pub buffer_size: u64,
    pub checkpoint_frequency: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            port: 5000,
            server_ip: "0.0.0.0".to_owned(),
            allow_put: false,
            allow_put_from: Vec::new(),
            http_headers: Vec::new(),
            tls: TlsConfig::default(),
            stylesheets: StylesheetConfig::default(),
            schema_version: "2.2".to_owned(),
            sender: "localhost".to_owned(),
            validation: false,
            max_cached_file_size: mtc_filecache::DEFAULT_MAX_CACHED_SIZE,
            min_compress_file_size: 100 * 1024,
            json_version: JsonVersion::V2,
            pretty: false,
            heartbeat_ms: 10_000,
            interval_ms: 0,
            count: 100,
            ignore_timestamps: false,
            filter_duplicates: false,
            auto_available: false,
            preserve_uuid: false,
            conversion_required: true,
            upcase_data_item_value: false,
            relative_time: false,
            buffer_size: 131_072,
            checkpoint_frequency: mtc_buffer::DEFAULT_CHECKPOINT_FREQ,
        }
    }
}

impl AgentConfig {
    /// Resolve `AllowPutFrom` hostnames to addresses once, at construction
    /// time (spec.md §4.3 "PUT permission"), rather than on every request.
    pub fn with_put_permissions(mut self, allow_put: bool, allow_from_hosts: &[String]) -> Self {
        self.allow_put = allow_put;
        self.allow_put_from = allow_from_hosts
            .iter()
            .filter_map(|host| resolve_host(host))
            .collect();
        self
    }

    pub fn schema_major_minor(&self) -> (u32, u32) {
        let mut parts = self.schema_version.split('.');
        let major = parts.next().and_then(|s| s.parse().ok()).unwrap_or(1);
        let minor = parts.next().and_then(|s| s.parse().ok()).unwrap_or(2);
        (major, minor)
    }

    /// `true` once the schema reaches the version where the error document
    /// gains per-variant elements instead of one generic `<Error>` (spec.md
    /// §4.4, §7).
    pub fn per_variant_errors(&self) -> bool {
        self.schema_major_minor() >= (2, 6)
    }

    pub fn device_model_change_time_supported(&self) -> bool {
        self.schema_major_minor() >= (1, 7)
    }

    pub fn asset_counts_supported(&self) -> bool {
        self.schema_major_minor() >= (2, 0)
    }
}

fn resolve_host(host: &str) -> Option<SocketAddr> {
    if let Ok(addr) = host.parse::<SocketAddr>() {
        return Some(addr);
    }
    // Bare hostnames/IPs without a port resolve against a dummy port; only
    // the IP half is compared against a peer's resolved address later.
    format!("{host}:0").to_socket_addrs().ok()?.next()
}
