//! Hand-rolled XML rendering (spec.md §4.4 "XML serialization"). There's no
//! typed writer crate anywhere in the reference pack with real call-site
//! usage to imitate (see `DESIGN.md`), so this is a small indent-aware
//! string builder plus an escaper, in the same plain-`String` spirit the
//! rest of this crate renders with.

use mtc_model::{AgentError, Device};

use crate::assets::Asset;
use crate::config::AgentConfig;
use crate::serialize::common::{group_by_device_component, DocumentFamily, Header, ObsRender};

pub fn escape(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for ch in input.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(ch),
        }
    }
    out
}

/// A small nesting-aware string builder. Not a generic XML DOM: callers
/// write tags in document order and the builder only tracks indentation
/// and the open-tag stack needed to close them correctly.
struct Builder {
    out: String,
    pretty: bool,
    stack: Vec<String>,
}

impl Builder {
    fn new(pretty: bool) -> Self {
        Self {
            out: String::new(),
            pretty,
            stack: Vec::new(),
        }
    }

    fn indent(&mut self) {
        if self.pretty {
            self.out.push('\n');
            for _ in 0..self.stack.len() {
                self.out.push_str("  ");
            }
        }
    }

    fn open(&mut self, tag: &str, attrs: &[(&str, String)]) {
        self.indent();
        self.out.push('<');
        self.out.push_str(tag);
        for (key, value) in attrs {
            self.out.push(' ');
            self.out.push_str(key);
            self.out.push_str("=\"");
            self.out.push_str(&escape(value));
            self.out.push('"');
        }
        self.out.push('>');
        self.stack.push(tag.to_owned());
    }

    fn close(&mut self) {
        let tag = self.stack.pop().expect("close without matching open");
        self.indent();
        self.out.push_str("</");
        self.out.push_str(&tag);
        self.out.push('>');
    }

    /// Self-closing or text-bearing leaf element.
    fn leaf(&mut self, tag: &str, attrs: &[(&str, String)], text: Option<&str>) {
        self.indent();
        self.out.push('<');
        self.out.push_str(tag);
        for (key, value) in attrs {
            self.out.push(' ');
            self.out.push_str(key);
            self.out.push_str("=\"");
            self.out.push_str(&escape(value));
            self.out.push('"');
        }
        match text {
            Some(text) if !text.is_empty() => {
                self.out.push('>');
                self.out.push_str(&escape(text));
                self.out.push_str("</");
                self.out.push_str(tag);
                self.out.push('>');
            }
            _ => self.out.push_str("/>"),
        }
    }

    /// Insert an already-serialized fragment verbatim (asset bodies).
    fn raw(&mut self, fragment: &str) {
        self.indent();
        self.out.push_str(fragment);
    }

    fn finish(self) -> String {
        self.out
    }
}

fn namespace_attrs(config: &AgentConfig, family: DocumentFamily) -> Vec<(&'static str, String)> {
    let (major, minor) = config.schema_major_minor();
    let urn = format!("urn:mtconnect.org:{}:{}.{}", family.root_element(), major, minor);
    vec![
        ("xmlns:m", urn.clone()),
        ("xmlns", urn),
        ("xmlns:xsi", "http://www.w3.org/2001/XMLSchema-instance".to_owned()),
    ]
}

fn render_header(b: &mut Builder, config: &AgentConfig, header: &Header) {
    let mut attrs = vec![
        ("instanceId", header.instance_id.to_string()),
        ("version", header.version.clone()),
        ("sender", header.sender.clone()),
        ("creationTime", header.creation_time.to_rfc3339()),
    ];
    if let Some(n) = header.buffer_size {
        attrs.push(("bufferSize", n.to_string()));
    }
    if let Some(n) = header.asset_buffer_size {
        attrs.push(("assetBufferSize", n.to_string()));
    }
    if let Some(n) = header.asset_count {
        attrs.push(("assetCount", n.to_string()));
    }
    if let Some(n) = header.first_sequence {
        attrs.push(("firstSequence", n.to_string()));
    }
    if let Some(n) = header.last_sequence {
        attrs.push(("lastSequence", n.to_string()));
    }
    if let Some(n) = header.next_sequence {
        attrs.push(("nextSequence", n.to_string()));
    }
    if config.device_model_change_time_supported() {
        if let Some(t) = header.device_model_change_time {
            attrs.push(("deviceModelChangeTime", t.to_rfc3339()));
        }
    }
    if config.asset_counts_supported() && !header.asset_counts.is_empty() {
        b.open("Header", &attrs);
        b.open("AssetCounts", &[]);
        for (asset_type, count) in &header.asset_counts {
            b.leaf("AssetCount", &[("assetType", asset_type.clone())], Some(&count.to_string()));
        }
        b.close();
        b.close();
    } else {
        b.leaf("Header", &attrs, None);
    }
}

fn root_tag(family: DocumentFamily) -> &'static str {
    match family {
        DocumentFamily::Devices => "MTConnectDevices",
        DocumentFamily::Streams => "MTConnectStreams",
        DocumentFamily::Assets => "MTConnectAssets",
        DocumentFamily::Error => "MTConnectError",
    }
}

/// The configured stylesheet href for a document family, if any (spec.md:175
/// "an optional stylesheet processing instruction emitted as the first
/// node"; `AgentConfig::stylesheets` is the `setDevicesStyle`/
/// `setStreamStyle`/`setErrorStyle`/`setAssetsStyle` equivalent).
fn stylesheet_href(config: &AgentConfig, family: DocumentFamily) -> Option<&str> {
    match family {
        DocumentFamily::Devices => config.stylesheets.devices.as_deref(),
        DocumentFamily::Streams => config.stylesheets.streams.as_deref(),
        DocumentFamily::Assets => config.stylesheets.assets.as_deref(),
        DocumentFamily::Error => config.stylesheets.error.as_deref(),
    }
}

fn wrap_document(config: &AgentConfig, header: &Header, body: impl FnOnce(&mut Builder)) -> String {
    let mut b = Builder::new(config.pretty);
    b.out.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>");
    if let Some(href) = stylesheet_href(config, header.family) {
        b.out.push_str(&format!("<?xml-stylesheet type=\"text/xsl\" href=\"{}\"?>", escape(href)));
    }

    let attrs = namespace_attrs(config, header.family);
    b.open(root_tag(header.family), &attrs);
    render_header(&mut b, config, header);
    body(&mut b);
    b.close();
    b.finish()
}

pub fn render_probe(config: &AgentConfig, header: &Header, devices: &[&Device]) -> String {
    wrap_document(config, header, |b| {
        b.open("Devices", &[]);
        for device in devices {
            render_device(b, device);
        }
        b.close();
    })
}

fn render_device(b: &mut Builder, device: &Device) {
    let attrs = vec![("name", device.name.clone()), ("uuid", device.uuid.clone()), ("id", device.root.id.clone())];
    b.open("Device", &attrs);
    render_component_body(b, device, &device.root);
    b.close();
}

fn render_component_body(b: &mut Builder, device: &Device, component: &mtc_model::Component) {
    if !component.data_items.is_empty() {
        b.open("DataItems", &[]);
        for id in &component.data_items {
            if let Some(item) = device.data_items.get(id) {
                let mut attrs = vec![("id", item.id.clone()), ("category", format!("{:?}", item.category).to_uppercase()), ("type", item.data_type.clone())];
                if let Some(name) = &item.name {
                    attrs.push(("name", name.clone()));
                }
                if let Some(sub_type) = &item.sub_type {
                    attrs.push(("subType", sub_type.clone()));
                }
                b.leaf("DataItem", &attrs, None);
            }
        }
        b.close();
    }
    if !component.children.is_empty() {
        b.open("Components", &[]);
        for child in &component.children {
            let attrs = vec![("id", child.id.clone()), ("name", child.name.clone().unwrap_or_default())];
            b.open(&child.component_type, &attrs);
            render_component_body(b, device, child);
            b.close();
        }
        b.close();
    }
}

pub fn render_streams(config: &AgentConfig, header: &Header, items: Vec<ObsRender>) -> String {
    wrap_document(config, header, |b| {
        b.open("Streams", &[]);
        for device in group_by_device_component(items) {
            let attrs = vec![("name", device.device_name.clone()), ("uuid", device.device_id.clone())];
            b.open("DeviceStream", &attrs);
            for component in device.components {
                let attrs = vec![
                    ("component", component.component_type.clone()),
                    ("name", component.component_name.clone()),
                    ("componentId", component.component_id.clone()),
                ];
                b.open("ComponentStream", &attrs);
                render_category(b, "Samples", &component.samples);
                render_category(b, "Events", &component.events);
                render_category(b, "Condition", &component.condition);
                b.close();
            }
            b.close();
        }
        b.close();
    })
}

fn render_category(b: &mut Builder, tag: &str, items: &[ObsRender]) {
    if items.is_empty() {
        return;
    }
    b.open(tag, &[]);
    for item in items {
        let mut attrs = vec![
            ("dataItemId", item.data_item_id.clone()),
            ("sequence", item.sequence.to_string()),
            ("timestamp", item.timestamp.to_rfc3339()),
        ];
        if let Some(name) = &item.data_item_name {
            attrs.push(("name", name.clone()));
        }
        if let Some(sub_type) = &item.sub_type {
            attrs.push(("subType", sub_type.clone()));
        }
        attrs.extend(item.attrs.iter().map(|(k, v)| (k.as_str(), v.clone())));

        if let Some(entries) = &item.data_set {
            b.open(&item.element_name, &attrs);
            for entry in entries {
                render_data_set_entry(b, entry);
            }
            b.close();
        } else if let Some(rows) = &item.table {
            b.open(&item.element_name, &attrs);
            for row in rows {
                b.open("Entry", &[("key", row.key.clone())]);
                for cell in &row.cells {
                    render_data_set_entry(b, cell);
                }
                b.close();
            }
            b.close();
        } else {
            b.leaf(&item.element_name, &attrs, item.text.as_deref());
        }
    }
    b.close();
}

fn render_data_set_entry(b: &mut Builder, entry: &mtc_model::DataSetEntry) {
    match &entry.value {
        Some(value) => b.leaf("Entry", &[("key", entry.key.clone())], Some(value)),
        None => b.leaf("Entry", &[("key", entry.key.clone()), ("removed", "true".to_owned())], None),
    }
}

pub fn render_assets(config: &AgentConfig, header: &Header, assets: &[Asset]) -> String {
    wrap_document(config, header, |b| {
        b.open("Assets", &[]);
        for asset in assets {
            b.raw(&asset.body);
        }
        b.close();
    })
}

pub fn render_error(config: &AgentConfig, header: &Header, errors: &[AgentError]) -> String {
    wrap_document(config, header, |b| {
        b.open("Errors", &[]);
        for error in errors {
            let message = error.message.clone().unwrap_or_default();
            if config.per_variant_errors() {
                render_error_variant(b, error, &message);
            } else {
                b.leaf("Error", &[("errorCode", error.code.wire_name().to_owned())], Some(&message));
            }
        }
        b.close();
    })
}

/// schema >= 2.6 per-variant error element: `ErrorMessage` plus optional
/// `URI`/`Request` and variant-specific children (spec.md §4.4 "Error
/// serialization").
fn render_error_variant(b: &mut Builder, error: &AgentError, message: &str) {
    b.open(error.code.element_name(), &[]);
    b.leaf("ErrorMessage", &[], Some(message));
    if let Some(uri) = &error.uri {
        b.leaf("URI", &[], Some(uri));
    }
    if let Some(request) = &error.request {
        b.leaf("Request", &[], Some(request));
    }
    match &error.detail {
        mtc_model::ErrorDetail::None => {}
        mtc_model::ErrorDetail::InvalidParameterValue { parameter, value, param_type, format } => {
            b.open("QueryParameter", &[("name", parameter.clone())]);
            b.leaf("Value", &[], Some(value));
            b.leaf("Type", &[], Some(param_type));
            b.leaf("Format", &[], Some(format));
            b.close();
        }
        mtc_model::ErrorDetail::OutOfRange { parameter, value, minimum, maximum } => {
            b.open("QueryParameter", &[("name", parameter.clone())]);
            b.leaf("Value", &[], Some(&value.to_string()));
            b.leaf("Minimum", &[], Some(&minimum.to_string()));
            b.leaf("Maximum", &[], Some(&maximum.to_string()));
            b.close();
        }
        mtc_model::ErrorDetail::AssetNotFound { asset_id } => {
            b.leaf("AssetId", &[], Some(asset_id));
        }
    }
    b.close();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serialize::common::DocumentFamily;
    use mtc_model::ErrorCode;

    fn config() -> AgentConfig {
        AgentConfig::default()
    }

    fn header(family: DocumentFamily) -> Header {
        Header::new(family, &config(), 1234, "2.2.0")
    }

    #[test]
    fn escape_covers_the_five_xml_entities() {
        assert_eq!(escape("a & b < c > d \"e\" 'f'"), "a &amp; b &lt; c &gt; d &quot;e&quot; &apos;f&apos;");
    }

    #[test]
    fn no_stylesheet_configured_emits_no_processing_instruction() {
        let xml = render_error(&config(), &header(DocumentFamily::Error), &[AgentError::no_device("X")]);
        assert!(!xml.contains("xml-stylesheet"));
    }

    #[test]
    fn configured_stylesheet_is_emitted_as_the_first_node_for_its_family() {
        let mut cfg = config();
        cfg.stylesheets.error = Some("/styles/error.xsl".to_owned());
        let xml = render_error(&cfg, &header(DocumentFamily::Error), &[AgentError::no_device("X")]);
        let pi_pos = xml.find("<?xml-stylesheet type=\"text/xsl\" href=\"/styles/error.xsl\"?>").unwrap();
        let root_pos = xml.find("<MTConnectError").unwrap();
        assert!(pi_pos < root_pos, "stylesheet PI must precede the root element");

        // A different family's stylesheet slot is left unset and not emitted.
        let streams_xml = render_streams(&cfg, &header(DocumentFamily::Streams), Vec::new());
        assert!(!streams_xml.contains("xml-stylesheet"));
    }

    #[test]
    fn error_document_uses_generic_error_element_below_2_6() {
        let cfg = config();
        let err = AgentError::no_device("X");
        let xml = render_error(&cfg, &header(DocumentFamily::Error), std::slice::from_ref(&err));
        assert!(xml.contains("<Error errorCode=\"NO_DEVICE\">"));
        assert_eq!(err.code, ErrorCode::NoDevice);
    }

    #[test]
    fn error_document_uses_per_variant_element_at_2_6() {
        let mut cfg = config();
        cfg.schema_version = "2.6".to_owned();
        let err = AgentError::no_device("X");
        let xml = render_error(&cfg, &header(DocumentFamily::Error), &[err]);
        assert!(xml.contains("<NoDevice>"));
    }

    #[test]
    fn out_of_range_variant_carries_query_parameter_bounds() {
        let mut cfg = config();
        cfg.schema_version = "2.6".to_owned();
        let err = AgentError::out_of_range("count", -1, -132_073, 131_073);
        let xml = render_error(&cfg, &header(DocumentFamily::Error), &[err]);
        assert!(xml.contains("<OutOfRange>"));
        assert!(xml.contains("<QueryParameter name=\"count\">"));
        assert!(xml.contains("<Minimum>-132073</Minimum>"));
        assert!(xml.contains("<Maximum>131073</Maximum>"));
    }

    #[test]
    fn asset_not_found_variant_carries_asset_id() {
        let mut cfg = config();
        cfg.schema_version = "2.6".to_owned();
        let err = AgentError::asset_not_found("tool-9");
        let xml = render_error(&cfg, &header(DocumentFamily::Error), &[err]);
        assert!(xml.contains("<AssetNotFound>"));
        assert!(xml.contains("<AssetId>tool-9</AssetId>"));
    }

    #[test]
    fn streams_document_nests_device_component_category() {
        let cfg = config();
        let item = ObsRender {
            device_id: "uuid-1".to_owned(),
            device_name: "LinuxCNC".to_owned(),
            component_id: "ctrl".to_owned(),
            component_name: "controller".to_owned(),
            component_type: "Controller".to_owned(),
            category: mtc_model::Category::Event,
            element_name: "Line".to_owned(),
            data_item_id: "line1".to_owned(),
            data_item_name: Some("line".to_owned()),
            sub_type: None,
            sequence: 1,
            timestamp: chrono::Utc::now(),
            text: Some("204".to_owned()),
            attrs: Vec::new(),
            vector: None,
            data_set: None,
            table: None,
        };
        let xml = render_streams(&cfg, &header(DocumentFamily::Streams), vec![item]);
        assert!(xml.contains("<DeviceStream"));
        assert!(xml.contains("<ComponentStream"));
        assert!(xml.contains("<Events>"));
        assert!(xml.contains("<Line"));
        assert!(xml.contains(">204<"));
    }
}
