//! Extension-to-mime-type registry (spec.md §4.5): explicit, registered
//! mappings rather than content sniffing, mirroring the original agent's
//! `FileCache::addMimeType`/`m_mimeTypes` table.

use std::collections::HashMap;

pub const DEFAULT_MIME: &str = "application/octet-stream";

#[derive(Debug, Clone)]
pub struct MimeRegistry {
    types: HashMap<String, String>,
}

impl Default for MimeRegistry {
    fn default() -> Self {
        let mut types = HashMap::new();
        let defaults: &[(&str, &str)] = &[
            (".xml", "text/xml"),
            (".xsd", "text/xml"),
            (".xsl", "text/xsl"),
            (".json", "application/json"),
            (".html", "text/html"),
            (".htm", "text/html"),
            (".css", "text/css"),
            (".js", "text/javascript"),
            (".txt", "text/plain"),
            (".ico", "image/x-icon"),
            (".png", "image/png"),
            (".jpg", "image/jpeg"),
            (".jpeg", "image/jpeg"),
            (".gif", "image/gif"),
            (".svg", "image/svg+xml"),
            (".woff", "font/woff"),
            (".woff2", "font/woff2"),
            (".ttf", "font/ttf"),
            (".gz", "application/gzip"),
        ];
        for (ext, mime) in defaults {
            types.insert((*ext).to_owned(), (*mime).to_owned());
        }
        Self { types }
    }
}

impl MimeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or override) the mime type for an extension; a leading
    /// dot is added if missing.
    pub fn add(&mut self, ext: &str, mime_type: impl Into<String>) {
        let key = if ext.starts_with('.') {
            ext.to_owned()
        } else {
            format!(".{ext}")
        };
        self.types.insert(key, mime_type.into());
    }

    pub fn lookup(&self, path: &str) -> &str {
        match path.rfind('.') {
            Some(idx) => self
                .types
                .get(&path[idx..].to_ascii_lowercase())
                .map(String::as_str)
                .unwrap_or(DEFAULT_MIME),
            None => DEFAULT_MIME,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_extension_resolves_registered_mime() {
        let reg = MimeRegistry::new();
        assert_eq!(reg.lookup("/schemas/MTConnectStreams.xsd"), "text/xml");
        assert_eq!(reg.lookup("styles/site.CSS".to_ascii_lowercase().as_str()), "text/css");
    }

    #[test]
    fn unknown_extension_falls_back_to_octet_stream() {
        let reg = MimeRegistry::new();
        assert_eq!(reg.lookup("/data.bin"), DEFAULT_MIME);
        assert_eq!(reg.lookup("/noextension"), DEFAULT_MIME);
    }

    #[test]
    fn custom_registration_overrides_default() {
        let mut reg = MimeRegistry::new();
        reg.add("xml", "application/xml");
        assert_eq!(reg.lookup("/a.xml"), "application/xml");
    }
}
