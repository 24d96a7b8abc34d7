//! In-memory/disk-backed file cache with lazy, coalesced gzip companions
//! (spec.md §4.5), grounded on the original agent's `FileCache`/`CachedFile`.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use mtc_model::AgentError;
use tokio::sync::{Mutex, RwLock};

use crate::mime::MimeRegistry;

pub const DEFAULT_MAX_CACHED_SIZE: u64 = 20 * 1024;
pub const DEFAULT_MIN_COMPRESS_SIZE: u64 = 1024;

#[derive(Debug, Clone)]
pub enum FileContent {
    Memory(Arc<Vec<u8>>),
    Disk(PathBuf),
}

/// A resolved, possibly-compressed file ready to be written to a response.
#[derive(Debug, Clone)]
pub struct CachedFile {
    pub mime: String,
    pub size: u64,
    pub last_write_time: SystemTime,
    pub content: FileContent,
    pub gzip: Option<Arc<Vec<u8>>>,
    /// Set instead of `content` when `path` named a registered directory
    /// with no trailing file: redirect to its default document.
    pub redirect: Option<String>,
}

impl CachedFile {
    fn redirect(target: impl Into<String>) -> Self {
        Self {
            mime: crate::mime::DEFAULT_MIME.to_owned(),
            size: 0,
            last_write_time: SystemTime::UNIX_EPOCH,
            content: FileContent::Memory(Arc::new(Vec::new())),
            gzip: None,
            redirect: Some(target.into()),
        }
    }
}

struct Directory {
    prefix: String,
    root: PathBuf,
    default_document: String,
}

enum Resolved {
    File(PathBuf),
    Redirect(String),
}

pub struct FileCache {
    max_cached_size: u64,
    min_compress_size: u64,
    mime: MimeRegistry,
    files: HashMap<String, PathBuf>,
    directories: Vec<Directory>,
    entries: RwLock<HashMap<String, Arc<Mutex<Option<CachedFile>>>>>,
}

impl FileCache {
    pub fn new(max_cached_size: u64, min_compress_size: u64) -> Self {
        Self {
            max_cached_size,
            min_compress_size,
            mime: MimeRegistry::new(),
            files: HashMap::new(),
            directories: Vec::new(),
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn mime_mut(&mut self) -> &mut MimeRegistry {
        &mut self.mime
    }

    /// Register a single exact uri -> disk path mapping.
    pub fn register_file(&mut self, uri: impl Into<String>, disk_path: impl Into<PathBuf>) {
        self.files.insert(uri.into(), disk_path.into());
    }

    /// Register every path under `uri` as served from `root` on disk; a
    /// request for `uri` itself (or `uri/`) redirects to `default_document`.
    pub fn register_directory(
        &mut self,
        uri: impl Into<String>,
        root: impl Into<PathBuf>,
        default_document: impl Into<String>,
    ) {
        self.directories.push(Directory {
            prefix: uri.into(),
            root: root.into(),
            default_document: default_document.into(),
        });
    }

    pub fn has_file(&self, path: &str) -> bool {
        self.files.contains_key(path) || self.directories.iter().any(|d| path.starts_with(&d.prefix))
    }

    fn resolve(&self, path: &str) -> Option<Resolved> {
        if let Some(p) = self.files.get(path) {
            return Some(Resolved::File(p.clone()));
        }
        for dir in &self.directories {
            let trimmed_prefix = dir.prefix.trim_end_matches('/');
            if path == trimmed_prefix || path == format!("{trimmed_prefix}/") {
                return Some(Resolved::Redirect(format!("{trimmed_prefix}/{}", dir.default_document)));
            }
            if let Some(rest) = path.strip_prefix(trimmed_prefix) {
                let rest = rest.trim_start_matches('/');
                if !rest.is_empty() {
                    return Some(Resolved::File(dir.root.join(rest)));
                }
            }
        }
        None
    }

    /// Fetch a file, serving a cached in-memory copy when small enough and
    /// lazily producing a gzip companion when the caller accepts it.
    /// Returns `Ok(None)` when nothing is registered at `path` or the file
    /// is missing on disk (the router falls through to a 404 either way).
    pub async fn get(&self, path: &str, accept_gzip: bool) -> Result<Option<CachedFile>, AgentError> {
        let resolved = match self.resolve(path) {
            Some(r) => r,
            None => return Ok(None),
        };
        let disk_path = match resolved {
            Resolved::Redirect(target) => return Ok(Some(CachedFile::redirect(target))),
            Resolved::File(p) => p,
        };

        let entry = {
            let mut entries = self.entries.write().await;
            entries
                .entry(path.to_owned())
                .or_insert_with(|| Arc::new(Mutex::new(None)))
                .clone()
        };
        // Holding this per-path lock across load and compression coalesces
        // concurrent requests for the same file into one disk read and one
        // compression job (spec.md §4.5 "concurrent requests ... coalesce").
        let mut guard = entry.lock().await;

        let metadata = match tokio::fs::metadata(&disk_path).await {
            Ok(m) => m,
            Err(_) => {
                *guard = None;
                return Ok(None);
            }
        };
        let mtime = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);

        let stale = guard.as_ref().map_or(true, |f| f.last_write_time != mtime);
        if stale {
            let bytes = tokio::fs::read(&disk_path)
                .await
                .map_err(|e| AgentError::internal(format!("failed reading {}: {e}", disk_path.display())))?;
            let size = bytes.len() as u64;
            let content = if size <= self.max_cached_size {
                FileContent::Memory(Arc::new(bytes))
            } else {
                FileContent::Disk(disk_path.clone())
            };
            *guard = Some(CachedFile {
                mime: self.mime.lookup(path).to_owned(),
                size,
                last_write_time: mtime,
                content,
                gzip: None,
                redirect: None,
            });
        }

        if accept_gzip {
            let needs_gzip = guard
                .as_ref()
                .is_some_and(|f| f.size >= self.min_compress_size && f.gzip.is_none());
            if needs_gzip {
                let content = guard.as_ref().unwrap().content.clone();
                match compress(&disk_path, content).await {
                    Ok(gz) => guard.as_mut().unwrap().gzip = Some(gz),
                    Err(error) => tracing::warn!(
                        path = %disk_path.display(),
                        %error,
                        "gzip companion generation failed, serving uncompressed"
                    ),
                }
            }
        }

        Ok(guard.clone())
    }
}

async fn compress(disk_path: &Path, content: FileContent) -> std::io::Result<Arc<Vec<u8>>> {
    let bytes = match content {
        FileContent::Memory(bytes) => bytes,
        FileContent::Disk(path) => Arc::new(tokio::fs::read(&path).await?),
    };

    let compressed = tokio::task::spawn_blocking(move || {
        let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(&bytes)?;
        encoder.finish()
    })
    .await
    .map_err(|e| std::io::Error::other(e.to_string()))??;

    let gz_path = PathBuf::from(format!("{}.gz", disk_path.display()));
    tokio::fs::write(&gz_path, &compressed).await?;
    Ok(Arc::new(compressed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    async fn write_file(dir: &tempfile::TempDir, name: &str, contents: &[u8]) -> PathBuf {
        let path = dir.path().join(name);
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(contents).unwrap();
        path
    }

    #[tokio::test]
    async fn serves_small_file_from_memory() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "probe.xsd", b"<xsd/>").await;

        let mut cache = FileCache::new(DEFAULT_MAX_CACHED_SIZE, DEFAULT_MIN_COMPRESS_SIZE);
        cache.register_file("/schemas/probe.xsd", path);

        let file = cache.get("/schemas/probe.xsd", false).await.unwrap().unwrap();
        assert_eq!(file.mime, "text/xml");
        assert!(matches!(file.content, FileContent::Memory(_)));
        assert!(file.redirect.is_none());
    }

    #[tokio::test]
    async fn directory_exact_hit_redirects_to_default_document() {
        let dir = tempfile::tempdir().unwrap();
        write_file(&dir, "index.html", b"<html/>").await;

        let mut cache = FileCache::new(DEFAULT_MAX_CACHED_SIZE, DEFAULT_MIN_COMPRESS_SIZE);
        cache.register_directory("/static", dir.path(), "index.html");

        let file = cache.get("/static", false).await.unwrap().unwrap();
        assert_eq!(file.redirect.as_deref(), Some("/static/index.html"));
    }

    #[tokio::test]
    async fn directory_file_lookup_resolves_nested_path() {
        let dir = tempfile::tempdir().unwrap();
        write_file(&dir, "site.css", b"body{}").await;

        let mut cache = FileCache::new(DEFAULT_MAX_CACHED_SIZE, DEFAULT_MIN_COMPRESS_SIZE);
        cache.register_directory("/static", dir.path(), "index.html");

        let file = cache.get("/static/site.css", false).await.unwrap().unwrap();
        assert_eq!(file.mime, "text/css");
    }

    #[tokio::test]
    async fn missing_file_returns_none() {
        let cache = FileCache::new(DEFAULT_MAX_CACHED_SIZE, DEFAULT_MIN_COMPRESS_SIZE);
        assert!(cache.get("/nope", false).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn gzip_is_lazy_and_only_built_when_accepted_and_large_enough() {
        let dir = tempfile::tempdir().unwrap();
        let big = vec![b'x'; 4096];
        let path = write_file(&dir, "big.xml", &big).await;

        let mut cache = FileCache::new(DEFAULT_MAX_CACHED_SIZE, 1024);
        cache.register_file("/big.xml", path);

        let file = cache.get("/big.xml", false).await.unwrap().unwrap();
        assert!(file.gzip.is_none());

        let file = cache.get("/big.xml", true).await.unwrap().unwrap();
        assert!(file.gzip.is_some());
    }

    #[tokio::test]
    async fn modifying_file_invalidates_cached_entry() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "probe.xsd", b"<xsd/>").await;

        let mut cache = FileCache::new(DEFAULT_MAX_CACHED_SIZE, DEFAULT_MIN_COMPRESS_SIZE);
        cache.register_file("/probe.xsd", path.clone());

        let first = cache.get("/probe.xsd", false).await.unwrap().unwrap();
        assert_eq!(first.size, 6);

        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        std::fs::write(&path, b"<xsd-v2-longer/>").unwrap();

        let second = cache.get("/probe.xsd", false).await.unwrap().unwrap();
        assert_ne!(second.last_write_time, first.last_write_time);
        assert_eq!(second.size, 16);
    }
}
