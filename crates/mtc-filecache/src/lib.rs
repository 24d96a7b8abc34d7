//! Path -> bytes file/schema cache with lazy gzip companions (spec.md §4.5).

pub mod cache;
pub mod mime;

pub use cache::{CachedFile, FileCache, FileContent, DEFAULT_MAX_CACHED_SIZE, DEFAULT_MIN_COMPRESS_SIZE};
pub use mime::MimeRegistry;
