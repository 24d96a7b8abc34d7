//! Crate root for the MTConnect agent observation-serving core.
//!
//! The actual implementation lives in the workspace's library crates
//! (`mtc-model`, `mtc-buffer`, `mtc-router`, `mtc-filecache`) and the
//! `agent` service crate that assembles them into an HTTP server; this
//! root crate exists only to hold the workspace-wide integration test
//! suites under `tests/integration/` and re-export the pieces they drive
//! against.

pub use agent;
pub use mtc_buffer;
pub use mtc_model;
