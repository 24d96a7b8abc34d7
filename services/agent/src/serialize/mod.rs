//! Wire serialization: XML (hand-rolled builder, spec.md §4.4) and JSON (v1
//! and v2 dialects) both rendering from the shared [`common::ObsRender`]
//! grouping produced during buffer/checkpoint reads.
//!
//! There is no `quick-xml`-style typed writer in this workspace: nothing in
//! the retrieved reference pack demonstrates one beyond a bare manifest
//! entry, so the builder here is a small string-based escaper/indenter in
//! the same spirit as the rest of this crate's plain-`String` rendering
//! (see `DESIGN.md` for the fuller rationale).

pub mod common;
pub mod json;
pub mod xml;

pub use common::{ComponentGroup, DeviceGroup, DocumentFamily, Header, ObsRender};
