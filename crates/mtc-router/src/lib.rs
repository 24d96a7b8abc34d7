//! URI pattern routing, query/path parameter coercion, and streaming
//! session bookkeeping (spec.md §4.3).

pub mod param;
pub mod path;
pub mod routing;
pub mod session;

pub use param::{ParamType, ParamValue, QueryParamSpec};
pub use path::PathPattern;
pub use routing::{Matched, Routing, RoutingTable, Verb};
pub use session::{SessionRegistry, StreamSession};
