//! The ordered routing table (spec.md §4.3): registration order is match
//! priority, so the file-cache fall-through must be registered last.

use std::collections::HashMap;

use mtc_model::AgentError;

use crate::param::{ParamType, ParamValue, QueryParamSpec};
use crate::path::PathPattern;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verb {
    Get,
    Put,
    Post,
    Delete,
}

pub struct Routing<H> {
    pub verb: Verb,
    pub pattern: PathPattern,
    pub query_spec: Vec<QueryParamSpec>,
    pub handler: H,
}

/// The result of a successful dispatch: the matched handler plus every
/// path and query parameter already bound/coerced.
pub struct Matched<'a, H> {
    pub handler: &'a H,
    pub path_params: HashMap<String, String>,
    pub query_params: HashMap<String, ParamValue>,
}

pub struct RoutingTable<H> {
    routings: Vec<Routing<H>>,
    /// WebSocket-style command dispatch, bypassing path matching entirely
    /// (spec.md §4.3 step 1); unused by a plain HTTP deployment but kept so
    /// a transport that multiplexes commands over one connection can
    /// register into the same table.
    commands: HashMap<String, H>,
}

impl<H> Default for RoutingTable<H> {
    fn default() -> Self {
        Self {
            routings: Vec::new(),
            commands: HashMap::new(),
        }
    }
}

impl<H> RoutingTable<H> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, verb: Verb, pattern: &str, query_spec: Vec<QueryParamSpec>, handler: H) {
        self.routings.push(Routing {
            verb,
            pattern: PathPattern::compile(pattern),
            query_spec,
            handler,
        });
    }

    pub fn register_command(&mut self, command: impl Into<String>, handler: H) {
        self.commands.insert(command.into(), handler);
    }

    pub fn dispatch_command(&self, command: &str) -> Option<&H> {
        self.commands.get(command)
    }

    /// Find the first routing (in registration order) whose verb and path
    /// pattern match, bind its path captures, and coerce its declared query
    /// parameters. A path/verb match always wins the dispatch even if query
    /// coercion subsequently fails — coercion errors are reported, the
    /// router never falls through to a later routing to dodge one.
    pub fn dispatch(
        &self,
        verb: Verb,
        path: &str,
        raw_query: &HashMap<String, String>,
    ) -> Result<Matched<'_, H>, AgentError> {
        for routing in &self.routings {
            if routing.verb != verb {
                continue;
            }
            let Some(path_params) = routing.pattern.matches(path) else {
                continue;
            };
            let path_params: HashMap<String, String> = path_params.into_iter().collect();

            let mut query_params = HashMap::new();
            for spec in &routing.query_spec {
                let raw = raw_query.get(&spec.name).cloned().or_else(|| spec.default.clone());
                if let Some(raw) = raw {
                    let value = spec.param_type.coerce(&spec.name, &raw)?;
                    query_params.insert(spec.name.clone(), value);
                }
            }

            return Ok(Matched {
                handler: &routing.handler,
                path_params,
                query_params,
            });
        }

        Err(AgentError::invalid_uri(path))
    }
}

// Re-exported so callers building specs don't need to import `ParamType`
// from a separate module just to call `QueryParamSpec::new`.
pub use crate::param::ParamType as QueryParamType;
