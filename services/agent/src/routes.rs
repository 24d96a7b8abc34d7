//! The URI routing table (spec.md §4.3): registration order is dispatch
//! priority, so every concrete route must be registered before the
//! file-cache fallthrough.

use mtc_router::{ParamType, QueryParamSpec, RoutingTable, Verb};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteKind {
    Probe,
    Current,
    Sample,
    AssetsList,
    AssetById,
    PutAsset,
    DeleteAsset,
    DeleteAssetsScoped,
    PutObservation,
    Cancel,
    FileCache,
}

pub fn build_routing_table() -> RoutingTable<RouteKind> {
    let mut table = RoutingTable::new();

    table.register(Verb::Get, "/probe", vec![], RouteKind::Probe);
    table.register(Verb::Get, "/{device}/probe", vec![], RouteKind::Probe);
    table.register(Verb::Get, "/", vec![], RouteKind::Probe);

    let current_query = vec![
        QueryParamSpec::new("at", ParamType::UnsignedInteger),
        QueryParamSpec::new("path", ParamType::String),
        QueryParamSpec::new("interval", ParamType::Integer),
        QueryParamSpec::new("heartbeat", ParamType::Integer).with_default("10000"),
    ];
    table.register(Verb::Get, "/current", current_query.clone(), RouteKind::Current);
    table.register(Verb::Get, "/{device}/current", current_query, RouteKind::Current);

    let sample_query = vec![
        QueryParamSpec::new("from", ParamType::UnsignedInteger),
        QueryParamSpec::new("to", ParamType::UnsignedInteger),
        QueryParamSpec::new("count", ParamType::Integer).with_default("100"),
        QueryParamSpec::new("path", ParamType::String),
        QueryParamSpec::new("interval", ParamType::Integer),
        QueryParamSpec::new("heartbeat", ParamType::Integer).with_default("10000"),
    ];
    table.register(Verb::Get, "/sample", sample_query.clone(), RouteKind::Sample);
    table.register(Verb::Get, "/{device}/sample", sample_query, RouteKind::Sample);

    let assets_query = vec![
        QueryParamSpec::new("device", ParamType::String),
        QueryParamSpec::new("type", ParamType::String),
        QueryParamSpec::new("count", ParamType::UnsignedInteger).with_default("100"),
        QueryParamSpec::new("removed", ParamType::Bool).with_default("false"),
    ];
    table.register(Verb::Get, "/assets", assets_query.clone(), RouteKind::AssetsList);
    table.register(Verb::Get, "/asset", assets_query.clone(), RouteKind::AssetsList);
    table.register(Verb::Get, "/{device}/assets", assets_query.clone(), RouteKind::AssetsList);
    table.register(Verb::Get, "/{device}/asset", assets_query, RouteKind::AssetsList);
    table.register(Verb::Get, "/asset/{assetIds}", vec![], RouteKind::AssetById);
    table.register(Verb::Get, "/assets/{assetIds}", vec![], RouteKind::AssetById);

    table.register(Verb::Put, "/asset/{assetId}", vec![], RouteKind::PutAsset);
    table.register(Verb::Post, "/asset/{assetId}", vec![], RouteKind::PutAsset);
    // assetId is optional on this form (spec.md §4.3): the id comes from the
    // `assetId` query parameter instead, see `handle_put_asset`.
    table.register(Verb::Put, "/asset", vec![], RouteKind::PutAsset);
    table.register(Verb::Post, "/asset", vec![], RouteKind::PutAsset);

    table.register(Verb::Delete, "/asset/{assetId}", vec![], RouteKind::DeleteAsset);
    let delete_scoped_query = vec![
        QueryParamSpec::new("device", ParamType::String),
        QueryParamSpec::new("type", ParamType::String),
    ];
    // spec.md §4.3: `DELETE /asset?...` (singular, scoped by query) alongside
    // the plural form — both resolve to the same scoped-removal handler.
    table.register(Verb::Delete, "/asset", delete_scoped_query.clone(), RouteKind::DeleteAssetsScoped);
    table.register(Verb::Delete, "/assets", delete_scoped_query, RouteKind::DeleteAssetsScoped);

    // spec.md §4.3 routing table: `/cancel/id={string}` — the request id is
    // embedded in the path segment itself, not a query parameter.
    table.register(Verb::Get, "/cancel/id={requestId}", vec![], RouteKind::Cancel);

    table.register(Verb::Put, "/{device}", vec![], RouteKind::PutObservation);
    table.register(Verb::Post, "/{device}", vec![], RouteKind::PutObservation);
    table.register(Verb::Put, "/", vec![], RouteKind::PutObservation);
    table.register(Verb::Post, "/", vec![], RouteKind::PutObservation);

    // Every other GET on a single path segment (current, sample, assets,
    // cancel, ...) was registered above and wins first; this is the
    // catch-all "probe a named device" form (spec.md §4.3).
    table.register(Verb::Get, "/{device}", vec![], RouteKind::Probe);

    // Must stay last: a bare regex fallthrough would otherwise shadow every
    // route registered after it (spec.md §4.3 "registration order wins").
    table.register(Verb::Get, "/.+", vec![], RouteKind::FileCache);

    table
}
