//! Music getters blending addon sources into platform results.

use serde_json::Value;
use tracing::debug;

use crate::addons::{
    GetMyLibrary, GetReleaseData, LibraryQuery, MergeResult, ReleaseQuery, Search, SearchQuery,
    process, sort_by_key_desc, split_limit, standard_list_merge,
};
use crate::error::{Error, Result};
use crate::gateway::RequestSpec;
use crate::runtime::Runtime;

/// The signed-in user's library, merged with every `getMyLibrary` addon.
///
/// The requested `limit` is shared evenly between the platform and the
/// addons. Tracks come back most recently liked first.
pub async fn my_library(runtime: &Runtime, query: LibraryQuery) -> Result<MergeResult> {
    let addons = runtime.addons().get_by_operation::<GetMyLibrary>().len();
    let limit = split_limit(query.limit, addons);
    debug!(addons, limit, "Fetching library");

    let mut spec = RequestSpec::get("/music/my/library")
        .query("limit", limit)
        .query("offset", query.offset)
        .query("order", query.order.as_str());
    if let Some(kind) = &query.kind {
        spec = spec.query("kind", kind);
    }
    let baseline = MergeResult::from_value(runtime.request(spec).await?.data);

    let args = LibraryQuery {
        limit,
        kind: None,
        ..query
    };
    let mut results =
        process::<GetMyLibrary, _>(runtime.addons(), baseline, &args, standard_list_merge).await;

    if let Some(tracks) = results.get_mut("tracks") {
        sort_by_key_desc(tracks, "liked_at");
    }
    Ok(results)
}

/// Keyword search, merged with every `search` addon.
pub async fn search(runtime: &Runtime, query: SearchQuery) -> Result<MergeResult> {
    let addons = runtime.addons().get_by_operation::<Search>().len();
    let limit = split_limit(query.limit, addons);

    let spec = RequestSpec::get("/search")
        .query("keywords", &query.keywords)
        .query("limit", limit);
    let baseline = MergeResult::from_value(runtime.request(spec).await?.data);

    let args = SearchQuery { limit, ..query };
    Ok(process::<Search, _>(runtime.addons(), baseline, &args, standard_list_merge).await)
}

/// Data of one release, from the platform or from the addon named in
/// `query.service`.
pub async fn release_data(runtime: &Runtime, query: ReleaseQuery) -> Result<Value> {
    if let Some(service) = &query.service {
        if runtime.addons().get(service).is_none() {
            return Err(Error::other(format!(
                "Service {service} not found. Maybe is loading yet..."
            )));
        }
        let provider = runtime
            .addons()
            .provider::<GetReleaseData>(service)
            .ok_or_else(|| {
                Error::other(format!(
                    "Service {service} does not support \"getReleaseData\" operation"
                ))
            })?;
        return provider.invoke(&query).await;
    }

    let mut spec = RequestSpec::get(format!("/music/releases/{}/data", query.id));
    if let Some(limit) = query.limit {
        spec = spec.query("limit", limit);
    }
    if let Some(offset) = query.offset {
        spec = spec.query("offset", offset);
    }
    Ok(runtime.request(spec).await?.data)
}
