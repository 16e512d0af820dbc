use axum::extract::{OriginalUri, RawQuery, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::Serialize;
use serde_json::Value;
use url::Url;

use super::query::{self, CONTINUATION_PARAM};
use super::response;
use crate::http::error::ApiError;
use crate::ServiceState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResponse {
    pub items: Vec<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_link: Option<String>,
}

/// Search blobs by tag, newest first.
pub async fn handler(
    State(state): State<ServiceState>,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
    RawQuery(raw_query): RawQuery,
) -> Result<Json<SearchResponse>, ApiError> {
    let search = query::search_query(raw_query.as_deref())?;
    let page = state.index().search(&search).await?;

    let base = response::base_url(&headers);
    let items = page
        .items
        .iter()
        .map(|info| response::blob_json(&base, info))
        .collect();

    let next_link = page
        .next
        .map(|token| next_link(&base, uri.path(), raw_query.as_deref(), token.as_str()));

    Ok(Json(SearchResponse { items, next_link }))
}

/// The request URL with `_ct` replaced by `token`.
fn next_link(base: &Url, path: &str, raw_query: Option<&str>, token: &str) -> String {
    let mut url = base.clone();
    url.set_path(path);

    let pairs: Vec<(String, String)> =
        url::form_urlencoded::parse(raw_query.unwrap_or_default().as_bytes())
            .into_owned()
            .filter(|(name, _)| !name.eq_ignore_ascii_case(CONTINUATION_PARAM))
            .collect();
    url.query_pairs_mut()
        .clear()
        .extend_pairs(pairs)
        .append_pair(CONTINUATION_PARAM, token);

    url.to_string()
}
