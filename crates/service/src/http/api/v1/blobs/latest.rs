use axum::extract::{RawQuery, State};
use axum::http::header::LOCATION;
use axum::http::{HeaderMap, HeaderValue};
use axum::response::Response;

use super::read::data_response;
use super::{query, response};
use crate::http::error::ApiError;
use crate::ServiceState;

/// Payload of the newest blob matching the query. The blob's metadata URL
/// is returned in `Location`.
pub async fn handler(
    State(state): State<ServiceState>,
    headers: HeaderMap,
    RawQuery(raw_query): RawQuery,
) -> Result<Response, ApiError> {
    let mut search = query::search_query(raw_query.as_deref())?.page_size(1);
    // always the newest match, whatever page a client was on
    search.continuation = None;

    let page = state.index().search(&search).await?;
    let latest = page.items.first().ok_or(ApiError::EmptyResults)?;

    let mut response = data_response(&state, latest).await?;
    let base = response::base_url(&headers);
    if let Ok(location) = HeaderValue::from_str(&response::location(&base, &latest.key)) {
        response.headers_mut().insert(LOCATION, location);
    }
    Ok(response)
}
