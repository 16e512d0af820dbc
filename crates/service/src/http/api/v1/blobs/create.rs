use axum::body::Body;
use axum::extract::{RawQuery, State};
use axum::http::header::{CONTENT_TYPE, LOCATION};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures::TryStreamExt;
use tokio_util::io::StreamReader;

use common::blob::BlobKey;
use common::tags::parse_blob_tags;

use super::{query, response};
use crate::http::error::ApiError;
use crate::ServiceState;

/// Store a blob: the body is the payload, tags come from the query string.
///
/// Metadata is staged before the payload is written and completed after,
/// so a reader never sees a record without its payload.
pub async fn handler(
    State(state): State<ServiceState>,
    headers: HeaderMap,
    RawQuery(raw_query): RawQuery,
    body: Body,
) -> Result<Response, ApiError> {
    let content_type = headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok());
    let parsed = parse_blob_tags(query::tag_map(raw_query.as_deref()), content_type)?;

    let key = BlobKey::generate(parsed.subject);
    let info = state.index().stage(&key, &parsed.tags).await?;

    let mut payload = StreamReader::new(body.into_data_stream().map_err(std::io::Error::other));
    if let Err(e) = state.store().save(&key, &mut payload).await {
        tracing::error!(key = %key, error = %e, "failed to save blob");
        if let Err(revert) = state.index().revert(&key).await {
            tracing::error!(key = %key, error = %revert, "failed to revert staged blob metadata");
        }
        return Err(e.into());
    }

    state.index().complete(&key).await.map_err(|e| {
        tracing::error!(key = %key, error = %e, "failed to complete staged blob metadata");
        e
    })?;

    tracing::info!(key = %key, "blob created");

    let base = response::base_url(&headers);
    Ok((
        StatusCode::CREATED,
        [(LOCATION, response::location(&base, &key))],
        Json(response::blob_json(&base, &info)),
    )
        .into_response())
}
