use axum::body::{Body, Bytes};
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use futures::stream::{self, StreamExt};
use tokio::task::JoinHandle;
use tokio_util::io::ReaderStream;

use common::blob::{BlobInfo, BlobKey};
use common::error::BlobStoreError;

use super::response;
use crate::http::error::ApiError;
use crate::ServiceState;

const STREAM_BUFFER_BYTES: usize = 64 * 1024;

async fn lookup(state: &ServiceState, combined_id: &str) -> Result<BlobInfo, ApiError> {
    let key = BlobKey::from_combined_id(combined_id).ok_or(ApiError::NotFound)?;
    Ok(state.index().get(&key, Utc::now()).await?)
}

/// Blob metadata as JSON.
pub async fn metadata_handler(
    State(state): State<ServiceState>,
    Path(combined_id): Path<String>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let info = lookup(&state, &combined_id).await?;
    let base = response::base_url(&headers);
    Ok(Json(response::blob_json(&base, &info)).into_response())
}

/// Blob payload, with its tags as headers.
pub async fn data_handler(
    State(state): State<ServiceState>,
    Path(combined_id): Path<String>,
) -> Result<Response, ApiError> {
    let info = lookup(&state, &combined_id).await?;
    data_response(&state, &info).await
}

/// Stream the payload into the response body.
///
/// The first chunk is awaited before answering, so a payload that cannot be
/// read at all is still reported with an error status. A failure after that
/// aborts the body.
pub(super) async fn data_response(state: &ServiceState, info: &BlobInfo) -> Result<Response, ApiError> {
    let (reader, mut writer) = tokio::io::duplex(STREAM_BUFFER_BYTES);
    let copy_state = state.clone();
    let key = info.key.clone();
    let copy: CopyTask = tokio::spawn(async move { copy_state.store().read(&key, &mut writer).await });

    let mut chunks = ReaderStream::with_capacity(reader, STREAM_BUFFER_BYTES);
    let first = match chunks.next().await {
        Some(chunk) => chunk.map_err(BlobStoreError::from)?,
        // nothing written: an empty payload, or a read that failed up front
        None => {
            finish(copy).await?;
            return Ok((StatusCode::OK, response::data_headers(info), Body::empty()).into_response());
        }
    };

    let key = info.key.clone();
    let trailer = stream::once(finish(copy)).filter_map(move |result| {
        let item = result.err().map(|e| {
            tracing::error!(key = %key, error = %e, "blob payload read failed mid-stream");
            Err::<Bytes, _>(std::io::Error::other(e))
        });
        async move { item }
    });
    let body = stream::once(async move { Ok(first) })
        .chain(chunks)
        .chain(trailer);

    Ok((StatusCode::OK, response::data_headers(info), Body::from_stream(body)).into_response())
}

type CopyTask = JoinHandle<Result<(), BlobStoreError>>;

async fn finish(copy: CopyTask) -> Result<(), BlobStoreError> {
    copy.await.map_err(BlobStoreError::backend)?
}
