//! End-to-end tests of the blob API over an in-memory index and store.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::response::Response;
use axum::Router;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tower::ServiceExt;

use common::blob::{BlobInfo, BlobKey, BlobTags};
use common::error::{BlobStoreError, IndexError};
use common::index::{MetadataIndex, SearchPage, SearchQuery};
use common::store::BlobStore;
use service::ServiceState;
use stash_object_store::{ObjectBlobStore, SqliteIndex};

const HOST: &str = "stash.test";

async fn app() -> Router {
    let index = SqliteIndex::in_memory().await.unwrap();
    let state = ServiceState::new(Arc::new(index), Arc::new(ObjectBlobStore::memory()));
    service::http::router(state)
}

async fn get(app: &Router, uri: &str) -> Response {
    let request = Request::get(uri)
        .header(header::HOST, HOST)
        .body(Body::empty())
        .unwrap();
    app.clone().oneshot(request).await.unwrap()
}

async fn post(app: &Router, query: &str, content_type: &str, body: impl Into<Body>) -> Response {
    let request = Request::post(format!("/v1/blobs/data?{}", query))
        .header(header::HOST, HOST)
        .header(header::CONTENT_TYPE, content_type)
        .body(body.into())
        .unwrap();
    app.clone().oneshot(request).await.unwrap()
}

async fn body_bytes(response: Response) -> Vec<u8> {
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
        .to_vec()
}

async fn body_json(response: Response) -> Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

/// Path and query of an absolute URL returned by the API.
fn local_path(url: &str) -> String {
    let url = url::Url::parse(url).unwrap();
    assert_eq!(url.host_str(), Some(HOST));
    match url.query() {
        Some(query) => format!("{}?{}", url.path(), query),
        None => url.path().to_string(),
    }
}

async fn create(app: &Router, query: &str, body: &'static [u8]) -> Value {
    let response = post(app, query, "text/plain", body).await;
    assert_eq!(response.status(), StatusCode::CREATED);
    body_json(response).await
}

#[tokio::test]
async fn test_create_then_read() {
    let app = app().await;

    let response = post(
        &app,
        "subject=patient%201&device=scanner&Kind=a&kind=b",
        "text/plain",
        &b"hello"[..],
    )
    .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let location = response.headers()[header::LOCATION]
        .to_str()
        .unwrap()
        .to_string();
    let created = body_json(response).await;
    assert_eq!(created["location"], location.as_str());
    assert_eq!(created["subject"], "patient 1");
    assert_eq!(created["device"], "scanner");
    assert_eq!(created["contentType"], "text/plain");
    assert_eq!(created["kind"], serde_json::json!(["a", "b"]));

    let response = get(&app, &local_path(&location)).await;
    assert_eq!(response.status(), StatusCode::OK);
    let metadata = body_json(response).await;
    assert_eq!(metadata, created);

    let response = get(&app, &local_path(created["data"].as_str().unwrap())).await;
    assert_eq!(response.status(), StatusCode::OK);
    let headers = response.headers().clone();
    assert_eq!(headers[header::CONTENT_TYPE], "text/plain");
    assert_eq!(headers["stash-tag-subject"], "patient 1");
    assert_eq!(headers["stash-tag-device"], "scanner");
    assert_eq!(headers.get_all("stash-tag-kind").iter().count(), 2);
    assert!(headers.contains_key(header::LAST_MODIFIED));
    assert!(!headers.contains_key(header::EXPIRES));
    assert_eq!(body_bytes(response).await, b"hello");
}

#[tokio::test]
async fn test_invalid_tags_are_rejected() {
    let app = app().await;

    let response = post(&app, "device=scanner", "text/plain", &b"x"[..]).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error"]["code"], "InvalidTag");

    let response = post(&app, "subject=a&subject=b", "text/plain", &b"x"[..]).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error"]["code"], "InvalidSubject");

    let response = post(&app, "subject=a&_ttl=-1s", "text/plain", &b"x"[..]).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error"]["code"], "InvalidTag");

    let response = post(&app, "subject=a&1bad=x", "text/plain", &b"x"[..]).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    // nothing was written
    let response = get(&app, "/v1/blobs?subject=a").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["items"], serde_json::json!([]));
}

#[tokio::test]
async fn test_search_pages_through_results() {
    let app = app().await;

    let mut created = BTreeSet::new();
    for body in [&b"one"[..], b"two", b"three"] {
        let blob = create(&app, "subject=s&batch=1", body).await;
        created.insert(blob["location"].as_str().unwrap().to_string());
    }
    create(&app, "subject=s&batch=2", b"other").await;
    create(&app, "subject=t&batch=1", b"other").await;

    let response = get(&app, "/v1/blobs?subject=s&batch=1&_limit=2").await;
    assert_eq!(response.status(), StatusCode::OK);
    let first = body_json(response).await;
    assert_eq!(first["items"].as_array().unwrap().len(), 2);
    let next_link = first["nextLink"].as_str().unwrap();
    assert!(next_link.contains("_limit=2"));

    let response = get(&app, &local_path(next_link)).await;
    assert_eq!(response.status(), StatusCode::OK);
    let second = body_json(response).await;
    assert_eq!(second["items"].as_array().unwrap().len(), 1);
    assert!(second.get("nextLink").is_none());

    let found: BTreeSet<String> = first["items"]
        .as_array()
        .unwrap()
        .iter()
        .chain(second["items"].as_array().unwrap())
        .map(|item| item["location"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(found, created);
}

#[tokio::test]
async fn test_search_rejects_bad_queries() {
    let app = app().await;

    let response = get(&app, "/v1/blobs?name=x").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error"]["code"], "InvalidQuery");

    let response = get(&app, "/v1/blobs?subject=s&_ct=not-a-token").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        body_json(response).await["error"]["code"],
        "InvalidContinuationToken"
    );

    let response = get(&app, "/v1/blobs?subject=s&_at=yesterday").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error"]["code"], "InvalidParameter");
}

#[tokio::test]
async fn test_latest_returns_newest_payload() {
    let app = app().await;

    let response = get(&app, "/v1/blobs/data/latest?subject=s").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(response).await["error"]["code"], "EmptyResults");

    create(&app, "subject=s&name=report", b"old").await;
    tokio::time::sleep(Duration::from_millis(5)).await;
    let newest = create(&app, "subject=s&name=report", b"new").await;
    create(&app, "subject=s&name=other", b"unrelated").await;

    let response = get(&app, "/v1/blobs/data/latest?subject=s&name=report").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::LOCATION],
        newest["location"].as_str().unwrap()
    );
    assert_eq!(response.headers()["stash-tag-name"], "report");
    assert_eq!(body_bytes(response).await, b"new");
}

#[tokio::test]
async fn test_expired_blob_disappears() {
    let app = app().await;

    let blob = create(&app, "subject=s&ttl=100ms", b"short lived").await;
    assert!(blob.get("ttl").is_none());
    assert!(blob.get("expires").is_some());
    let location = local_path(blob["location"].as_str().unwrap());

    let response = get(&app, &location).await;
    assert_eq!(response.status(), StatusCode::OK);

    tokio::time::sleep(Duration::from_millis(300)).await;

    let response = get(&app, &location).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let response = get(&app, "/v1/blobs?subject=s").await;
    assert_eq!(body_json(response).await["items"], serde_json::json!([]));
}

#[tokio::test]
async fn test_unknown_blobs_and_routes() {
    let app = app().await;

    let response = get(
        &app,
        "/v1/blobs/f1d0a8a4-6f77-4c1e-a1b0-0d6c6c2e6a11-nobody",
    )
    .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = get(&app, "/v1/blobs/not-a-combined-id/data").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let request = Request::get("/nowhere")
        .header(header::ACCEPT, "application/json")
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(response).await["error"]["code"], "NotFound");
}

#[tokio::test]
async fn test_health_routes() {
    let app = app().await;

    let response = get(&app, "/healthcheck").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["status"], "ok");

    let response = get(&app, "/_status/readiness").await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = get(&app, "/_status/version").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(body_json(response).await.get("build_profile").is_some());
}

/// Memory store whose writes or reads can be made to fail.
struct FaultyStore {
    inner: ObjectBlobStore,
    fail_save: bool,
    fail_read: bool,
    saves: AtomicUsize,
}

impl FaultyStore {
    fn new(fail_save: bool, fail_read: bool) -> Arc<Self> {
        Arc::new(Self {
            inner: ObjectBlobStore::memory(),
            fail_save,
            fail_read,
            saves: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl BlobStore for FaultyStore {
    async fn save(
        &self,
        key: &BlobKey,
        contents: &mut (dyn AsyncRead + Send + Unpin),
    ) -> Result<(), BlobStoreError> {
        self.saves.fetch_add(1, Ordering::SeqCst);
        if self.fail_save {
            return Err(BlobStoreError::Unavailable);
        }
        self.inner.save(key, contents).await
    }

    async fn read(
        &self,
        key: &BlobKey,
        writer: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> Result<(), BlobStoreError> {
        if self.fail_read {
            return Err(BlobStoreError::Unavailable);
        }
        self.inner.read(key, writer).await
    }

    async fn delete(&self, key: &BlobKey) -> Result<(), BlobStoreError> {
        self.inner.delete(key).await
    }

    async fn health_check(&self) -> Result<(), BlobStoreError> {
        Ok(())
    }
}

/// Index that cannot stage anything.
struct StagingFailsIndex;

#[async_trait]
impl MetadataIndex for StagingFailsIndex {
    async fn stage(&self, _: &BlobKey, _: &BlobTags) -> Result<BlobInfo, IndexError> {
        Err(IndexError::Unavailable)
    }
    async fn complete(&self, _: &BlobKey) -> Result<(), IndexError> {
        Err(IndexError::StagedRecordNotFound)
    }
    async fn revert(&self, _: &BlobKey) -> Result<(), IndexError> {
        Err(IndexError::StagedRecordNotFound)
    }
    async fn delete(&self, _: &BlobKey) -> Result<(), IndexError> {
        Err(IndexError::RecordNotFound)
    }
    async fn get(&self, _: &BlobKey, _: DateTime<Utc>) -> Result<BlobInfo, IndexError> {
        Err(IndexError::RecordNotFound)
    }
    async fn search(&self, _: &SearchQuery) -> Result<SearchPage, IndexError> {
        Ok(SearchPage::default())
    }
    async fn scan_stale_or_expired(
        &self,
        _: DateTime<Utc>,
        _: usize,
    ) -> Result<Vec<BlobKey>, IndexError> {
        Ok(vec![])
    }
    async fn health_check(&self) -> Result<(), IndexError> {
        Ok(())
    }
}

#[tokio::test]
async fn test_failed_write_reverts_staged_metadata() {
    let index = Arc::new(SqliteIndex::in_memory().await.unwrap());
    let store = FaultyStore::new(true, false);
    let app = service::http::router(ServiceState::new(index.clone(), store.clone()));

    let response = post(&app, "subject=s&name=doomed", "text/plain", &b"payload"[..]).await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body_json(response).await["error"]["code"], "InternalError");
    assert_eq!(store.saves.load(Ordering::SeqCst), 1);

    // no staged record is left for the collector, and nothing became visible
    let far_future = Utc::now() + chrono::Duration::days(365);
    let leftovers = index.scan_stale_or_expired(far_future, 10).await.unwrap();
    assert!(leftovers.is_empty());

    let response = get(&app, "/v1/blobs?subject=s").await;
    assert_eq!(body_json(response).await["items"], serde_json::json!([]));
}

#[tokio::test]
async fn test_failed_staging_never_writes_payload() {
    let store = FaultyStore::new(false, false);
    let app = service::http::router(ServiceState::new(Arc::new(StagingFailsIndex), store.clone()));

    let response = post(&app, "subject=s", "text/plain", &b"payload"[..]).await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(store.saves.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_large_payload_round_trip() {
    let app = app().await;
    let payload: Vec<u8> = (0..(3 * 1024 * 1024 + 17)).map(|i| (i % 251) as u8).collect();

    let response = post(&app, "subject=big", "application/octet-stream", payload.clone()).await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let created = body_json(response).await;

    let response = get(&app, &local_path(created["data"].as_str().unwrap())).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_bytes(response).await, payload);
}

#[tokio::test]
async fn test_empty_payload_round_trip() {
    let app = app().await;

    let created = create(&app, "subject=s", b"").await;
    let response = get(&app, &local_path(created["data"].as_str().unwrap())).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(body_bytes(response).await.is_empty());
}

#[tokio::test]
async fn test_unreadable_payload_is_an_error() {
    let index = Arc::new(SqliteIndex::in_memory().await.unwrap());
    let store = FaultyStore::new(false, true);
    let app = service::http::router(ServiceState::new(index, store));

    let created = create(&app, "subject=s", b"hidden").await;
    let response = get(&app, &local_path(created["data"].as_str().unwrap())).await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
}
