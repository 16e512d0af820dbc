use axum::routing::{get, post};
use axum::Router;

use crate::ServiceState;

pub mod create;
pub mod latest;
pub mod read;
pub mod response;
pub mod search;

mod query;

pub use response::TAG_HEADER_PREFIX;

/// Mount point of the blob routes.
pub const BLOBS_PATH: &str = "/v1/blobs";

pub fn router(state: ServiceState) -> Router<ServiceState> {
    Router::new()
        .route(BLOBS_PATH, get(search::handler))
        .route(&format!("{BLOBS_PATH}/"), get(search::handler))
        .route(&format!("{BLOBS_PATH}/data"), post(create::handler))
        .route(&format!("{BLOBS_PATH}/data/latest"), get(latest::handler))
        .route(&format!("{BLOBS_PATH}/:combined_id"), get(read::metadata_handler))
        .route(&format!("{BLOBS_PATH}/:combined_id/data"), get(read::data_handler))
        .with_state(state)
}
