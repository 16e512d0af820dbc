use axum::Router;

pub mod blobs;

use crate::ServiceState;

pub fn router(state: ServiceState) -> Router<ServiceState> {
    Router::new()
        .merge(blobs::router(state.clone()))
        .with_state(state)
}
