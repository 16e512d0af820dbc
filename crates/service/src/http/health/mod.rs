use axum::routing::get;
use axum::Router;

use crate::ServiceState;

pub mod data_source;
pub mod readiness;
pub mod version;

pub fn router(state: ServiceState) -> Router<ServiceState> {
    Router::new()
        .route("/readiness", get(readiness::handler))
        .route("/version", get(version::handler))
        .with_state(state)
}
