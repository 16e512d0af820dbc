use axum::Router;

pub mod v1;

use crate::ServiceState;

pub fn router(state: ServiceState) -> Router<ServiceState> {
    Router::new().merge(v1::router(state.clone())).with_state(state)
}
