//! HTTP surface.
//!
//! - `POST /`: storage finalize event (bare object or push envelope)
//! - `GET  /healthz`: liveness
//! - `GET  /readyz`: readiness
//!
//! With the local backend, also:
//! - `PUT  /objects/{bucket}/{*key}`: store an object (fires a finalize event)
//! - `GET  /objects/{bucket}/{*key}`: read it back
//!
//! The wildcard `*key` allows nested keys like `photos/2025/img.jpg`.

use crate::{
    handlers::{
        event_handlers::receive_event,
        health_handlers::{healthz, readyz},
        object_handlers::{get_object, put_object},
    },
    state::AppState,
};
use axum::{
    Router,
    routing::{get, post, put},
};

/// Build the router. Object routes are mounted only when `local_enabled`.
pub fn routes(local_enabled: bool) -> Router<AppState> {
    let router = Router::new()
        .route("/", post(receive_event))
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz));

    if local_enabled {
        router.route("/objects/{bucket}/{*key}", put(put_object).get(get_object))
    } else {
        router
    }
}
