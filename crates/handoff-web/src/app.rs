use axum::middleware::{from_fn, from_fn_with_state};
use axum::Router;
use tower_http::catch_panic::CatchPanicLayer;

use crate::middleware::request_log::request_log;
use crate::state::AppState;
use crate::{api, error, static_files};

pub fn build_app(state: AppState) -> Router {
    let routes = api::router().fallback(static_files::static_handler);
    with_layers(routes, state)
}

/// Wraps `routes` with panic recovery, the development-only error detail
/// layer, and request logging.
fn with_layers(routes: Router<AppState>, state: AppState) -> Router {
    let routes = routes.layer(CatchPanicLayer::custom(error::panic_response));

    let routes = if state.config.is_development() {
        routes.layer(from_fn(error::expose_error_details))
    } else {
        routes
    };

    routes
        .layer(from_fn_with_state(state.clone(), request_log))
        .with_state(state)
}
