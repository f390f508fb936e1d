mod login;

use axum::routing::get;
use axum::Router;

use crate::state::AppState;

/// Broker routes. Both fall through to static file serving when the broker
/// declines, so an unknown user or a dead token looks like any missing page.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/getLoginEndpoint/{username}", get(login::get_login_endpoint))
        .route("/login/{id}", get(login::login))
}
