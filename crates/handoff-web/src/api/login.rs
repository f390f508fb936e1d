use axum::extract::{Path, State};
use axum::http::Uri;
use axum::response::{IntoResponse, Response};
use axum::Json;
use handoff_core::IssueError;

use crate::dto::{LoginEndpointResponse, PasswordResponse};
use crate::error::AppError;
use crate::state::AppState;
use crate::static_files::static_handler;

pub async fn get_login_endpoint(
    State(state): State<AppState>,
    Path(username): Path<String>,
    uri: Uri,
) -> Result<Response, AppError> {
    match state.broker.issue_token(&username) {
        Ok(issued) => Ok(Json(LoginEndpointResponse {
            endpoint_id: issued.token,
            timeout: issued.expires_at_ms,
        })
        .into_response()),
        Err(IssueError::UnknownUser(_)) => Ok(static_handler(uri).await),
        Err(e) => Err(e.into()),
    }
}

pub async fn login(
    State(state): State<AppState>,
    Path(id): Path<String>,
    uri: Uri,
) -> Response {
    match state.broker.redeem(&id) {
        Ok(password) => Json(PasswordResponse { password }).into_response(),
        Err(reason) => {
            tracing::debug!("Login endpoint declined: {reason}");
            static_handler(uri).await
        }
    }
}
