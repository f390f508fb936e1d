use std::any::Any;
use std::panic::{self, Location};

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use handoff_core::IssueError;
use serde::Serialize;

const OPAQUE_MESSAGE: &str = "An unexpected error occurred.";
const UNKNOWN_PANIC_MESSAGE: &str =
    "An unknown error occurred. See the logs for more information.";

/// Unexpected failure while handling a request. Always rendered as a 500.
#[derive(Debug)]
pub enum AppError {
    /// Issuance failed for a reason other than an unknown user.
    Issue(IssueError),
}

/// Error details attached to a 500 response. Only rendered into the body
/// when [`expose_error_details`] is installed (development mode).
#[derive(Debug, Clone, Serialize)]
pub struct ErrorDetail {
    pub message: String,
    pub name: String,
}

#[derive(Serialize)]
#[serde(untagged)]
enum ErrorEntry {
    Opaque(&'static str),
    Detailed(ErrorDetail),
}

#[derive(Serialize)]
struct ErrorBody {
    errors: Vec<ErrorEntry>,
}

fn internal_server_error(detail: ErrorDetail) -> Response {
    let body = ErrorBody {
        errors: vec![ErrorEntry::Opaque(OPAQUE_MESSAGE)],
    };
    let mut response = (StatusCode::INTERNAL_SERVER_ERROR, axum::Json(body)).into_response();
    response.extensions_mut().insert(detail);
    response
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            AppError::Issue(e) => {
                tracing::error!("Token issuance failed: {e}");
                internal_server_error(ErrorDetail {
                    message: e.to_string(),
                    name: "IssueError".to_string(),
                })
            }
        }
    }
}

impl From<IssueError> for AppError {
    fn from(e: IssueError) -> Self {
        AppError::Issue(e)
    }
}

/// Extracts the message from a panic payload, if it is a string.
pub fn panic_message(payload: &(dyn Any + Send)) -> Option<String> {
    if let Some(s) = payload.downcast_ref::<&str>() {
        Some(s.to_string())
    } else {
        payload.downcast_ref::<String>().cloned()
    }
}

/// Formats a panic for the fatal log line.
fn panic_report(location: Option<&Location<'_>>, payload: &(dyn Any + Send)) -> String {
    let location = location
        .map(|l| format!("{}:{}", l.file(), l.line()))
        .unwrap_or_else(|| "an unknown location".to_string());
    let message = panic_message(payload).unwrap_or_else(|| "<non-string payload>".to_string());
    format!("An uncaught panic occurred at {location}: {message}")
}

/// Logs every panic at `error` before handing it to the previous hook, so
/// panics outside request handlers also reach the log file.
pub fn install_panic_hook() {
    let original_hook = panic::take_hook();
    panic::set_hook(Box::new(move |panic_info| {
        tracing::error!("{}", panic_report(panic_info.location(), panic_info.payload()));
        original_hook(panic_info);
    }));
}

/// Converts a handler panic into the same 500 response as [`AppError`].
pub fn panic_response(payload: Box<dyn Any + Send + 'static>) -> Response {
    let message = panic_message(payload.as_ref());

    tracing::error!(
        "Request handler panicked: {}",
        message.as_deref().unwrap_or("<non-string payload>")
    );

    internal_server_error(ErrorDetail {
        message: message.unwrap_or_else(|| UNKNOWN_PANIC_MESSAGE.to_string()),
        name: "Panic".to_string(),
    })
}

/// Replaces the opaque 500 body with the attached [`ErrorDetail`].
pub async fn expose_error_details(req: Request<Body>, next: Next) -> Response {
    let mut response = next.run(req).await;
    match response.extensions_mut().remove::<ErrorDetail>() {
        Some(detail) => {
            let body = ErrorBody {
                errors: vec![ErrorEntry::Detailed(detail)],
            };
            (response.status(), axum::Json(body)).into_response()
        }
        None => response,
    }
}
