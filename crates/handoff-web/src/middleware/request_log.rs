use std::io::IsTerminal;
use std::net::SocketAddr;
use std::time::Instant;

use axum::body::Body;
use axum::extract::{ConnectInfo, State};
use axum::http::{Request, StatusCode};
use axum::middleware::Next;
use axum::response::Response;
use crossterm::style::Stylize;

use crate::state::AppState;

/// Logs every finished request with client IP, method, URI, status and
/// elapsed time. Successful asset requests under `/js` and `/css` are skipped.
pub async fn request_log(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let started_at = Instant::now();
    let method = req.method().clone();
    let uri = req.uri().clone();
    let peer = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());
    let client_ip = super::client_ip::resolve(&state.config.trust_proxy, peer, req.headers())
        .unwrap_or_else(|| "unknown ip".to_string());

    let response = next.run(req).await;
    let status = response.status();

    if is_quiet_asset(uri.path()) && status.as_u16() < 400 {
        return response;
    }

    let elapsed_ms = started_at.elapsed().as_secs_f64() * 1e3;
    tracing::debug!(
        "\t{client_ip:<15} - {:<4} {uri} {} {elapsed_ms:.3}ms",
        method.as_str(),
        status_label(status, std::io::stdout().is_terminal())
    );
    response
}

fn is_quiet_asset(path: &str) -> bool {
    path.starts_with("/js") || path.starts_with("/css")
}

/// Status code, colored by class when writing to a terminal.
fn status_label(status: StatusCode, colored: bool) -> String {
    let code = status.as_u16().to_string();
    if !colored {
        return code;
    }
    match status.as_u16() {
        500.. => code.red().to_string(),
        400..=499 => code.yellow().to_string(),
        300..=399 => code.cyan().to_string(),
        200..=299 => code.green().to_string(),
        _ => code.white().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use axum::middleware::from_fn_with_state;
    use axum::routing::get;
    use axum::Router;
    use handoff_core::{BrokerConfig, CredentialDirectory, CredentialRecord, TokenBroker};
    use tower::ServiceExt;

    use crate::config::ServerConfig;
    use crate::test_support::CapturedLogs;

    fn app() -> Router {
        let directory = CredentialDirectory::from_records(Vec::<CredentialRecord>::new()).unwrap();
        let state = AppState {
            config: Arc::new(ServerConfig::default()),
            broker: Arc::new(TokenBroker::new(
                Arc::new(directory),
                BrokerConfig::default(),
            )),
        };
        Router::new()
            .route("/css/style.css", get(|| async { "body {}" }))
            .route("/js/broken.js", get(|| async { StatusCode::INTERNAL_SERVER_ERROR }))
            .layer(from_fn_with_state(state.clone(), request_log))
            .with_state(state)
    }

    async fn get_uri(app: &Router, uri: &str) -> StatusCode {
        app.clone()
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap()
            .status()
    }

    #[test]
    fn asset_paths_are_quiet() {
        assert!(is_quiet_asset("/js/app.js"));
        assert!(is_quiet_asset("/css/style.css"));
        assert!(!is_quiet_asset("/login/abc"));
        assert!(!is_quiet_asset("/index.html"));
    }

    #[test]
    fn plain_status_label_is_the_code() {
        assert_eq!(status_label(StatusCode::NOT_FOUND, false), "404");
    }

    #[test]
    fn colored_status_label_follows_status_class() {
        assert_eq!(status_label(StatusCode::OK, true), "200".green().to_string());
        assert_eq!(status_label(StatusCode::FOUND, true), "302".cyan().to_string());
        assert_eq!(status_label(StatusCode::NOT_FOUND, true), "404".yellow().to_string());
        assert_eq!(
            status_label(StatusCode::BAD_GATEWAY, true),
            "502".red().to_string()
        );
    }

    #[tokio::test]
    async fn logs_requests_but_skips_successful_assets() {
        let (logs, _guard) = CapturedLogs::install();
        let app = app();

        assert_eq!(get_uri(&app, "/css/style.css").await, StatusCode::OK);
        assert_eq!(get_uri(&app, "/nope").await, StatusCode::NOT_FOUND);
        assert_eq!(
            get_uri(&app, "/js/broken.js").await,
            StatusCode::INTERNAL_SERVER_ERROR
        );

        let output = logs.contents();
        let line_for = |path: &str| {
            output
                .lines()
                .find(|line| line.contains(path))
                .map(str::to_string)
        };

        assert_eq!(line_for("/css/style.css"), None, "{output}");
        let missing = line_for("/nope").unwrap();
        assert!(missing.contains("unknown ip      - GET  /nope "), "{missing}");
        assert!(missing.contains("404"), "{missing}");
        assert!(missing.ends_with("ms"), "{missing}");
        assert!(line_for("/js/broken.js").unwrap().contains("500"));
    }
}
