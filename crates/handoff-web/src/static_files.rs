use axum::http::{header, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use rust_embed::{Embed, EmbeddedFile};

#[derive(Embed)]
#[folder = "public/"]
struct Assets;

/// Looks up `path`, then `path.html`, then `path/index.html`.
fn resolve(path: &str) -> Option<(String, EmbeddedFile)> {
    let path = path.trim_matches('/');
    let candidates: Vec<String> = if path.is_empty() {
        vec!["index.html".to_string()]
    } else {
        vec![
            path.to_string(),
            format!("{path}.html"),
            format!("{path}/index.html"),
        ]
    };

    candidates.into_iter().find_map(|candidate| {
        let file = Assets::get(&candidate)?;
        Some((candidate, file))
    })
}

pub async fn static_handler(uri: Uri) -> Response {
    match resolve(uri.path()) {
        Some((name, content)) => {
            let mime = mime_guess::from_path(&name).first_or_octet_stream();
            (
                StatusCode::OK,
                [(header::CONTENT_TYPE, mime.as_ref())],
                content.data.into_owned(),
            )
                .into_response()
        }
        None => StatusCode::NOT_FOUND.into_response(),
    }
}
