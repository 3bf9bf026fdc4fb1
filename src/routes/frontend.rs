use crate::{error::RegistrarError, state::RegistrarState};
use axum::{
    extract::{Request, State},
    response::{IntoResponse, Response},
};
use tower::ServiceExt;
use tower_http::services::{ServeDir, ServeFile};

const API_PREFIX: &str = "/api";

fn is_api_path(path: &str) -> bool {
    path.strip_prefix(API_PREFIX)
        .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
}

/// Serves the built single-page app, answering unknown paths with its `index.html` so the
/// client-side router can take over. Unmatched `/api` paths get a JSON 404 instead.
pub async fn serve_frontend(State(state): State<RegistrarState>, request: Request) -> Response {
    if is_api_path(request.uri().path()) {
        return RegistrarError::UnknownRoute.into_response();
    }

    let dir = state.config().server_config().frontend_dir.clone();
    let index = ServeFile::new(dir.join("index.html"));

    match ServeDir::new(dir).fallback(index).oneshot(request).await {
        Ok(response) => response.into_response(),
        Err(infallible) => match infallible {},
    }
}

#[cfg(test)]
mod tests {
    use super::is_api_path;

    #[test]
    fn api_namespace_is_matched_by_segment() {
        assert!(is_api_path("/api"));
        assert!(is_api_path("/api/"));
        assert!(is_api_path("/api/nothing-here"));
        assert!(!is_api_path("/apiary"));
        assert!(!is_api_path("/students/42"));
        assert!(!is_api_path("/"));
    }
}
