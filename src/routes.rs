use crate::{
    data::{student::Student, teacher::Teacher},
    logging::{MAX_BODY_BYTES, log_requests},
    state::RegistrarState,
};
use axum::{
    Json, Router,
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::get,
};
use serde_json::json;
use std::any::Any;
use tower_http::{
    catch_panic::CatchPanicLayer, compression::CompressionLayer, limit::RequestBodyLimitLayer,
    trace::TraceLayer,
};

pub mod courses;
pub mod dashboard;
pub mod frontend;
pub mod health;
pub mod resources;

/// Last line of defence: a handler that panics still produces a JSON 500.
fn panic_response(panic: Box<dyn Any + Send + 'static>) -> Response {
    let detail = panic
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| panic.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic");
    error!(detail, "Handler panicked");

    let body = json!({
        "error": "InternalServerError",
        "message": "Internal server error",
    });
    (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
}

pub fn router(state: RegistrarState) -> Router {
    let router = Router::new()
        .route("/health", get(health::get_health))
        .route("/health/detailed", get(health::get_detailed_health))
        .route("/api/dashboard/stats", get(dashboard::get_stats));
    let router = resources::routes::<Student>(router, "/api/students");
    let router = resources::routes::<Teacher>(router, "/api/teachers");
    let router = courses::routes(router);

    router
        .fallback(frontend::serve_frontend)
        .layer(middleware::from_fn(log_requests))
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(CompressionLayer::new())
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
