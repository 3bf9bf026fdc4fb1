//! Tracing subscriber setup and the per-request access log.

use crate::{
    config::ServerConfig,
    error::{CreateLogDirectorySnafu, ReadBodySnafu, RegistrarError, RegistrarResult},
};
use axum::{
    body::{Body, Bytes},
    extract::Request,
    http::Method,
    middleware::Next,
    response::{IntoResponse, Response},
};
use http_body_util::LengthLimitError;
use snafu::{IntoError, ResultExt};
use std::{error::Error, time::Instant};
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    EnvFilter, Layer, filter::LevelFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt,
};

pub const MAX_BODY_BYTES: usize = 1024 * 1024;

const COMBINED_LOG: &str = "combined.log";
const ERROR_LOG: &str = "error.log";

/// Installs the global subscriber: human-readable console output, plus JSON `combined.log` and
/// `error.log` files when a log directory is configured.
///
/// The returned guards flush the file writers when dropped, so `main` has to hold them.
pub fn init(server_config: &ServerConfig) -> RegistrarResult<Vec<WorkerGuard>> {
    let env_filter = || EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let console = fmt::layer().with_target(true).with_filter(env_filter());

    let mut guards = Vec::new();
    let (combined, errors) = match &server_config.log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir).context(CreateLogDirectorySnafu { path: dir.clone() })?;

            let (combined_writer, combined_guard) =
                tracing_appender::non_blocking(tracing_appender::rolling::never(dir, COMBINED_LOG));
            let (error_writer, error_guard) =
                tracing_appender::non_blocking(tracing_appender::rolling::never(dir, ERROR_LOG));
            guards.extend([combined_guard, error_guard]);

            let combined = fmt::layer()
                .json()
                .with_ansi(false)
                .with_writer(combined_writer)
                .with_filter(env_filter());
            let errors = fmt::layer()
                .json()
                .with_ansi(false)
                .with_writer(error_writer)
                .with_filter(LevelFilter::ERROR);
            (Some(combined), Some(errors))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(console)
        .with(combined)
        .with(errors)
        .init();

    info!(
        environment = %server_config.environment,
        log_dir = ?server_config.log_dir,
        "`tracing` online"
    );
    Ok(guards)
}

fn is_read(method: &Method) -> bool {
    matches!(*method, Method::GET | Method::HEAD | Method::OPTIONS)
}

/// Whether reading failed because a length limit (ours or `RequestBodyLimitLayer`'s) was hit.
fn exceeds_limit(error: &axum::Error) -> bool {
    let mut source = Some(error as &(dyn Error + 'static));
    while let Some(e) = source {
        if e.is::<LengthLimitError>() {
            return true;
        }
        source = e.source();
    }
    false
}

fn status_level(status: u16) -> Level {
    match status {
        500.. => Level::ERROR,
        400..=499 => Level::WARN,
        _ => Level::INFO,
    }
}

/// Logs method, path, status and duration for every request, and the body for writes.
pub async fn log_requests(request: Request, next: Next) -> Response {
    let started = Instant::now();
    let method = request.method().clone();
    let path = request.uri().path().to_string();

    let (request, body) = if is_read(&method) {
        (request, None)
    } else {
        let (parts, body) = request.into_parts();
        let bytes: Bytes = match axum::body::to_bytes(body, MAX_BODY_BYTES).await {
            Ok(bytes) => bytes,
            Err(e) if exceeds_limit(&e) => {
                return RegistrarError::BodyTooLarge {
                    limit: MAX_BODY_BYTES,
                }
                .into_response();
            }
            Err(e) => return ReadBodySnafu.into_error(e).into_response(),
        };
        let logged = String::from_utf8_lossy(&bytes).into_owned();
        (Request::from_parts(parts, Body::from(bytes)), Some(logged))
    };

    let response = next.run(request).await;

    let status = response.status().as_u16();
    let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
    let body = body.as_deref();
    let level = status_level(status);
    if level == Level::ERROR {
        error!(%method, %path, status, duration_ms, body, "Request failed");
    } else if level == Level::WARN {
        warn!(%method, %path, status, duration_ms, body, "Request rejected");
    } else {
        info!(%method, %path, status, duration_ms, body, "Request handled");
    }

    response
}
