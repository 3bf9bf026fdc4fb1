use crate::{
    data::ConnectionState,
    error::{MalformedMemoryStatsSnafu, ReadMemoryStatsSnafu, RegistrarResult},
    state::RegistrarState,
};
use axum::{
    Json,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use serde_json::json;
use snafu::{IntoError, OptionExt};
use std::{io::ErrorKind, path::Path, time::Duration};
use time::{OffsetDateTime, format_description::well_known::Rfc3339};

const PROC_STATUS: &str = "/proc/self/status";

#[derive(Serialize, Debug, Clone, Copy, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MemoryUsage {
    pub resident_mib: f64,
    pub total_mib: f64,
}

#[derive(Serialize, Debug)]
pub struct DatabaseHealth {
    pub status: ConnectionState,
}

#[derive(Serialize, Debug)]
pub struct SystemInfo {
    pub platform: &'static str,
    pub arch: &'static str,
    pub version: &'static str,
    pub pid: u32,
}

#[derive(Serialize, Debug)]
pub struct DetailedHealth {
    pub status: &'static str,
    pub timestamp: String,
    pub environment: String,
    pub uptime: String,
    pub database: DatabaseHealth,
    /// `None` on platforms without procfs
    pub memory: Option<MemoryUsage>,
    pub system: SystemInfo,
}

fn timestamp() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_default()
}

pub fn format_uptime(uptime: Duration) -> String {
    let total = uptime.as_secs();
    let days = total / 86_400;
    let hours = (total % 86_400) / 3_600;
    let minutes = (total % 3_600) / 60;
    let seconds = total % 60;
    format!("{days}d {hours}h {minutes}m {seconds}s")
}

fn kib_field(status: &str, field: &'static str) -> RegistrarResult<f64> {
    status
        .lines()
        .find_map(|line| line.strip_prefix(field))
        .and_then(|rest| rest.trim_start_matches(':').split_whitespace().next())
        .and_then(|kib| kib.parse::<u64>().ok())
        .map(|kib| kib as f64)
        .context(MalformedMemoryStatsSnafu { field })
}

fn round_2dp(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Reads resident and total (virtual) size out of a `/proc/<pid>/status` dump.
pub fn parse_memory_usage(status: &str) -> RegistrarResult<MemoryUsage> {
    let resident = kib_field(status, "VmRSS")?;
    let total = kib_field(status, "VmSize")?;
    Ok(MemoryUsage {
        resident_mib: round_2dp(resident / 1024.0),
        total_mib: round_2dp(total / 1024.0),
    })
}

async fn memory_usage(status_path: &Path) -> RegistrarResult<Option<MemoryUsage>> {
    let status = match tokio::fs::read_to_string(status_path).await {
        Ok(status) => status,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            debug!(path = %status_path.display(), "No procfs, skipping memory figures");
            return Ok(None);
        }
        Err(e) => return Err(ReadMemoryStatsSnafu.into_error(e)),
    };
    parse_memory_usage(&status).map(Some)
}

/// Liveness only: never touches the store.
pub async fn get_health(State(state): State<RegistrarState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "UP",
        "timestamp": timestamp(),
        "uptime": state.started_at().elapsed().as_secs_f64(),
        "environment": state.config().server_config().environment.clone(),
    }))
}

pub async fn get_detailed_health(State(state): State<RegistrarState>) -> Response {
    let database = DatabaseHealth {
        status: state.connection_state().await,
    };

    let memory = match memory_usage(Path::new(PROC_STATUS)).await {
        Ok(memory) => memory,
        Err(e) => {
            error!(?e, "Unable to gather health details");
            let body = json!({
                "status": "DOWN",
                "timestamp": timestamp(),
                "error": e.to_string(),
            });
            return (StatusCode::SERVICE_UNAVAILABLE, Json(body)).into_response();
        }
    };

    Json(DetailedHealth {
        status: "UP",
        timestamp: timestamp(),
        environment: state.config().server_config().environment.clone(),
        uptime: format_uptime(state.started_at().elapsed()),
        database,
        memory,
        system: SystemInfo {
            platform: std::env::consts::OS,
            arch: std::env::consts::ARCH,
            version: env!("CARGO_PKG_VERSION"),
            pid: std::process::id(),
        },
    })
    .into_response()
}
