#![warn(clippy::pedantic, clippy::all, clippy::nursery)]
#![allow(clippy::single_match_else, clippy::module_name_repetitions)]

use crate::{config::RuntimeConfiguration, state::RegistrarState};
use tokio::{net::TcpListener, signal};

#[macro_use]
extern crate tracing;

mod config;
mod data;
mod error;
mod logging;
mod routes;
mod state;

async fn shutdown_signal(state: RegistrarState) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    warn!("signal received, starting graceful shutdown");
    state.sensible_shutdown().await;
}

#[tokio::main]
async fn main() {
    // a missing .env is fine, the process environment still applies
    let _ = dotenvy::dotenv();

    let config = RuntimeConfiguration::new().expect("unable to create config");
    let _log_guards = logging::init(&config.server_config()).expect("unable to set up logging");

    let state = RegistrarState::new(config.clone())
        .await
        .expect("unable to create state");
    let app = routes::router(state.clone());

    let server_config = config.server_config();
    let server_ip = server_config.bind_address();
    let listener = TcpListener::bind(&server_ip)
        .await
        .expect("unable to listen on server ip");

    info!(?server_ip, environment = %server_config.environment, "Listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(state))
        .await
        .expect("unable to serve app");
}
