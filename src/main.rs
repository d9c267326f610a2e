use std::sync::Arc;

use fleet_import::{
    backend_client::HttpFleetBackend, build_app, config::Config, http, import::Services,
    logging, AppState,
};
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    logging::init_logging();

    let config = Config::from_env()?;
    let backend = Arc::new(HttpFleetBackend::from_config(&config)?);

    let bind_socket = config.bind_socket()?;
    let state = AppState::new(config.api_token.clone(), Services::from_backend(backend));
    let _expiry_sweep =
        http::sessions::start_expiry_sweep(state.sessions.clone(), config.session_idle);
    let app = build_app(state);
    let listener = tokio::net::TcpListener::bind(bind_socket).await?;

    info!(
        bind_addr = %config.bind_addr,
        bind_port = config.bind_port,
        backend_url = %config.backend_url,
        "server starting"
    );

    axum::serve(listener, app.into_make_service()).await?;
    Ok(())
}
