use anyhow::Result;
use csp_police::app::{self, AppEnv};
use csp_police::config::Config;
use csp_police::forward::HttpForwarder;
use csp_police::{logging, shutdown_signal};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;
    logging::init(config.debug);

    let forwarder = HttpForwarder::new(&config.rpc.url())?;
    info!(endpoint = %forwarder.endpoint(), "Forwarding reports to storage service");

    let app = app::router(AppEnv::new(Arc::new(forwarder)));

    let address = config.server.address();
    info!(%address, "Starting server");
    let listener = tokio::net::TcpListener::bind(&address).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("Server shutdown complete");
    Ok(())
}
