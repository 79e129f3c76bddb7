use anyhow::Result;
use csp_police::config::Config;
use csp_police::{logging, rpc, shutdown_signal, storage};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;
    logging::init(config.debug);

    info!(dsn = %config.db.dsn, "Connecting to database");
    let pool = storage::connect(&config.db.dsn).await?;

    let address = config.rpc.address();
    info!(%address, "Starting storage service");
    let listener = tokio::net::TcpListener::bind(&address).await?;
    axum::serve(listener, rpc::router(pool.clone()))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    pool.close().await;
    Ok(())
}
