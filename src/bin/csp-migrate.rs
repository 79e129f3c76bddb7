use anyhow::Result;
use csp_police::config::Config;
use csp_police::{logging, storage};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;
    logging::init(config.debug);

    info!(dsn = %config.db.dsn, "Connecting to database");
    let pool = storage::connect(&config.db.dsn).await?;

    match storage::migrate(&pool).await? {
        0 => info!("No change"),
        applied => info!(applied, "Applied migrations"),
    }

    pool.close().await;
    Ok(())
}
