use std::time::Duration;

use anyhow::Context;
use barber_slots::{
    catalog::FileServiceCatalog, configuration::Configuration,
    configuration_handler::ConfigurationHandler, database_interface::DatabaseInterface,
    http::create_app, local_slots::LocalSlots,
};
use tokio::time::sleep;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let configuration = ConfigurationHandler::parse_arguments();

    let catalog = match configuration.catalog_path() {
        Some(path) => FileServiceCatalog::load(&path)?,
        None => {
            info!("No service catalog configured, every service lookup will fail");
            FileServiceCatalog::default()
        }
    };

    let address = format!("0.0.0.0:{}", configuration.port());
    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .with_context(|| format!("Failed to bind {address}"))?;
    info!(%address, "Barber slots accessible");

    let app = if let Some(database_url) = configuration.database_url() {
        let repository = loop {
            match DatabaseInterface::new(&database_url) {
                Ok(repository) => {
                    info!("Successfully connected to database");
                    break repository;
                }
                Err(err) => {
                    error!(?err, "Failed to establish database connection. Retry in 1 sec. Restart without a database url to keep slots in memory.");
                    sleep(Duration::from_secs(1)).await;
                }
            }
        };
        create_app(repository, catalog, configuration)
    } else {
        info!("No database configured, slots are kept in memory");
        create_app(LocalSlots::default(), catalog, configuration)
    };

    axum::serve(listener, app)
        .await
        .context("Server terminated unexpectedly")
}
